pub mod backup;
pub mod db;
pub mod generator;
pub mod models;
pub mod planner;
pub mod print;
pub mod reconcile;
pub mod reminders;
pub mod service;
pub mod shopping;
