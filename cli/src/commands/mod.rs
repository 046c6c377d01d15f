mod backup;
mod generate;
mod helpers;
mod notify;
mod plan;
mod recipe;
mod shop;
mod user;

pub(crate) use backup::{cmd_backup_csv, cmd_backup_export, cmd_backup_import};
pub(crate) use generate::cmd_generate;
pub(crate) use notify::{cmd_notify_clear, cmd_notify_list, cmd_notify_read};
pub(crate) use plan::{cmd_plan_add, cmd_plan_remove, cmd_plan_week};
pub(crate) use recipe::{
    RecipeFields, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_import,
    cmd_recipe_list, cmd_recipe_show,
};
pub(crate) use shop::{
    cmd_shop_add, cmd_shop_clear, cmd_shop_delete, cmd_shop_list, cmd_shop_print, cmd_shop_toggle,
};
pub(crate) use user::{cmd_user_add, cmd_user_list, cmd_user_token};
