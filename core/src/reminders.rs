use anyhow::Result;
use chrono::{Duration, NaiveDateTime, NaiveTime};

use crate::db::Database;

pub const REMINDER_KIND: &str = "meal-reminder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSlot {
    pub hour: u32,
    pub meal_type: &'static str,
}

pub const REMINDER_SLOTS: [ReminderSlot; 3] = [
    ReminderSlot {
        hour: 8,
        meal_type: "breakfast",
    },
    ReminderSlot {
        hour: 13,
        meal_type: "lunch",
    },
    ReminderSlot {
        hour: 19,
        meal_type: "dinner",
    },
];

impl ReminderSlot {
    #[must_use]
    pub fn title(&self) -> String {
        let mut chars = self.meal_type.chars();
        let meal = chars
            .next()
            .map(|c| c.to_uppercase().chain(chars).collect::<String>())
            .unwrap_or_default();
        format!("{meal} time")
    }

    #[must_use]
    pub fn body(&self) -> String {
        format!("Check your meal plan for {}.", self.meal_type)
    }

    /// Today's firing if it is still ahead of `now`, otherwise tomorrow's.
    #[must_use]
    pub fn next_occurrence(&self, now: NaiveDateTime) -> NaiveDateTime {
        next_occurrence(now, self.hour)
    }
}

#[must_use]
pub fn next_occurrence(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(time);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Queue one notification per user for this slot. Returns how many were queued.
pub fn fire_reminder(db: &Database, slot: &ReminderSlot) -> Result<usize> {
    let users = db.list_users()?;
    let title = slot.title();
    let body = slot.body();
    db.with_transaction(|db| {
        for user in &users {
            db.insert_notification(&user.id, &title, &body, REMINDER_KIND)?;
        }
        Ok(())
    })?;
    tracing::info!(meal = slot.meal_type, users = users.len(), "reminder fired");
    Ok(users.len())
}
