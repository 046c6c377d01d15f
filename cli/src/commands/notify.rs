use std::process;

use anyhow::{Result, bail};
use tabled::{Table, Tabled, settings::Style};

use pantry_core::db::Database;

use super::helpers::{exit_not_found, short_id, truncate};

pub(crate) fn cmd_notify_list(db: &Database, user_id: &str, unread_only: bool, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct NotificationRow {
        #[tabled(rename = "")]
        unread: &'static str,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "When")]
        when: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Message")]
        body: String,
    }

    let notifications: Vec<_> = db
        .list_notifications(user_id)?
        .into_iter()
        .filter(|n| !unread_only || !n.read)
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "notifications": notifications,
                "unread": db.unread_notification_count(user_id)?,
            }))?
        );
        return Ok(());
    }
    if notifications.is_empty() {
        eprintln!("No notifications");
        process::exit(2);
    }

    let rows: Vec<NotificationRow> = notifications
        .iter()
        .map(|n| NotificationRow {
            unread: if n.read { "" } else { "●" },
            id: short_id(&n.id).to_string(),
            when: n.created_at.get(..16).unwrap_or(&n.created_at).replace('T', " "),
            title: truncate(&n.title, 24),
            body: truncate(&n.body, 48),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

/// Mark one notification (by id or id prefix) or all of them read.
pub(crate) fn cmd_notify_read(
    db: &Database,
    user_id: &str,
    id: Option<&str>,
    all: bool,
    json: bool,
) -> Result<()> {
    if all {
        let updated = db.mark_all_notifications_read(user_id)?;
        if json {
            println!("{}", serde_json::json!({ "updated": updated }));
        } else {
            println!("Marked {updated} notifications read");
        }
        return Ok(());
    }

    let Some(target) = id.map(str::trim).filter(|t| !t.is_empty()) else {
        bail!("Give a notification id or --all");
    };
    let matches: Vec<String> = db
        .list_notifications(user_id)?
        .into_iter()
        .filter(|n| n.id.starts_with(target))
        .map(|n| n.id)
        .collect();
    let notification_id = match matches.as_slice() {
        [only] => only.clone(),
        [] => exit_not_found(&format!("Notification '{target}' not found"), json),
        _ => bail!("'{target}' matches {} notifications; use a longer id", matches.len()),
    };

    db.mark_notification_read(user_id, &notification_id)?;
    if json {
        println!("{}", serde_json::json!({ "read": notification_id }));
    } else {
        println!("Marked notification {} read", short_id(&notification_id));
    }
    Ok(())
}

pub(crate) fn cmd_notify_clear(db: &Database, user_id: &str, json: bool) -> Result<()> {
    let removed = db.clear_notifications(user_id)?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {removed} notifications");
    }
    Ok(())
}
