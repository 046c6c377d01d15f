use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use pantry_core::db::Database;

use super::helpers::exit_not_found;
use crate::config::{generate_token, hash_token};

pub(crate) fn cmd_user_add(db: &Database, email: &str, name: Option<&str>, json: bool) -> Result<()> {
    let user = db.create_user(email, name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("Created user {} (id: {})", user.email, user.id);
    }
    Ok(())
}

/// Issue a new API token for a user. Only its hash is kept, so the token
/// is shown once and any previous one stops working.
pub(crate) fn cmd_user_token(db: &Database, email: &str, json: bool) -> Result<()> {
    let Some(user) = db.get_user_by_email(email)? else {
        exit_not_found(&format!("User '{email}' not found"), json);
    };
    let token = issue_token(db, &user.id)?;

    if json {
        println!("{}", serde_json::json!({ "email": user.email, "token": token }));
    } else {
        println!("API token for {}:\n\n  {token}\n", user.email);
        println!("Send it as 'Authorization: Bearer <token>'. It will not be shown again.");
    }
    Ok(())
}

fn issue_token(db: &Database, user_id: &str) -> Result<String> {
    let token = generate_token();
    db.set_user_token_hash(user_id, &hash_token(&token))?;
    tracing::info!(user = %user_id, "issued new API token");
    Ok(token)
}

pub(crate) fn cmd_user_list(db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "Email")]
        email: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "ID")]
        id: String,
    }

    let users = db.list_users()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }
    let rows: Vec<UserRow> = users
        .into_iter()
        .map(|u| UserRow {
            email: u.email,
            name: u.name.unwrap_or_default(),
            id: u.id,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}
