use std::sync::Arc;

use log::info;
use uuid::Uuid;

use crate::common::error::ChatError;
use crate::common::models::User;
use crate::server::database::Database;

/// Registers a user record. The message core treats user ids as opaque
/// strings and never enforces referential integrity against this table.
pub async fn register_user(
    db: &Arc<Database>,
    name: &str,
    email: &str,
) -> Result<User, ChatError> {
    if name.trim().is_empty() {
        return Err(ChatError::Validation("name must not be empty".into()));
    }
    if email.trim().is_empty() {
        return Err(ChatError::Validation("email must not be empty".into()));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        created_at: chrono::Utc::now().timestamp_millis(),
    };
    sqlx::query("INSERT INTO users (id, name, email, created_at) VALUES (?, ?, ?, ?)")
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.created_at)
        .execute(&db.pool)
        .await?;
    info!("registered user {} ({})", user.name, user.id);
    Ok(user)
}
