use std::sync::Arc;

use log::debug;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::common::error::ChatError;
use crate::common::models::{Message, MessageStatus};
use crate::server::database::Database;

/// Durable, time-ordered log of messages between identifier pairs. The
/// single source of truth: the room router only fans out what this store
/// has already persisted.
#[derive(Debug, Clone)]
pub struct MessageStore {
    db: Arc<Database>,
    max_message_length: usize,
}

pub(crate) fn message_from_row(row: &SqliteRow) -> Message {
    let status: String = row.get("status");
    Message {
        id: row.get("id"),
        sender: row.get("sender"),
        receiver: row.get("receiver"),
        content: row.get("content"),
        sent_at: row.get("sent_at"),
        status: MessageStatus::parse(&status),
        is_read: row.get::<i64, _>("is_read") != 0,
    }
}

impl MessageStore {
    pub fn new(db: Arc<Database>, max_message_length: usize) -> Self {
        Self { db, max_message_length }
    }

    fn validate(&self, sender: &str, receiver: &str, content: &str) -> Result<(), ChatError> {
        if sender.trim().is_empty() {
            return Err(ChatError::Validation("sender must not be empty".into()));
        }
        if receiver.trim().is_empty() {
            return Err(ChatError::Validation("receiver must not be empty".into()));
        }
        if content.trim().is_empty() {
            return Err(ChatError::Validation("content must not be empty".into()));
        }
        if content.chars().count() > self.max_message_length {
            return Err(ChatError::Validation(format!(
                "message too long (max {} chars)",
                self.max_message_length
            )));
        }
        Ok(())
    }

    /// Creates and durably persists one message, assigning its id and
    /// timestamp. One atomic insert; a concurrent `history` sees either
    /// the whole message or nothing.
    pub async fn append(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.validate(sender, receiver, content)?;
        let sent_at = chrono::Utc::now().timestamp_millis();
        let res = sqlx::query(
            "INSERT INTO messages (sender, receiver, content, sent_at, status, is_read) \
             VALUES (?, ?, ?, ?, 'sent', 0)",
        )
        .bind(sender)
        .bind(receiver)
        .bind(content)
        .bind(sent_at)
        .execute(&self.db.pool)
        .await?;

        let id = res.last_insert_rowid();
        debug!("appended message {} from {} to {}", id, sender, receiver);
        Ok(Message {
            id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content: content.to_string(),
            sent_at,
            status: MessageStatus::Sent,
            is_read: false,
        })
    }

    /// Every message exchanged between the pair, in either direction,
    /// ordered ascending by timestamp with the id as the stable
    /// tiebreaker. Symmetric in its arguments.
    pub async fn history(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError> {
        let rows = sqlx::query(
            "SELECT id, sender, receiver, content, sent_at, status, is_read FROM messages \
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1) \
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Read receipt: marks a message seen, but only for its receiver.
    /// Returns whether a row actually changed.
    pub async fn mark_seen(&self, message_id: i64, user_id: &str) -> Result<bool, ChatError> {
        let res = sqlx::query(
            "UPDATE messages SET status = 'seen', is_read = 1 WHERE id = ? AND receiver = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
