use std::collections::HashMap;
use std::sync::Arc;

use sqlx::Row;

use crate::common::error::ChatError;
use crate::common::models::ConversationSummary;
use crate::server::database::Database;

/// Derives the ranked conversation list for one user straight from the
/// message log. Recomputed in full on every call; there is no cached or
/// incremental view to invalidate.
///
/// Single pass: rows arrive sorted by recency, so the first row seen for
/// a counterpart fixes its last message, and every later row for the same
/// counterpart only bumps the count. First-seen order of counterparts is
/// therefore already descending last-activity order.
pub async fn summarize(
    db: &Arc<Database>,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, ChatError> {
    let rows = sqlx::query(
        "SELECT sender, receiver, content, sent_at FROM messages \
         WHERE sender = ?1 OR receiver = ?1 \
         ORDER BY sent_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(&db.pool)
    .await?;

    let mut summaries: Vec<ConversationSummary> = Vec::new();
    let mut by_counterpart: HashMap<String, usize> = HashMap::new();

    for row in &rows {
        let sender: String = row.get("sender");
        let receiver: String = row.get("receiver");
        let counterpart = if sender == user_id { receiver } else { sender.clone() };

        match by_counterpart.get(&counterpart) {
            Some(&idx) => summaries[idx].message_count += 1,
            None => {
                by_counterpart.insert(counterpart.clone(), summaries.len());
                summaries.push(ConversationSummary {
                    counterpart,
                    last_message: row.get("content"),
                    last_sender: sender,
                    last_message_at: row.get("sent_at"),
                    message_count: 1,
                });
            }
        }
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::MessageStore;

    async fn test_db() -> Arc<Database> {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn ranks_counterparts_by_recency_with_counts() {
        let db = test_db().await;
        let store = MessageStore::new(db.clone(), 2048);
        store.append("alice", "bob", "hi").await.unwrap();
        store.append("bob", "alice", "hey").await.unwrap();
        store.append("alice", "carol", "yo").await.unwrap();

        let summaries = summarize(&db, "alice").await.unwrap();
        assert_eq!(summaries.len(), 2);

        // carol's exchange is the most recent, so it ranks first
        assert_eq!(summaries[0].counterpart, "carol");
        assert_eq!(summaries[0].last_message, "yo");
        assert_eq!(summaries[0].last_sender, "alice");
        assert_eq!(summaries[0].message_count, 1);

        assert_eq!(summaries[1].counterpart, "bob");
        assert_eq!(summaries[1].last_message, "hey");
        assert_eq!(summaries[1].last_sender, "bob");
        assert_eq!(summaries[1].message_count, 2);
    }

    #[tokio::test]
    async fn user_with_no_messages_gets_an_empty_list() {
        let db = test_db().await;
        let summaries = summarize(&db, "nobody").await.unwrap();
        assert!(summaries.is_empty());
    }

    #[tokio::test]
    async fn direction_does_not_leak_into_grouping() {
        let db = test_db().await;
        let store = MessageStore::new(db.clone(), 2048);
        // both directions of the same pair collapse into one conversation
        store.append("alice", "bob", "one").await.unwrap();
        store.append("bob", "alice", "two").await.unwrap();
        store.append("alice", "bob", "three").await.unwrap();

        let summaries = summarize(&db, "bob").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].counterpart, "alice");
        assert_eq!(summaries[0].message_count, 3);
        assert_eq!(summaries[0].last_message, "three");
    }
}
