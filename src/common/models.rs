use serde::{Deserialize, Serialize};

/// Delivery lifecycle flag on a message. Advisory; only `mark_seen`
/// moves it, and only to `Seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
        }
    }

    /// Parses the TEXT column value; unknown values fall back to `Sent`.
    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => MessageStatus::Delivered,
            "seen" => MessageStatus::Seen,
            _ => MessageStatus::Sent,
        }
    }
}

/// One persisted chat message. `id` is the store-assigned rowid and also
/// serves as the insertion-sequence tiebreaker; `sent_at` is unix millis
/// assigned at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub sent_at: i64,
    pub status: MessageStatus,
    pub is_read: bool,
}

/// Derived view of one conversation from a given user's perspective.
/// Never persisted; recomputed on each query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub counterpart: String,
    pub last_message: String,
    pub last_sender: String,
    pub last_message_at: i64,
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

/// Canonical room key for a two-party conversation: the two ids sorted
/// lexicographically and joined with `_`, so both participants compute
/// the same key regardless of who initiates.
pub fn pair_key(a: &str, b: &str) -> String {
    let mut ids = [a, b];
    ids.sort();
    format!("{}_{}", ids[0], ids[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_direction_independent() {
        assert_eq!(pair_key("alice", "bob"), pair_key("bob", "alice"));
        assert_eq!(pair_key("alice", "bob"), "alice_bob");
    }

    #[test]
    fn pair_key_of_identical_ids() {
        assert_eq!(pair_key("alice", "alice"), "alice_alice");
    }

    #[test]
    fn status_column_round_trip() {
        assert_eq!(MessageStatus::parse("seen"), MessageStatus::Seen);
        assert_eq!(MessageStatus::parse("delivered"), MessageStatus::Delivered);
        // unknown values degrade to the default lifecycle start
        assert_eq!(MessageStatus::parse("garbage"), MessageStatus::Sent);
        assert_eq!(MessageStatus::parse(MessageStatus::Seen.as_str()), MessageStatus::Seen);
    }
}
