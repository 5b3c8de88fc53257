use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by the server core and the clients. Storage and
/// validation failures are surfaced to the immediate caller; a broadcast
/// into an empty room is not an error at all.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed request (empty sender/receiver/content, oversized
    /// payload). No side effect, not worth retrying.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The durable store could not be reached or the write failed.
    /// Callers must not assume partial writes are visible.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The live channel or request transport is down. Delivery degrades
    /// to the next history refetch; nothing durable is lost.
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::StorageUnavailable(e.to_string())
    }
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            ChatError::ChannelUnavailable(_) => ErrorKind::ChannelUnavailable,
        }
    }
}

/// Wire form of the taxonomy, carried in API error responses so the
/// client can rebuild a typed `ChatError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StorageUnavailable,
    ChannelUnavailable,
}

impl ErrorKind {
    pub fn into_error(self, reason: String) -> ChatError {
        match self {
            ErrorKind::Validation => ChatError::Validation(reason),
            ErrorKind::StorageUnavailable => ChatError::StorageUnavailable(reason),
            ErrorKind::ChannelUnavailable => ChatError::ChannelUnavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_the_wire() {
        let err = ChatError::Validation("sender must not be empty".into());
        let rebuilt = err.kind().into_error(err.to_string());
        assert_eq!(rebuilt.kind(), ErrorKind::Validation);
        assert!(rebuilt.to_string().contains("sender must not be empty"));
    }
}
