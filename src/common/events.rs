use serde::{Deserialize, Serialize};

use crate::common::error::ErrorKind;
use crate::common::models::{ConversationSummary, Message, User};

/// Request surface, one JSON object per line over TCP. A closed set of
/// tagged variants validated at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    SendMessage {
        sender: String,
        receiver: String,
        content: String,
    },
    History {
        user_a: String,
        user_b: String,
    },
    Conversations {
        user_id: String,
    },
    RegisterUser {
        name: String,
        email: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApiResponse {
    Message { message: Message },
    Messages { messages: Vec<Message> },
    Conversations { conversations: Vec<ConversationSummary> },
    User { user: User },
    Error { kind: ErrorKind, reason: String },
}

/// Client-to-server events on the live channel. `Hello` must be the first
/// event on a fresh connection; everything else is rejected until then.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Hello { user_id: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
    /// Fans an already-persisted message out to the room. The router never
    /// writes to the store; the payload is a hint, the store is the truth.
    Publish { room: String, message: Message },
    MarkSeen { room: String, message_id: i64 },
}

/// Server-to-client events. Best-effort, at-most-once per joined
/// connection; a connection absent at publish time never sees the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome { connection_id: String },
    MessagePublished { message: Message },
    Presence { user_id: String, online: bool },
    Seen { message_id: i64, user_id: String },
    Error { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_tagged_json() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"join_room","room":"alice_bob"}"#).unwrap();
        match ev {
            ClientEvent::JoinRoom { room } => assert_eq!(room, "alice_bob"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let res = serde_json::from_str::<ClientEvent>(r#"{"type":"emoji_blast","room":"x"}"#);
        assert!(res.is_err());
    }
}
