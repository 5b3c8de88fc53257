use std::collections::HashSet;

use log::warn;
use tokio::sync::mpsc;

use crate::client::api_client::ApiClient;
use crate::client::live::LiveConnection;
use crate::common::error::ChatError;
use crate::common::events::ServerEvent;
use crate::common::models::{pair_key, Message, MessageStatus};

/// One participant's local view of a conversation: the merge target for
/// the history fetch, the authoritative append response, and the
/// broadcast stream. Identity-based dedup plus a re-sort after every
/// insert keep the three paths convergent no matter how they interleave.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    messages: Vec<Message>,
    ids: HashSet<i64>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the view with a fresh history fetch.
    pub fn reset(&mut self, history: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        for message in history {
            self.merge(message);
        }
    }

    /// Inserts a message unless one with the same id is already present,
    /// then restores ascending `(sent_at, id)` order. A broadcast may
    /// arrive out of order relative to the fetch; the sort is what makes
    /// the view match a later `history` read. Returns whether the view
    /// changed.
    pub fn merge(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        self.messages.sort_by_key(|m| (m.sent_at, m.id));
        true
    }

    /// Applies a read receipt to the local copy, if present.
    pub fn apply_seen(&mut self, message_id: i64) -> bool {
        for message in &mut self.messages {
            if message.id == message_id {
                message.status = MessageStatus::Seen;
                message.is_read = true;
                return true;
            }
        }
        false
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// The sync coordinator for one open conversation. Owns its injected
/// request client and live connection; the durable append response is
/// the source of truth for local state, the broadcast is only a
/// low-latency hint.
pub struct ChatSession {
    user_id: String,
    peer_id: String,
    room: String,
    api: ApiClient,
    live: LiveConnection,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    view: ConversationView,
}

impl ChatSession {
    pub fn new(
        user_id: impl Into<String>,
        peer_id: impl Into<String>,
        api: ApiClient,
        mut live: LiveConnection,
    ) -> Self {
        let user_id = user_id.into();
        let peer_id = peer_id.into();
        let room = pair_key(&user_id, &peer_id);
        let events = live.take_receiver();
        Self { user_id, peer_id, room, api, live, events, view: ConversationView::new() }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn messages(&self) -> &[Message] {
        self.view.messages()
    }

    /// Enters the conversation: connect the live channel, join the room,
    /// then seed the view from the durable history. Joining before the
    /// fetch means a message racing the fetch arrives by at least one
    /// path, and the id dedup collapses it when it arrives by both.
    pub async fn open(&mut self) -> Result<(), ChatError> {
        self.live.connect().await?;
        self.live.join_room(&self.room)?;
        let history = self.api.history(&self.user_id, &self.peer_id).await?;
        for message in history {
            self.view.merge(message);
        }
        Ok(())
    }

    /// Durable write first; the append response (with server-assigned id
    /// and timestamp) is merged as the authoritative copy, then the same
    /// message is published to the room. A publish failure only delays
    /// delivery until the peer's next history fetch.
    pub async fn send(&mut self, content: &str) -> Result<Message, ChatError> {
        let message = self.api.send_message(&self.user_id, &self.peer_id, content).await?;
        self.view.merge(message.clone());
        if let Err(e) = self.live.publish(&self.room, message.clone()) {
            warn!("publish failed, peer will pick the message up on refetch: {}", e);
        }
        Ok(message)
    }

    /// Applies one live event to the view; returns whether it changed.
    pub fn handle_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::MessagePublished { message } => self.view.merge(message),
            ServerEvent::Seen { message_id, .. } => self.view.apply_seen(message_id),
            ServerEvent::Welcome { .. } | ServerEvent::Presence { .. } => false,
            ServerEvent::Error { reason } => {
                warn!("live channel error: {}", reason);
                false
            }
        }
    }

    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.as_mut()?.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.events.as_mut()?.try_recv().ok()
    }

    pub fn mark_seen(&self, message_id: i64) -> Result<(), ChatError> {
        self.live.mark_seen(&self.room, message_id)
    }

    /// After a dropped transport: rejoin (membership was lost with the
    /// connection) and refetch history to recover anything published
    /// while away, since the router keeps no backlog.
    pub async fn resync(&mut self) -> Result<(), ChatError> {
        self.live.close();
        self.live.connect().await?;
        self.live.join_room(&self.room)?;
        let history = self.api.history(&self.user_id, &self.peer_id).await?;
        self.view.reset(history);
        Ok(())
    }
}
