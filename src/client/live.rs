use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use url::Url;

use crate::common::error::ChatError;
use crate::common::events::{ClientEvent, ServerEvent};
use crate::common::models::Message;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub url: String,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
}

impl LiveConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_retry_attempts: 5,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Owned handle to the live channel with an explicit open/close
/// lifecycle: no process-global socket. Connecting retries with
/// exponential backoff, identifies the user with a hello handshake, and
/// surfaces a dropped connection in-band as an `Error` event so the
/// session can resync. Room membership does not survive a reconnect.
pub struct LiveConnection {
    config: LiveConfig,
    user_id: String,
    retry_delay: Duration,
    outgoing: Option<mpsc::UnboundedSender<ClientEvent>>,
    incoming_tx: mpsc::UnboundedSender<ServerEvent>,
    incoming_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    connected: Arc<AtomicBool>,
    // Bumped on every connect and close; a reader task whose generation
    // is stale must not touch the shared state.
    generation: Arc<AtomicU64>,
}

impl LiveConnection {
    pub fn new(config: LiveConfig, user_id: impl Into<String>) -> Self {
        let retry_delay = config.retry_delay;
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            config,
            user_id: user_id.into(),
            retry_delay,
            outgoing: None,
            incoming_tx,
            incoming_rx: Some(incoming_rx),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The application's event stream. Survives reconnects; can only be
    /// taken once.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.incoming_rx.take()
    }

    pub fn is_connected(&self) -> bool {
        self.outgoing.is_some() && self.connected.load(Ordering::SeqCst)
    }

    /// Establishes (or re-establishes) the websocket connection,
    /// retrying with exponential backoff up to the configured limit.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        if self.is_connected() {
            return Ok(());
        }
        for attempt in 1..=self.config.max_retry_attempts {
            match self.try_connect().await {
                Ok(outgoing) => {
                    self.outgoing = Some(outgoing);
                    self.connected.store(true, Ordering::SeqCst);
                    self.retry_delay = self.config.retry_delay;
                    info!("live channel connected to {}", self.config.url);
                    return Ok(());
                }
                Err(e) => {
                    warn!("live connect attempt {} failed: {}", attempt, e);
                    if attempt < self.config.max_retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                        self.retry_delay =
                            std::cmp::min(self.retry_delay * 2, Duration::from_secs(30));
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(ChatError::ChannelUnavailable("max retry attempts exceeded".into()))
    }

    async fn try_connect(&self) -> Result<mpsc::UnboundedSender<ClientEvent>, ChatError> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| ChatError::ChannelUnavailable(format!("bad url: {}", e)))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChatError::ChannelUnavailable(format!("connect: {}", e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Identify before anything else; the server drops unidentified
        // connections after its hello timeout.
        let hello = ClientEvent::Hello { user_id: self.user_id.clone() };
        let payload = serde_json::to_string(&hello)
            .map_err(|e| ChatError::ChannelUnavailable(e.to_string()))?;
        ws_sender
            .send(WsMessage::Text(payload))
            .await
            .map_err(|e| ChatError::ChannelUnavailable(format!("hello: {}", e)))?;

        let welcome = tokio::time::timeout(Duration::from_secs(10), ws_receiver.next()).await;
        match welcome {
            Ok(Some(Ok(WsMessage::Text(text)))) => match serde_json::from_str::<ServerEvent>(&text)
            {
                Ok(ServerEvent::Welcome { connection_id }) => {
                    debug!("live channel welcomed connection {}", connection_id);
                }
                Ok(ServerEvent::Error { reason }) => {
                    return Err(ChatError::ChannelUnavailable(reason));
                }
                Ok(other) => {
                    return Err(ChatError::ChannelUnavailable(format!(
                        "expected welcome, got {:?}",
                        other
                    )));
                }
                Err(e) => {
                    return Err(ChatError::ChannelUnavailable(format!("bad welcome: {}", e)));
                }
            },
            Ok(_) => {
                return Err(ChatError::ChannelUnavailable("connection closed during hello".into()));
            }
            Err(_) => return Err(ChatError::ChannelUnavailable("hello timed out".into())),
        }

        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientEvent>();

        // Writer task: drains outgoing events onto the socket. When the
        // sender side is dropped it announces the close to the server,
        // so the server can release this connection's room membership
        // and presence.
        tokio::spawn(async move {
            while let Some(event) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.send(WsMessage::Close(None)).await;
        });

        // Reader task: forwards server events to the application and
        // reports the disconnect in-band when the stream ends. A reader
        // superseded by `close()` or a newer connection stays silent.
        let incoming = self.incoming_tx.clone();
        let connected = self.connected.clone();
        let generation = self.generation.clone();
        tokio::spawn(async move {
            while let Some(message) = ws_receiver.next().await {
                if generation.load(Ordering::SeqCst) != gen {
                    return;
                }
                match message {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if incoming.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = incoming
                                .send(ServerEvent::Error { reason: format!("parse error: {}", e) });
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
            if generation.load(Ordering::SeqCst) == gen {
                connected.store(false, Ordering::SeqCst);
                let _ = incoming.send(ServerEvent::Error { reason: "connection closed".into() });
            }
        });

        Ok(outgoing_tx)
    }

    fn send(&self, event: ClientEvent) -> Result<(), ChatError> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| ChatError::ChannelUnavailable("not connected".into()))?;
        outgoing
            .send(event)
            .map_err(|_| ChatError::ChannelUnavailable("connection task is gone".into()))
    }

    pub fn join_room(&self, room: &str) -> Result<(), ChatError> {
        self.send(ClientEvent::JoinRoom { room: room.to_string() })
    }

    pub fn leave_room(&self, room: &str) -> Result<(), ChatError> {
        self.send(ClientEvent::LeaveRoom { room: room.to_string() })
    }

    /// Asks the router to fan an already-persisted message out to the
    /// room.
    pub fn publish(&self, room: &str, message: Message) -> Result<(), ChatError> {
        self.send(ClientEvent::Publish { room: room.to_string(), message })
    }

    pub fn mark_seen(&self, room: &str, message_id: i64) -> Result<(), ChatError> {
        self.send(ClientEvent::MarkSeen { room: room.to_string(), message_id })
    }

    /// Tears the connection down: supersedes the reader task, then drops
    /// the outgoing half so the writer task sends a close frame and the
    /// server runs its disconnect cleanup for this connection.
    pub fn close(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.outgoing = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}
