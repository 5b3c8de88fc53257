use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::common::events::{ClientEvent, ServerEvent};
use crate::server::presence::PresenceRegistry;
use crate::server::rooms::RoomRegistry;
use crate::server::store::MessageStore;

/// The live channel: a websocket listener whose only jobs are room
/// fan-out, presence signaling, and read receipts. Durability lives in
/// the message store; a payload published here is a low-latency hint.
pub struct LiveChannel {
    rooms: RoomRegistry,
    presence: PresenceRegistry,
    store: MessageStore,
    hello_timeout: Duration,
}

impl LiveChannel {
    pub fn new(store: MessageStore, hello_timeout: Duration) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            presence: PresenceRegistry::new(),
            store,
            hello_timeout,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("live channel listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("live connection from {}", peer);
            let channel = self.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.handle_connection(stream).await {
                    warn!("live connection {} ended with error: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // A connection has no identity until its hello arrives.
        let hello = tokio::time::timeout(self.hello_timeout, ws_receiver.next()).await;
        let user_id = match hello {
            Ok(Some(Ok(WsMessage::Text(text)))) => match serde_json::from_str::<ClientEvent>(&text)
            {
                Ok(ClientEvent::Hello { user_id }) => user_id,
                Ok(_) => {
                    let reject = ServerEvent::Error {
                        reason: "expected hello as the first event".to_string(),
                    };
                    let _ = ws_sender
                        .send(WsMessage::Text(serde_json::to_string(&reject)?))
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    let reject = ServerEvent::Error { reason: format!("malformed hello: {}", e) };
                    let _ = ws_sender
                        .send(WsMessage::Text(serde_json::to_string(&reject)?))
                        .await;
                    return Ok(());
                }
            },
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => return Ok(()),
            Ok(Some(Ok(_))) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Err(_) => {
                debug!("hello timeout, dropping connection");
                return Ok(());
            }
        };

        let connection_id = Uuid::new_v4().to_string();
        self.presence.register(&user_id).await;
        info!("connection {} identified as user {}", connection_id, user_id);

        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
        let _ = tx.send(ServerEvent::Welcome { connection_id: connection_id.clone() });

        // Writer task drains the connection's event queue; per-connection
        // FIFO keeps room fan-out in publish order.
        let writer_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let payload = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                if ws_sender.send(WsMessage::Text(payload)).await.is_err() {
                    break;
                }
            }
        });

        let mut joined: HashSet<String> = HashSet::new();
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            self.handle_event(event, &connection_id, &user_id, &tx, &mut joined)
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(ServerEvent::Error { reason: format!("malformed event: {}", e) });
                        }
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }

        // Cleanup: membership is dropped first, then the offline
        // transition is announced to the rooms this connection was in,
        // but only if no other connection keeps the user online.
        let left = self.rooms.leave_all(&connection_id).await;
        let went_offline = self.presence.unregister(&user_id).await;
        if went_offline {
            for room in &left {
                self.rooms
                    .publish(room, ServerEvent::Presence { user_id: user_id.clone(), online: false })
                    .await;
            }
        }
        writer_task.abort();
        info!("connection {} for user {} closed", connection_id, user_id);
        Ok(())
    }

    async fn handle_event(
        &self,
        event: ClientEvent,
        connection_id: &str,
        user_id: &str,
        tx: &mpsc::UnboundedSender<ServerEvent>,
        joined: &mut HashSet<String>,
    ) {
        match event {
            ClientEvent::Hello { .. } => {
                let _ = tx.send(ServerEvent::Error {
                    reason: "already identified".to_string(),
                });
            }
            ClientEvent::JoinRoom { room } => {
                self.rooms.join(&room, connection_id, tx.clone()).await;
                joined.insert(room.clone());
                self.rooms
                    .publish(&room, ServerEvent::Presence { user_id: user_id.to_string(), online: true })
                    .await;
            }
            ClientEvent::LeaveRoom { room } => {
                self.rooms.leave(&room, connection_id).await;
                joined.remove(&room);
                self.rooms
                    .publish(&room, ServerEvent::Presence { user_id: user_id.to_string(), online: false })
                    .await;
            }
            ClientEvent::Publish { room, message } => {
                // Fan-out only; the payload was persisted by the store
                // before the client asked for the broadcast.
                let delivered = self
                    .rooms
                    .publish(&room, ServerEvent::MessagePublished { message })
                    .await;
                debug!("published to {} member(s) of {}", delivered, room);
            }
            ClientEvent::MarkSeen { room, message_id } => {
                match self.store.mark_seen(message_id, user_id).await {
                    Ok(true) => {
                        self.rooms
                            .publish(
                                &room,
                                ServerEvent::Seen {
                                    message_id,
                                    user_id: user_id.to_string(),
                                },
                            )
                            .await;
                    }
                    Ok(false) => {
                        debug!("mark_seen {} ignored for non-receiver {}", message_id, user_id);
                    }
                    Err(e) => {
                        let _ = tx.send(ServerEvent::Error { reason: e.to_string() });
                    }
                }
            }
        }
    }
}
