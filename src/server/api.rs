use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

use crate::common::error::ErrorKind;
use crate::common::events::{ApiRequest, ApiResponse};
use crate::server::database::Database;
use crate::server::store::MessageStore;
use crate::server::{summaries, users};

/// The request surface: one JSON request per line in, one JSON response
/// per line out. Carries the four durable operations; live fan-out goes
/// through the websocket listener instead.
pub struct ApiServer {
    db: Arc<Database>,
    store: MessageStore,
}

impl ApiServer {
    pub fn new(db: Arc<Database>, store: MessageStore) -> Self {
        Self { db, store }
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("api listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("api connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_client(stream).await {
                    warn!("api client {} ended with error: {}", peer, e);
                }
            });
        }
    }

    async fn handle_client(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<ApiRequest>(trimmed) {
                Ok(request) => self.handle(request).await,
                Err(e) => ApiResponse::Error {
                    kind: ErrorKind::Validation,
                    reason: format!("malformed request: {}", e),
                },
            };

            let mut payload = serde_json::to_string(&response)?;
            payload.push('\n');
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    /// Dispatches one request. Errors are answered, never swallowed, and
    /// never take the connection down.
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let result = match request {
            ApiRequest::SendMessage { sender, receiver, content } => self
                .store
                .append(&sender, &receiver, &content)
                .await
                .map(|message| ApiResponse::Message { message }),
            ApiRequest::History { user_a, user_b } => self
                .store
                .history(&user_a, &user_b)
                .await
                .map(|messages| ApiResponse::Messages { messages }),
            ApiRequest::Conversations { user_id } => summaries::summarize(&self.db, &user_id)
                .await
                .map(|conversations| ApiResponse::Conversations { conversations }),
            ApiRequest::RegisterUser { name, email } => users::register_user(&self.db, &name, &email)
                .await
                .map(|user| ApiResponse::User { user }),
        };

        result.unwrap_or_else(|e| ApiResponse::Error {
            kind: e.kind(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_server() -> Arc<ApiServer> {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.migrate().await.unwrap();
        let store = MessageStore::new(db.clone(), 2048);
        Arc::new(ApiServer::new(db, store))
    }

    #[tokio::test]
    async fn send_then_history_round_trips_through_the_handler() {
        let server = test_server().await;
        let resp = server
            .handle(ApiRequest::SendMessage {
                sender: "alice".into(),
                receiver: "bob".into(),
                content: "hello".into(),
            })
            .await;
        let sent = match resp {
            ApiResponse::Message { message } => message,
            other => panic!("unexpected response: {:?}", other),
        };

        let resp = server
            .handle(ApiRequest::History { user_a: "bob".into(), user_b: "alice".into() })
            .await;
        match resp {
            ApiResponse::Messages { messages } => {
                assert_eq!(messages, vec![sent]);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn validation_failures_carry_their_kind() {
        let server = test_server().await;
        let resp = server
            .handle(ApiRequest::SendMessage {
                sender: "".into(),
                receiver: "bob".into(),
                content: "x".into(),
            })
            .await;
        match resp {
            ApiResponse::Error { kind, .. } => assert_eq!(kind, ErrorKind::Validation),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
