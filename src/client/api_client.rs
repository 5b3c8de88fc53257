use log::warn;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::common::error::{ChatError, ErrorKind};
use crate::common::events::{ApiRequest, ApiResponse};
use crate::common::models::{ConversationSummary, Message, User};

type Pending = (ApiRequest, oneshot::Sender<ApiResponse>);

/// Client for the request surface. A background task owns the TCP stream
/// and processes requests sequentially; when the server drops the
/// connection mid-request it reconnects, replays reads, and answers a
/// write whose fate is unknown with a channel error instead of risking a
/// duplicate.
pub struct ApiClient {
    tx: mpsc::UnboundedSender<Pending>,
    _bg: tokio::task::JoinHandle<()>,
}

impl ApiClient {
    pub async fn connect(host: &str) -> Result<Self, ChatError> {
        let stream = TcpStream::connect(host)
            .await
            .map_err(|e| ChatError::ChannelUnavailable(format!("connect to {}: {}", host, e)))?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);
        let host = host.to_string();

        let (tx, mut rx) = mpsc::unbounded_channel::<Pending>();
        let bg = tokio::spawn(async move {
            let mut response_line = String::new();
            while let Some((request, resp_tx)) = rx.recv().await {
                // Only reads are safe to replay; the server may have
                // applied a write before the connection died.
                let replayable = matches!(
                    request,
                    ApiRequest::History { .. } | ApiRequest::Conversations { .. }
                );
                let mut payload = match serde_json::to_string(&request) {
                    Ok(json) => json,
                    Err(e) => {
                        let _ = resp_tx.send(ApiResponse::Error {
                            kind: ErrorKind::Validation,
                            reason: format!("unserializable request: {}", e),
                        });
                        continue;
                    }
                };
                payload.push('\n');

                // Send the request and wait for one response line,
                // reconnecting if the stream drops and resending only
                // replayable requests.
                loop {
                    let wrote = writer.write_all(payload.as_bytes()).await.is_ok()
                        && writer.flush().await.is_ok();
                    if wrote {
                        response_line.clear();
                        match reader.read_line(&mut response_line).await {
                            Ok(n) if n > 0 => {
                                let response = serde_json::from_str::<ApiResponse>(
                                    response_line.trim(),
                                )
                                .unwrap_or_else(|e| ApiResponse::Error {
                                    kind: ErrorKind::ChannelUnavailable,
                                    reason: format!("malformed response: {}", e),
                                });
                                let _ = resp_tx.send(response);
                                break;
                            }
                            // 0 bytes or error: server closed on us
                            _ => {}
                        }
                    }

                    warn!("api connection lost, reconnecting to {}", host);
                    match TcpStream::connect(&host).await {
                        Ok(stream) => {
                            let (r, w) = stream.into_split();
                            reader = BufReader::new(r);
                            writer = BufWriter::new(w);
                        }
                        Err(e) => {
                            let _ = resp_tx.send(ApiResponse::Error {
                                kind: ErrorKind::ChannelUnavailable,
                                reason: format!("reconnect failed: {}", e),
                            });
                            break;
                        }
                    }
                    if !replayable {
                        let _ = resp_tx.send(ApiResponse::Error {
                            kind: ErrorKind::ChannelUnavailable,
                            reason: "connection lost before a response; the request was not retried"
                                .to_string(),
                        });
                        break;
                    }
                    // resend the read on the new stream
                }
            }
        });

        Ok(Self { tx, _bg: bg })
    }

    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ChatError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send((request, resp_tx))
            .map_err(|_| ChatError::ChannelUnavailable("request task is gone".into()))?;
        resp_rx
            .await
            .map_err(|_| ChatError::ChannelUnavailable("request was dropped".into()))
    }

    pub async fn send_message(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<Message, ChatError> {
        match self
            .request(ApiRequest::SendMessage {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                content: content.to_string(),
            })
            .await?
        {
            ApiResponse::Message { message } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    pub async fn history(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError> {
        match self
            .request(ApiRequest::History {
                user_a: user_a.to_string(),
                user_b: user_b.to_string(),
            })
            .await?
        {
            ApiResponse::Messages { messages } => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    pub async fn conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>, ChatError> {
        match self
            .request(ApiRequest::Conversations { user_id: user_id.to_string() })
            .await?
        {
            ApiResponse::Conversations { conversations } => Ok(conversations),
            other => Err(unexpected(other)),
        }
    }

    pub async fn register_user(&self, name: &str, email: &str) -> Result<User, ChatError> {
        match self
            .request(ApiRequest::RegisterUser {
                name: name.to_string(),
                email: email.to_string(),
            })
            .await?
        {
            ApiResponse::User { user } => Ok(user),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: ApiResponse) -> ChatError {
    match response {
        ApiResponse::Error { kind, reason } => kind.into_error(reason),
        other => ChatError::ChannelUnavailable(format!("unexpected response: {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Accepts connections, counts one request line per connection, then
    /// hangs up without ever answering.
    async fn drop_after_one_line(listener: TcpListener, lines_seen: Arc<AtomicUsize>) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let lines_seen = lines_seen.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                if matches!(reader.read_line(&mut line).await, Ok(n) if n > 0) {
                    lines_seen.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    }

    #[tokio::test]
    async fn a_send_that_dies_mid_flight_is_not_replayed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let lines_seen = Arc::new(AtomicUsize::new(0));
        tokio::spawn(drop_after_one_line(listener, lines_seen.clone()));

        let client = ApiClient::connect(&addr).await.unwrap();
        let err = client.send_message("alice", "bob", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::ChannelUnavailable(_)));

        // the request crossed the wire exactly once
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lines_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_history_fetch_is_replayed_on_a_fresh_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let served = Arc::new(AtomicUsize::new(0));
        let served_count = served.clone();
        tokio::spawn(async move {
            // first connection: swallow the request and hang up
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            let _ = reader.read_line(&mut line).await;
            drop(reader);

            // second connection: answer properly
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            let _ = stream.read_line(&mut line).await;
            served_count.fetch_add(1, Ordering::SeqCst);
            let mut reply =
                serde_json::to_string(&ApiResponse::Messages { messages: vec![] }).unwrap();
            reply.push('\n');
            stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
            stream.get_mut().flush().await.unwrap();
        });

        let client = ApiClient::connect(&addr).await.unwrap();
        let history = client.history("alice", "bob").await.unwrap();
        assert!(history.is_empty());
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }
}
