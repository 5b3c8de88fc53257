// Self-contained smoke run: boots both listeners in-process against an
// in-memory database, then walks the whole flow with the real clients.
use std::sync::Arc;
use std::time::Duration;

use duochat::client::api_client::ApiClient;
use duochat::client::live::{LiveConfig, LiveConnection};
use duochat::client::sync::ChatSession;
use duochat::common::events::ServerEvent;
use duochat::server::api::ApiServer;
use duochat::server::database::Database;
use duochat::server::store::MessageStore;
use duochat::server::websocket::LiveChannel;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let db = Arc::new(Database::in_memory().await?);
    db.migrate().await?;
    let store = MessageStore::new(db.clone(), 2048);

    let api_listener = TcpListener::bind("127.0.0.1:0").await?;
    let api_addr = api_listener.local_addr()?;
    let api = Arc::new(ApiServer::new(db.clone(), store.clone()));
    tokio::spawn(api.run(api_listener));

    let ws_listener = TcpListener::bind("127.0.0.1:0").await?;
    let ws_url = format!("ws://{}", ws_listener.local_addr()?);
    let channel = Arc::new(LiveChannel::new(store, Duration::from_secs(30)));
    tokio::spawn(channel.run(ws_listener));

    let probe = ApiClient::connect(&api_addr.to_string()).await?;
    let alice = probe.register_user("Alice", "alice@example.com").await?;
    let bob = probe.register_user("Bob", "bob@example.com").await?;
    println!("registered {} and {}", alice.name, bob.name);

    let alice_api = ApiClient::connect(&api_addr.to_string()).await?;
    let bob_api = ApiClient::connect(&api_addr.to_string()).await?;
    let alice_live = LiveConnection::new(LiveConfig::new(ws_url.clone()), alice.id.clone());
    let bob_live = LiveConnection::new(LiveConfig::new(ws_url), bob.id.clone());

    let mut alice_session = ChatSession::new(alice.id.clone(), bob.id.clone(), alice_api, alice_live);
    let mut bob_session = ChatSession::new(bob.id.clone(), alice.id.clone(), bob_api, bob_live);
    alice_session.open().await?;
    bob_session.open().await?;
    println!("both sessions joined room {}", alice_session.room());

    let sent = alice_session.send("hello bob!").await?;
    println!("alice sent message {} ({})", sent.id, sent.content);

    // bob picks the message up from the broadcast path
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), bob_session.next_event())
            .await?
            .ok_or_else(|| anyhow::anyhow!("live channel closed"))?;
        if bob_session.handle_event(event) {
            break;
        }
    }
    println!("bob received: {:?}", bob_session.messages().last().map(|m| &m.content));

    // read receipt flows back to alice
    bob_session.mark_seen(sent.id)?;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), alice_session.next_event())
            .await?
            .ok_or_else(|| anyhow::anyhow!("live channel closed"))?;
        let was_seen = matches!(event, ServerEvent::Seen { .. });
        alice_session.handle_event(event);
        if was_seen {
            break;
        }
    }
    println!("alice sees her message as {:?}", alice_session.messages()[0].status);

    let history = probe.history(&alice.id, &bob.id).await?;
    println!("durable history has {} message(s)", history.len());

    let conversations = probe.conversations(&alice.id).await?;
    for summary in conversations {
        println!(
            "conversation with {}: {} message(s), last: {:?}",
            summary.counterpart, summary.message_count, summary.last_message
        );
    }

    Ok(())
}
