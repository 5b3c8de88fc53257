// Entry point for the duochat server: one TCP listener for the request
// surface and one websocket listener for the live channel.
use std::sync::Arc;
use std::time::Duration;

use duochat::server::api::ApiServer;
use duochat::server::config::ServerConfig;
use duochat::server::database::Database;
use duochat::server::store::MessageStore;
use duochat::server::websocket::LiveChannel;
use log::{error, info};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let database = Arc::new(Database::connect(&config.database_url).await?);
    info!("running database migrations...");
    database.migrate().await.map_err(|e| {
        error!("database migration failed: {}", e);
        e
    })?;

    let store = MessageStore::new(database.clone(), config.max_message_length);

    // Live channel on port + 1, next to the request surface.
    let ws_addr = format!("{}:{}", config.host, config.port + 1);
    let channel = Arc::new(LiveChannel::new(
        store.clone(),
        Duration::from_secs(config.hello_timeout_secs),
    ));
    let ws_listener = TcpListener::bind(&ws_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = channel.run(ws_listener).await {
            error!("live channel error: {}", e);
        }
    });
    info!("live channel started on {}", ws_addr);

    let api_addr = format!("{}:{}", config.host, config.port);
    let api_listener = TcpListener::bind(&api_addr).await?;
    let api = Arc::new(ApiServer::new(database, store));
    api.run(api_listener).await
}
