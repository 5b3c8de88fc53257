use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// API listener port; the websocket listener binds port + 1.
    pub port: u16,
    pub database_url: String,
    pub max_message_length: usize,
    /// Seconds a fresh websocket connection gets to send its hello.
    pub hello_timeout_secs: u64,
    pub log_level: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/duochat.db".to_string()),
            max_message_length: env::var("MAX_MESSAGE_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
            hello_timeout_secs: env::var("HELLO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_host: String,
    pub api_port: u16,
    pub websocket_host: String,
    pub websocket_port: u16,
    pub max_retry_attempts: u32,
    pub retry_delay_secs: u64,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_host: env::var("CLIENT_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            api_port: env::var("CLIENT_API_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5000),
            websocket_host: env::var("WEBSOCKET_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            websocket_port: env::var("WEBSOCKET_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5001),
            max_retry_attempts: env::var("WS_MAX_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retry_delay_secs: env::var("WS_RETRY_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        }
    }
}
