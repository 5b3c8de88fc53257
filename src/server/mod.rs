pub mod api;
pub mod config;
pub mod database;
pub mod presence;
pub mod rooms;
pub mod store;
pub mod summaries;
pub mod users;
pub mod websocket;
