pub mod api_client;
pub mod live;
pub mod sync;
