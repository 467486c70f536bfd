pub mod appresult;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod rooms;
pub mod server;

use std::sync::Arc;

use axum::extract::FromRef;

pub use appresult::{AppError, AppResult};
pub use config::ChatConfig;
pub use error::RoomError;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub room: rooms::RoomHandle,
    pub config: Arc<ChatConfig>,
}

impl AppState {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            room: rooms::RoomHandle::new(&config),
            config: Arc::new(config),
        }
    }
}
