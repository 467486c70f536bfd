use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{config::ChatConfig, rooms::RoomHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    pub participants: usize,
    pub max_participants: usize,
    pub messages: usize,
    pub max_log_size: usize,
    /// Open push channels currently subscribed to room events.
    pub push_connections: usize,
}

#[debug_handler(state = crate::AppState)]
pub async fn health(
    State(room): State<RoomHandle>,
    State(config): State<Arc<ChatConfig>>,
) -> Json<Health> {
    room.sweep();

    Json(Health {
        status: "ok".to_owned(),
        participants: room.participants().len(),
        max_participants: config.max_participants,
        messages: room.message_count(),
        max_log_size: config.max_log_size,
        push_connections: room.subscriber_count(),
    })
}
