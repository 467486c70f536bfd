use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::AppResult;

use super::{msg::Message, presence::ParticipantId, room::RoomHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub participant_id: ParticipantId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub message: Message,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send(
    State(room): State<RoomHandle>,
    Json(SendRequest { participant_id, content }): Json<SendRequest>,
) -> AppResult<Json<SendResponse>> {
    let message = room.send(participant_id, &content)?;
    Ok(Json(SendResponse { message }))
}
