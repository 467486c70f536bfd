use axum::{debug_handler, extract::{Query, State}, Json};
use serde::{Deserialize, Serialize};

use crate::AppResult;

use super::{
    msg::Message,
    presence::{Participant, ParticipantId},
    room::RoomHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub participant: Participant,
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LeaveQuery {
    participant_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub success: bool,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn join(
    State(room): State<RoomHandle>,
    Json(participant): Json<Participant>,
) -> AppResult<Json<JoinResponse>> {
    let snapshot = room.join(participant.clone(), None)?;

    Ok(Json(JoinResponse {
        participant,
        participants: snapshot.participants,
        messages: snapshot.messages,
    }))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn leave(
    State(room): State<RoomHandle>,
    Query(LeaveQuery { participant_id }): Query<LeaveQuery>,
) -> Json<LeaveResponse> {
    room.leave(participant_id);
    Json(LeaveResponse { success: true })
}
