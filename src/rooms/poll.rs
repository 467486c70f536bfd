use axum::{debug_handler, extract::{Query, State}, Json};
use serde::{Deserialize, Serialize};

use super::{
    msg::MessageId,
    presence::ParticipantId,
    room::{PollOutcome, RoomHandle},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub participant_id: ParticipantId,
    /// Highest message id the caller has already seen.
    pub cursor: Option<MessageId>,
}

/// Stateless pull endpoint. Never waits for new data and never fails for an
/// absent participant: that case is answered with `rejoin-required`.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn poll(
    State(room): State<RoomHandle>,
    Query(PollQuery { participant_id, cursor }): Query<PollQuery>,
) -> Json<PollOutcome> {
    Json(room.poll(participant_id, cursor))
}
