//! The shared room and the HTTP/WebSocket adapters in front of it.

mod join;
mod msg;
mod poll;
mod presence;
mod room;
mod send;
mod wire;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use join::{JoinResponse, LeaveResponse};
pub use msg::{Message, MessageId, MessageLog};
pub use poll::PollQuery;
pub use presence::{ConnectionId, JoinOutcome, Participant, ParticipantId, Presence};
pub use room::{LeaveReason, PollOutcome, Room, RoomEvent, RoomHandle, RoomSnapshot};
pub use send::{SendRequest, SendResponse};
pub use wire::{ClientFrame, ServerFrame};

pub const CHAT_PATH: &str = "/api/chat";
pub const WS_PATH: &str = "/ws";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            CHAT_PATH,
            get(poll::poll)
                .post(send::send)
                .put(join::join)
                .delete(join::leave),
        )
        .route(WS_PATH, get(ws::room_ws))
}
