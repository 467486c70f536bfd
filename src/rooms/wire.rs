//! JSON text frames exchanged over the push channel.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

use super::{
    msg::Message,
    presence::{Participant, ParticipantId},
    room::{LeaveReason, RoomEvent, RoomSnapshot},
};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Join { participant: Participant },
    Send { content: String },
    Heartbeat,
    Leave,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Join acknowledgement carrying the catch-up context.
    Joined {
        participants: Vec<Participant>,
        messages: Vec<Message>,
    },
    RoomFull { message: String },
    /// Acknowledges this connection's own `send` with the stored message.
    Sent { message: Message },
    MessageAppended { message: Message },
    PresenceChanged { participants: Vec<Participant> },
    ParticipantJoined { participant: Participant },
    ParticipantLeft { participant: Participant, reason: LeaveReason },
    /// The server no longer holds this participant as present.
    SessionLost { participant_id: ParticipantId },
    Error { code: ErrorCode, message: String },
}

impl From<RoomSnapshot> for ServerFrame {
    fn from(RoomSnapshot { participants, messages }: RoomSnapshot) -> Self {
        ServerFrame::Joined { participants, messages }
    }
}

impl From<RoomEvent> for ServerFrame {
    fn from(event: RoomEvent) -> Self {
        match event {
            RoomEvent::MessageAppended { message } => ServerFrame::MessageAppended { message },
            RoomEvent::PresenceChanged { participants } => ServerFrame::PresenceChanged { participants },
            RoomEvent::ParticipantJoined { participant } => ServerFrame::ParticipantJoined { participant },
            RoomEvent::ParticipantLeft { participant, reason } => {
                ServerFrame::ParticipantLeft { participant, reason }
            }
        }
    }
}
