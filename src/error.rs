use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections produced by the room itself. All of them leave the room untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    /// A new identity tried to join while the room is at capacity.
    #[error("the room is full")]
    RoomFull,

    /// The participant is not (or no longer) present; the caller should rejoin.
    #[error("participant is not present in the room")]
    NotPresent,

    #[error("message content is empty")]
    EmptyContent,
}

impl RoomError {
    /// Stable machine-readable code used on the wire.
    pub fn code(self) -> ErrorCode {
        match self {
            RoomError::RoomFull => ErrorCode::RoomFull,
            RoomError::NotPresent => ErrorCode::NotPresent,
            RoomError::EmptyContent => ErrorCode::EmptyContent,
        }
    }

    pub fn from_code(code: ErrorCode) -> Option<Self> {
        match code {
            ErrorCode::RoomFull => Some(RoomError::RoomFull),
            ErrorCode::NotPresent => Some(RoomError::NotPresent),
            ErrorCode::EmptyContent => Some(RoomError::EmptyContent),
            ErrorCode::Malformed | ErrorCode::Internal => None,
        }
    }

    /// Whether the caller recovers by running the rejoin protocol.
    pub fn requires_rejoin(self) -> bool {
        matches!(self, RoomError::NotPresent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    RoomFull,
    NotPresent,
    EmptyContent,
    /// The request could not be parsed. Not retried.
    Malformed,
    Internal,
}
