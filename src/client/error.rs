use thiserror::Error;

use crate::error::RoomError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("timed out opening the push channel")]
    ConnectTimeout,

    #[error("delivery channel closed")]
    ChannelClosed,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed server payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("server error: {0}")]
    Server(String),
}

impl ClientError {
    /// Failures of the transport itself. These drive failover and are never
    /// shown to the user as-is.
    pub fn is_transport(&self) -> bool {
        match self {
            ClientError::ConnectTimeout
            | ClientError::ChannelClosed
            | ClientError::Http(_)
            | ClientError::WebSocket(_) => true,
            ClientError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn room_error(&self) -> Option<RoomError> {
        match self {
            ClientError::Room(err) => Some(*err),
            _ => None,
        }
    }
}
