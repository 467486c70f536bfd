use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, RoomError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

/// JSON body of every non-2xx response produced by the chat API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
    /// Set when the client should join again and retry.
    #[serde(default)]
    pub rejoin: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(&room_err) = self.0.downcast_ref::<RoomError>() else {
            tracing::error!(error = ?self.0, "request failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}\n\n{}", self.0, self.0.backtrace()),
            )
                .into_response();
        };

        let status = match room_err {
            RoomError::RoomFull => StatusCode::FORBIDDEN,
            RoomError::NotPresent => StatusCode::CONFLICT,
            RoomError::EmptyContent => StatusCode::BAD_REQUEST,
        };
        let body = ErrorBody {
            error: room_err.code(),
            message: room_err.to_string(),
            rejoin: room_err.requires_rejoin(),
        };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
