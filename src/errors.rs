//! Error taxonomy (§7).
//!
//! Internal, typed errors per component via `thiserror`; a single stable
//! `ws::ErrorCode` that every component maps its errors onto before an
//! ERROR frame reaches a client; `ApiError` for the small REST surface,
//! matching the teacher's `utils/errors.rs` response shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Numeric error codes carried in `{"type":"ERROR","code":...}` frames (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum ErrorCode {
    BadRequest = 4000,
    Unauthorized = 4003,
    UnknownType = 4004,
    NotSubscribed = 4005,
    NotParticipant = 4032,
    ContestNotFound = 4044,
    RoomNotFound = 4045,
    RateLimited = 4290,
    ServerError = 5001,
    SubscriptionFailed = 5002,
    ExternalServiceError = 5003,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed frame: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("rate limited")]
    RateLimited,
}

impl HubError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::UnknownType(_) => ErrorCode::UnknownType,
            HubError::BadRequest(_) => ErrorCode::BadRequest,
            HubError::Auth(e) => e.code(),
            HubError::Room(e) => e.code(),
            HubError::Notify(e) => e.code(),
            HubError::Cache(_) => ErrorCode::ExternalServiceError,
            HubError::Topic(e) => e.code(),
            HubError::RateLimited => ErrorCode::RateLimited,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing session token")]
    MissingToken,
    #[error("invalid session token")]
    InvalidToken,
    #[error("wallet unknown or banned")]
    UnknownWallet,
    #[error("action requires admin role")]
    RequiresAdmin,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Database(_) => ErrorCode::ExternalServiceError,
            _ => ErrorCode::Unauthorized,
        }
    }
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("contest {0} not found")]
    ContestNotFound(i64),
    #[error("room {0} not found")]
    RoomNotFound(i64),
    #[error("principal is not a participant")]
    NotParticipant,
    #[error("chat message exceeds 200 characters")]
    MessageTooLong,
    #[error("not a member of this room")]
    NotMember,
    #[error("chat rate limited")]
    RateLimited,
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::ContestNotFound(_) => ErrorCode::ContestNotFound,
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::NotParticipant | RoomError::NotMember => ErrorCode::NotParticipant,
            RoomError::MessageTooLong => ErrorCode::BadRequest,
            RoomError::RateLimited => ErrorCode::RateLimited,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("entry does not belong to this wallet")]
    NotOwner,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl NotifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NotifyError::NotOwner => ErrorCode::Unauthorized,
            NotifyError::Database(_) => ErrorCode::ExternalServiceError,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("upstream fetch failed: {0}")]
    FetchFailed(String),
}

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("not subscribed to {0}")]
    NotSubscribed(String),
    #[error("subscription denied for {0}")]
    Denied(String),
}

impl TopicError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TopicError::NotSubscribed(_) => ErrorCode::NotSubscribed,
            TopicError::Denied(_) => ErrorCode::Unauthorized,
        }
    }
}

/// REST-facing error envelope, kept close to the teacher's `ApiError` shape.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    message: String,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ApiErrorBody {
            error: status.to_string(),
            message: self.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
