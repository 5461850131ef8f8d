/// Error types for follow-service
///
/// Every variant maps to a stable error code so that callers can branch on
/// `code` instead of parsing messages.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

/// Stable error codes returned in the `code` field of error bodies.
pub mod codes {
    pub const SELF_FOLLOW_REJECTED: &str = "SELF_FOLLOW_REJECTED";
    pub const ALREADY_FOLLOWING: &str = "ALREADY_FOLLOWING";
    pub const FOLLOW_NOT_FOUND: &str = "FOLLOW_NOT_FOUND";
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    /// Audit-only: reconciliation found and fixed a counter. Never sent to end users.
    pub const COUNTER_DRIFT: &str = "COUNTER_DRIFT";
}

#[derive(Error, Debug)]
pub enum FollowError {
    #[error("You cannot follow yourself")]
    SelfFollowRejected,

    #[error("Already following user {following_id}")]
    DuplicateRelationship { follower_id: Uuid, following_id: Uuid },

    #[error("Not following user {following_id}")]
    RelationshipNotFound { follower_id: Uuid, following_id: Uuid },

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FollowError {
    pub fn code(&self) -> &'static str {
        match self {
            FollowError::SelfFollowRejected => codes::SELF_FOLLOW_REJECTED,
            FollowError::DuplicateRelationship { .. } => codes::ALREADY_FOLLOWING,
            FollowError::RelationshipNotFound { .. } => codes::FOLLOW_NOT_FOUND,
            FollowError::UserNotFound(_) => codes::USER_NOT_FOUND,
            FollowError::InvalidInput(_) => codes::INVALID_INPUT,
            FollowError::Unauthorized(_) => codes::UNAUTHORIZED,
            FollowError::Database(_) | FollowError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Message safe to return to API clients; storage details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            FollowError::Database(_) | FollowError::Internal(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for FollowError {
    fn status_code(&self) -> StatusCode {
        match self {
            FollowError::SelfFollowRejected => StatusCode::UNPROCESSABLE_ENTITY,
            FollowError::DuplicateRelationship { .. } => StatusCode::CONFLICT,
            FollowError::RelationshipNotFound { .. } | FollowError::UserNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            FollowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FollowError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            FollowError::Database(_) | FollowError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed with internal error");
        }

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "code": self.code(),
            "message": self.public_message(),
            "data": null,
        }))
    }
}

/// Result type alias for follow operations
pub type FollowResult<T> = Result<T, FollowError>;
