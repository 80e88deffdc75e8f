use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Every failure the auth core can report. Rendered as `{success, kind, message}`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// Same message for unknown email and wrong password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is locked. Please try again in {} minutes", retry_after_minutes(.retry_after_secs))]
    AccountLocked { retry_after_secs: i64 },

    #[error("Your account has been blocked. Please contact support.")]
    AccountBlocked,

    #[error("Your account is pending approval from admin.")]
    AccountPending,

    #[error("Token is not valid")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Session has expired, please log in again")]
    ExpiredSession,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn retry_after_minutes(secs: &i64) -> i64 {
    // rounds up
    ((*secs).max(0) + 59) / 60
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_error",
            AuthError::Conflict(_) => "conflict",
            AuthError::NotFound(_) => "not_found",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::AccountBlocked => "account_blocked",
            AuthError::AccountPending => "account_pending",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::ExpiredSession => "expired_session",
            AuthError::Unauthenticated(_) => "unauthenticated",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Hashing(_) => "hashing_error",
            AuthError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::ExpiredToken
            | AuthError::ExpiredSession
            | AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::AccountBlocked | AuthError::AccountPending | AuthError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Hashing(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Only store failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StoreUnavailable(_))
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::StoreUnavailable(_) => "Service temporarily unavailable".into(),
            AuthError::Hashing(_) | AuthError::Internal(_) => "Server Error".into(),
            other => other.to_string(),
        }
    }
}

const STORE_RETRY_SECS: i64 = 5;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<i64>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        }

        let retry_after_secs = match &self {
            AuthError::AccountLocked { retry_after_secs } => Some(*retry_after_secs),
            e if e.is_retryable() => Some(STORE_RETRY_SECS),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            kind: self.kind(),
            message: self.public_message(),
            retry_after_secs,
        };

        let mut res = (status, Json(body)).into_response();
        if let Some(secs) = retry_after_secs {
            if let Ok(v) = HeaderValue::from_str(&secs.max(0).to_string()) {
                res.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        res
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_message_rounds_minutes_up() {
        let err = AuthError::AccountLocked { retry_after_secs: 3541 };
        assert_eq!(
            err.to_string(),
            "Account is locked. Please try again in 60 minutes"
        );
        let err = AuthError::AccountLocked { retry_after_secs: 61 };
        assert!(err.to_string().contains("2 minutes"));
    }

    #[test]
    fn only_store_errors_are_retryable() {
        assert!(AuthError::StoreUnavailable("down".into()).is_retryable());
        assert!(!AuthError::InvalidCredentials.is_retryable());
        assert!(!AuthError::ExpiredSession.is_retryable());
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AuthError::Hashing("rng exploded".into());
        assert_eq!(err.public_message(), "Server Error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn locked_response_sets_retry_after() {
        let res = AuthError::AccountLocked { retry_after_secs: 120 }.into_response();
        assert_eq!(res.status(), StatusCode::LOCKED);
        assert_eq!(res.headers().get(header::RETRY_AFTER).unwrap(), "120");
    }
}
