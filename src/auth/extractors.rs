use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::authorize::{check_session, Principal};
use super::claims::TokenKind;
use crate::error::AuthError;
use crate::state::AppState;

/// Legacy header still sent by the web client.
const LEGACY_TOKEN_HEADER: &str = "x-auth-token";

pub(crate) fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    if let Some(auth) = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        // Expect "Bearer <token>"
        return auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::unauthenticated("Invalid Authorization header"));
    }

    parts
        .headers
        .get(LEGACY_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::unauthenticated("No token, authorization denied"))
}

/// `Json` whose rejections render as a structured validation error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AuthError))]
pub struct JsonBody<T>(pub T);

/// Verifies the access token and re-reads the user, yielding the current principal.
pub struct AuthUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.keys.verify_kind(token, TokenKind::Access)?;

        let current = state.users.find_by_id(claims.sub).await?;
        let principal = check_session(&claims, current.as_ref()).map_err(|e| {
            warn!(user_id = %claims.sub, kind = e.kind(), "session rejected");
            e
        })?;

        Ok(AuthUser(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<(&str, &str)>) -> Parts {
        let mut req = Request::builder().uri("/");
        if let Some((k, v)) = header {
            req = req.header(k, v);
        }
        req.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_bearer_and_legacy_headers() {
        assert_eq!(bearer_token(&parts(Some(("authorization", "Bearer abc")))).unwrap(), "abc");
        assert_eq!(bearer_token(&parts(Some(("authorization", "bearer abc")))).unwrap(), "abc");
        assert_eq!(bearer_token(&parts(Some(("x-auth-token", "xyz")))).unwrap(), "xyz");
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        let err = bearer_token(&parts(None)).unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
        let err = bearer_token(&parts(Some(("authorization", "Basic Zm9v")))).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Authorization header");
    }
}
