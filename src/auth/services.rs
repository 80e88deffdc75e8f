use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::auth::authorize::{check_session, Principal};
use crate::auth::claims::{Identity, TokenKind};
use crate::auth::dto::{
    AuthResponse, ChangePasswordRequest, LoginRequest, PublicUser, RegisterRequest,
};
use crate::auth::lifecycle;
use crate::auth::repo_types::User;
use crate::config::AuthPolicy;
use crate::error::{AuthError, AuthResult};
use crate::state::AppState;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn require_fields(fields: &[(&str, &str)]) -> AuthResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

pub(crate) fn validate_email(email: &str) -> AuthResult<()> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(AuthError::validation("Invalid email"))
    }
}

pub(crate) fn validate_password(policy: &AuthPolicy, password: &str) -> AuthResult<()> {
    if password.chars().count() < policy.min_password_length {
        return Err(AuthError::validation(format!(
            "Password must be at least {} characters long",
            policy.min_password_length
        )));
    }
    Ok(())
}

pub(crate) fn normalize_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

pub(crate) fn issue_pair(state: &AppState, user: &User) -> AuthResult<AuthResponse> {
    let identity = Identity::from(user);
    Ok(AuthResponse {
        access_token: state.keys.sign_access(identity)?,
        refresh_token: state.keys.sign_refresh(identity)?,
        user: PublicUser::from(user),
    })
}

/// Self-registration. The account is a pending farmer until an admin approves it.
pub async fn register(state: &AppState, req: RegisterRequest) -> AuthResult<User> {
    let email = req.email.trim().to_string();
    require_fields(&[("email", email.as_str()), ("password", req.password.as_str())])?;
    validate_email(&email)?;
    validate_password(&state.config.policy, &req.password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::Conflict("User with that email already exists".into()));
    }

    let hash = state.hasher.hash_blocking(req.password).await?;
    let user = User::register(email, normalize_name(req.name), hash, OffsetDateTime::now_utc());
    let user = state.users.create(user).await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

pub async fn login(state: &AppState, req: LoginRequest) -> AuthResult<AuthResponse> {
    login_at(state, req, OffsetDateTime::now_utc()).await
}

pub(crate) async fn login_at(
    state: &AppState,
    req: LoginRequest,
    now: OffsetDateTime,
) -> AuthResult<AuthResponse> {
    let email = req.email.trim().to_string();
    require_fields(&[("email", email.as_str()), ("password", req.password.as_str())])?;

    let user = match state.users.find_by_email(&email).await? {
        Some(u) => u,
        None => {
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    lifecycle::ensure_not_locked(&user, now)?;
    if let Err(e) = lifecycle::ensure_can_login(&user) {
        warn!(user_id = %user.id, status = %user.status, "login refused by account status");
        return Err(e);
    }

    let ok = state
        .hasher
        .verify_blocking(req.password, user.password_hash.clone())
        .await?;

    if !ok {
        let current = state
            .users
            .record_failed_login(user.id, state.lockout(), now)
            .await?;
        warn!(user_id = %user.id, attempts = current.login_attempts, "login invalid password");
        return Err(lifecycle::failed_attempt_error(&current, now));
    }

    // The record may have moved on while the password was being verified.
    let current = state.users.clear_failed_logins(user.id, now).await?;
    if current.password_hash != user.password_hash {
        warn!(user_id = %user.id, "password changed during login");
        return Err(AuthError::InvalidCredentials);
    }
    lifecycle::ensure_can_login(&current)?;

    info!(user_id = %current.id, role = %current.role, "user logged in");
    issue_pair(state, &current)
}

/// Trades a refresh token for a new pair, with the same freshness rules as the gate.
pub async fn refresh(state: &AppState, refresh_token: &str) -> AuthResult<AuthResponse> {
    let claims = state.keys.verify_kind(refresh_token, TokenKind::Refresh)?;
    let current = state.users.find_by_id(claims.sub).await?;
    check_session(&claims, current.as_ref())?;

    // check_session only succeeds when the record exists
    let user = current.ok_or(AuthError::ExpiredSession)?;
    debug!(user_id = %user.id, "token pair refreshed");
    issue_pair(state, &user)
}

pub async fn current_user(state: &AppState, principal: &Principal) -> AuthResult<User> {
    state
        .users
        .find_by_id(principal.id)
        .await?
        .ok_or_else(|| AuthError::unauthenticated("User no longer exists"))
}

/// Verifies the current password and rotates the credential, which expires
/// every previously issued token.
pub async fn change_password(
    state: &AppState,
    principal: &Principal,
    req: ChangePasswordRequest,
) -> AuthResult<AuthResponse> {
    require_fields(&[
        ("current_password", req.current_password.as_str()),
        ("new_password", req.new_password.as_str()),
    ])?;
    validate_password(&state.config.policy, &req.new_password)?;

    let mut user = current_user(state, principal).await?;
    let ok = state
        .hasher
        .verify_blocking(req.current_password, user.password_hash.clone())
        .await?;
    if !ok {
        warn!(user_id = %user.id, "password change with wrong current password");
        return Err(AuthError::InvalidCredentials);
    }

    let seen = user.updated_at;
    let hash = state.hasher.hash_blocking(req.new_password).await?;
    user.set_password_hash(hash, OffsetDateTime::now_utc());
    state.users.update(&user, seen).await?;

    info!(user_id = %user.id, "password changed");
    issue_pair(state, &user)
}
