use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{AccountStatus, Role, User};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// Response returned after login, refresh or a password change.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Registration issues no token: the account waits for approval.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            role: u.role,
            status: u.status,
            status_reason: u.status_reason.clone(),
            created_at: u.created_at,
        }
    }
}

/// Body of `POST /admin/users`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_created_role")]
    pub role: Role,
}

fn default_created_role() -> Role {
    Role::Admin
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AccountStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn public_user_serialization() {
        let u = User::register(
            "test@example.com".into(),
            Some("Nimal".into()),
            "hash".into(),
            datetime!(2024-01-01 0:00 UTC),
        );
        let json = serde_json::to_string(&PublicUser::from(&u)).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("hash"));
        assert!(!json.contains("status_reason"));
    }

    #[test]
    fn create_user_defaults_to_admin_role() {
        let req: CreateUserRequest =
            serde_json::from_str(r#"{"email":"a@x.com","password":"password1"}"#).unwrap();
        assert_eq!(req.role, Role::Admin);
    }

    #[test]
    fn status_request_parses_snake_case() {
        let req: UpdateStatusRequest =
            serde_json::from_str(r#"{"status":"blocked","reason":"spam"}"#).unwrap();
        assert_eq!(req.status, AccountStatus::Blocked);
        assert!(serde_json::from_str::<UpdateRoleRequest>(r#"{"role":"owner"}"#).is_err());
    }
}
