use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo_types::{unix_micros, AccountStatus, Role, User};

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[serde(alias = "Access")]
    Access,
    #[serde(alias = "Refresh")]
    Refresh,
}

/// Identity snapshot a token is minted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
    pub status: AccountStatus,
    /// Microseconds since the epoch.
    pub pwd_changed: i64,
}

impl From<&User> for Identity {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            role: u.role,
            status: u.status,
            pwd_changed: unix_micros(u.last_password_change),
        }
    }
}

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: Role,
    pub status: AccountStatus,
    /// Last password change, unix microseconds.
    pub pwd: i64,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.sub,
            role: self.role,
            status: self.status,
            pwd_changed: self.pwd,
        }
    }
}
