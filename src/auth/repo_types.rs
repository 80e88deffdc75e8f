use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum Role {
    Farmer,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub role: Role,
    pub status: AccountStatus,
    pub status_reason: Option<String>,
    pub login_attempts: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub lock_until: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_password_change: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Postgres keeps microseconds; truncate so tokens and stored rows agree.
pub fn truncate_to_micros(t: OffsetDateTime) -> OffsetDateTime {
    let micros = t.unix_timestamp_nanos() / 1_000;
    OffsetDateTime::from_unix_timestamp_nanos(micros * 1_000).unwrap_or(t)
}

/// Microseconds since the epoch, as carried in token claims.
pub fn unix_micros(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000) as i64
}

impl User {
    /// Self-registration: always a pending farmer.
    pub fn register(
        email: String,
        name: Option<String>,
        password_hash: String,
        now: OffsetDateTime,
    ) -> Self {
        Self::new(email, name, password_hash, Role::Farmer, AccountStatus::Pending, now)
    }

    /// Accounts created by a super admin (or the bootstrap seed) start active.
    pub fn provision(
        email: String,
        name: Option<String>,
        password_hash: String,
        role: Role,
        now: OffsetDateTime,
    ) -> Self {
        Self::new(email, name, password_hash, role, AccountStatus::Active, now)
    }

    fn new(
        email: String,
        name: Option<String>,
        password_hash: String,
        role: Role,
        status: AccountStatus,
        now: OffsetDateTime,
    ) -> Self {
        let now = truncate_to_micros(now);
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            role,
            status,
            status_reason: None,
            login_attempts: 0,
            lock_until: None,
            last_password_change: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the credential and moves `last_password_change`, which
    /// invalidates every token issued before this call.
    pub fn set_password_hash(&mut self, password_hash: String, now: OffsetDateTime) {
        self.password_hash = password_hash;
        self.last_password_change = truncate_to_micros(now);
        self.touch(now);
    }

    /// Moves `updated_at` forward, strictly, so every write yields a new version.
    pub fn touch(&mut self, now: OffsetDateTime) {
        let now = truncate_to_micros(now);
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}
