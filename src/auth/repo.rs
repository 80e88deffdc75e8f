use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::lifecycle::{self, LockoutPolicy};
use crate::auth::repo_types::{AccountStatus, Role, User};
use crate::error::{AuthError, AuthResult};

const USER_COLUMNS: &str = "id, email, name, password_hash, role, status, status_reason, \
     login_attempts, lock_until, last_password_change, created_at, updated_at";

/// Narrows `UserStore::list`.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<AccountStatus>,
    pub exclude_super_admin: bool,
}

impl UserFilter {
    fn matches(&self, u: &User) -> bool {
        self.role.map_or(true, |r| u.role == r)
            && self.status.map_or(true, |s| u.status == s)
            && !(self.exclude_super_admin && u.role == Role::SuperAdmin)
    }
}

/// Persistence for user records. The core only talks to users through this.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>>;
    /// Writes the aggregate only if the stored row still carries
    /// `expected_updated_at`; otherwise `Conflict` and nothing changes.
    async fn update(&self, user: &User, expected_updated_at: OffsetDateTime) -> AuthResult<()>;
    /// Atomically counts a failed password against the current row.
    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: OffsetDateTime,
    ) -> AuthResult<User>;
    /// Atomically clears the lockout counter; returns the current row.
    async fn clear_failed_logins(&self, id: Uuid, now: OffsetDateTime) -> AuthResult<User>;
    /// Inserts a new record; a taken email is a `Conflict`.
    async fn create(&self, user: User) -> AuthResult<User>;
    async fn delete(&self, id: Uuid) -> AuthResult<()>;
    async fn list(&self, filter: &UserFilter) -> AuthResult<Vec<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
    timeout: Duration,
}

fn stale_write() -> AuthError {
    AuthError::Conflict("User was modified by another request, please retry".into())
}

impl PgUserStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> AuthResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(sqlx::Error::Database(db_err))) if db_err.is_unique_violation() => {
                Err(AuthError::Conflict("User with that email already exists".into()))
            }
            Ok(Err(e)) => {
                warn!(error = %e, op, "user store query failed");
                Err(AuthError::StoreUnavailable(format!("{op}: {e}")))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "user store timed out");
                Err(AuthError::StoreUnavailable(format!("{op}: timed out")))
            }
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        self.bounded(
            "find_by_email",
            sqlx::query_as::<_, User>(&sql).bind(email).fetch_optional(&self.db),
        )
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.bounded(
            "find_by_id",
            sqlx::query_as::<_, User>(&sql).bind(id).fetch_optional(&self.db),
        )
        .await
    }

    async fn update(&self, user: &User, expected_updated_at: OffsetDateTime) -> AuthResult<()> {
        let query = sqlx::query(
            r#"
            UPDATE users SET
                email = $2,
                name = $3,
                password_hash = $4,
                role = $5,
                status = $6,
                status_reason = $7,
                login_attempts = $8,
                lock_until = $9,
                last_password_change = $10,
                updated_at = $11
            WHERE id = $1 AND updated_at = $12
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.status)
        .bind(&user.status_reason)
        .bind(user.login_attempts)
        .bind(user.lock_until)
        .bind(user.last_password_change)
        .bind(user.updated_at)
        .bind(expected_updated_at);

        let done = self.bounded("update", query.execute(&self.db)).await?;
        if done.rows_affected() == 0 {
            warn!(user_id = %user.id, "stale user update rejected");
            return Err(stale_write());
        }
        debug!(user_id = %user.id, "user updated");
        Ok(())
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: OffsetDateTime,
    ) -> AuthResult<User> {
        // Every SET expression sees the pre-update row.
        let sql = format!(
            r#"
            UPDATE users SET
                login_attempts = CASE WHEN lock_until <= $2 THEN 1 ELSE login_attempts + 1 END,
                lock_until = CASE
                    WHEN lock_until > $2 THEN lock_until
                    WHEN (CASE WHEN lock_until <= $2 THEN 1 ELSE login_attempts + 1 END) >= $3
                        THEN $4
                    ELSE NULL
                END,
                updated_at = GREATEST($2, updated_at + INTERVAL '1 microsecond')
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let threshold = i32::try_from(policy.threshold).unwrap_or(i32::MAX);
        self.bounded(
            "record_failed_login",
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .bind(now)
                .bind(threshold)
                .bind(now + policy.duration)
                .fetch_optional(&self.db),
        )
        .await?
        .ok_or_else(|| AuthError::not_found("User not found"))
    }

    async fn clear_failed_logins(&self, id: Uuid, now: OffsetDateTime) -> AuthResult<User> {
        let sql = format!(
            r#"
            UPDATE users SET
                login_attempts = 0,
                lock_until = NULL,
                updated_at = CASE
                    WHEN login_attempts <> 0 OR lock_until IS NOT NULL
                        THEN GREATEST($2, updated_at + INTERVAL '1 microsecond')
                    ELSE updated_at
                END
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        self.bounded(
            "clear_failed_logins",
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .bind(now)
                .fetch_optional(&self.db),
        )
        .await?
        .ok_or_else(|| AuthError::not_found("User not found"))
    }

    async fn create(&self, user: User) -> AuthResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, status, status_reason,
                               login_attempts, lock_until, last_password_change, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {USER_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(user.status)
            .bind(&user.status_reason)
            .bind(user.login_attempts)
            .bind(user.lock_until)
            .bind(user.last_password_change)
            .bind(user.created_at)
            .bind(user.updated_at);

        self.bounded("create", query.fetch_one(&self.db)).await
    }

    async fn delete(&self, id: Uuid) -> AuthResult<()> {
        self.bounded(
            "delete",
            sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn list(&self, filter: &UserFilter) -> AuthResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::user_role IS NULL OR role = $1)
              AND ($2::account_status IS NULL OR status = $2)
              AND (NOT $3 OR role <> 'super_admin')
            ORDER BY created_at DESC
            "#
        );
        self.bounded(
            "list",
            sqlx::query_as::<_, User>(&sql)
                .bind(filter.role)
                .bind(filter.status)
                .bind(filter.exclude_super_admin)
                .fetch_all(&self.db),
        )
        .await
    }
}

/// Process-local store for tests and local tooling.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update(&self, user: &User, expected_updated_at: OffsetDateTime) -> AuthResult<()> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.id) {
            Some(stored) if stored.updated_at == expected_updated_at => {
                *stored = user.clone();
                Ok(())
            }
            _ => Err(stale_write()),
        }
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: OffsetDateTime,
    ) -> AuthResult<User> {
        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("User not found"))?;
        lifecycle::record_failed_attempt(stored, policy, now);
        Ok(stored.clone())
    }

    async fn clear_failed_logins(&self, id: Uuid, now: OffsetDateTime) -> AuthResult<User> {
        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found("User not found"))?;
        lifecycle::record_success(stored, now);
        Ok(stored.clone())
    }

    async fn create(&self, user: User) -> AuthResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::Conflict("User with that email already exists".into()));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> AuthResult<()> {
        self.users.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self, filter: &UserFilter) -> AuthResult<Vec<User>> {
        let users = self.users.read().await;
        let mut out: Vec<User> = users.values().filter(|u| filter.matches(u)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
