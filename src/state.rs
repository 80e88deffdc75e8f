use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::auth::jwt::JwtKeys;
use crate::auth::lifecycle::LockoutPolicy;
use crate::auth::password::Hasher;
use crate::auth::repo::{MemoryUserStore, PgUserStore, UserStore};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub keys: JwtKeys,
    pub hasher: Hasher,
}

impl AppState {
    /// Connects the store named by `DATABASE_URL`. `memory://` runs without a
    /// database; anything else is a PostgreSQL URL and its pool is returned
    /// for migrations.
    pub async fn init() -> anyhow::Result<(Self, Option<sqlx::PgPool>)> {
        let config = Arc::new(AppConfig::from_env()?);

        if config.database_url.starts_with("memory://") {
            tracing::warn!("using in-memory user store; data is lost on exit");
            let users = Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>;
            return Ok((Self::from_parts(config, users)?, None));
        }

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_timeout_secs))
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserStore::new(
            db.clone(),
            Duration::from_secs(config.database_timeout_secs),
        )) as Arc<dyn UserStore>;

        Ok((Self::from_parts(config, users)?, Some(db)))
    }

    pub fn from_parts(config: Arc<AppConfig>, users: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        let keys = JwtKeys::from_config(&config.jwt);
        let hasher = Hasher::new(&config.hashing).context("build password hasher")?;
        Ok(Self {
            config,
            users,
            keys,
            hasher,
        })
    }

    pub fn lockout(&self) -> LockoutPolicy {
        LockoutPolicy::from(&self.config.policy)
    }

    /// In-memory state with cheap hashing.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{AuthPolicy, HashingConfig, JwtConfig};

        let config = Arc::new(AppConfig {
            database_url: "memory://".into(),
            database_max_connections: 1,
            database_timeout_secs: 1,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            policy: AuthPolicy::default(),
            hashing: HashingConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            super_admin: None,
        });
        let users = Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>;
        Self::from_parts(config, users).expect("fake state builds")
    }
}
