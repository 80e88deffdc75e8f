use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Login and password rules, fixed for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPolicy {
    pub min_password_length: usize,
    pub lockout_threshold: u32,
    pub lockout_duration_minutes: i64,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            min_password_length: 8,
            lockout_threshold: 5,
            lockout_duration_minutes: 60,
        }
    }
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        // argon2 crate defaults (19 MiB, t=2, p=1)
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuperAdminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub policy: AuthPolicy,
    pub hashing: HashingConfig,
    pub super_admin: Option<SuperAdminSeed>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "agromate".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "agromate-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 30),
        };
        anyhow::ensure!(!jwt.secret.is_empty(), "JWT_SECRET must not be empty");
        anyhow::ensure!(jwt.ttl_minutes > 0, "JWT_TTL_MINUTES must be positive");

        let defaults = AuthPolicy::default();
        let policy = AuthPolicy {
            min_password_length: env_or("MIN_PASSWORD_LENGTH", defaults.min_password_length),
            lockout_threshold: env_or("LOCKOUT_THRESHOLD", defaults.lockout_threshold),
            lockout_duration_minutes: env_or(
                "LOCKOUT_DURATION_MINUTES",
                defaults.lockout_duration_minutes,
            ),
        };
        anyhow::ensure!(policy.lockout_threshold > 0, "LOCKOUT_THRESHOLD must be positive");

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_or("ARGON2_PARALLELISM", defaults.parallelism),
        };

        let super_admin = match (
            std::env::var("SUPER_ADMIN_EMAIL"),
            std::env::var("SUPER_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some(SuperAdminSeed { email, password }),
            _ => None,
        };

        Ok(Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            database_timeout_secs: env_or("DATABASE_TIMEOUT_SECS", 5),
            jwt,
            policy,
            hashing,
            super_admin,
        })
    }
}
