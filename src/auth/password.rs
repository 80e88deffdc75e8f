use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::config::HashingConfig;
use crate::error::{AuthError, AuthResult};

/// Argon2id hasher with process-wide cost parameters.
#[derive(Clone)]
pub struct Hasher {
    argon2: Argon2<'static>,
}

impl Hasher {
    pub fn new(cfg: &HashingConfig) -> AuthResult<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| AuthError::Hashing(format!("invalid argon2 params: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash_password(&self, plain: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                AuthError::Hashing(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// `Ok(false)` on mismatch; errors only when `hash` is not a PHC string.
    pub fn verify_password(&self, plain: &str, hash: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            AuthError::Hashing(e.to_string())
        })?;
        Ok(self
            .argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash_blocking(&self, plain: String) -> AuthResult<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_password(&plain))
            .await
            .map_err(|e| AuthError::Hashing(format!("hash task failed: {e}")))?
    }

    pub async fn verify_blocking(&self, plain: String, hash: String) -> AuthResult<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_password(&plain, &hash))
            .await
            .map_err(|e| AuthError::Hashing(format!("verify task failed: {e}")))?
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> Hasher {
    Hasher::new(&HashingConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("test params are valid")
}
