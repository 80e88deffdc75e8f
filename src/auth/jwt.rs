use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};

use crate::auth::claims::{Claims, Identity, TokenKind};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::state::AppState;

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub(crate) fn sign_at(
        &self,
        identity: Identity,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> AuthResult<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: identity.id,
            role: identity.role,
            status: identity.status,
            pwd: identity.pwd_changed,
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        debug!(user_id = %identity.id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, identity: Identity) -> AuthResult<String> {
        self.sign_at(identity, TokenKind::Access, OffsetDateTime::now_utc())
    }

    pub fn sign_refresh(&self, identity: Identity) -> AuthResult<String> {
        self.sign_at(identity, TokenKind::Refresh, OffsetDateTime::now_utc())
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                other => {
                    warn!(error = ?other, "jwt rejected");
                    AuthError::InvalidToken
                }
            }
        })?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> AuthResult<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            warn!(user_id = %claims.sub, expected = ?kind, got = ?claims.kind, "wrong token kind");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}
