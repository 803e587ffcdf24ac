//! Password hashing, bearer sessions and the `CurrentUser` extractor
//!
//! Sessions are opaque 32-byte random tokens. Only the SHA-256 hex digest is
//! stored.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use grc_core::backlog::Actor;
use grc_core::{Policy, UserRole};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::error::ApiError;
use super::server::AppState;
use crate::db::repos::{SessionRepo, User};

const TOKEN_BYTES: usize = 32;
const SALT_BYTES: usize = 16;
pub const MIN_PASSWORD_LEN: usize = 8;

/// argon2id PHC string for a password.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let mut raw = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut raw);
    let salt = SaltString::encode_b64(&raw).map_err(|e| ApiError::internal(format!("salt: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::internal(format!("password hash: {}", e)))
}

/// False for a wrong password or an unparsable stored hash.
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a PHC string");
            false
        }
    }
}

/// New session token and the digest to store for it.
pub fn new_session_token() -> (String, String) {
    let mut raw = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    let token = hex::encode(raw);
    let digest = token_digest(&token);
    (token, digest)
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token_digest: String,
}

impl CurrentUser {
    /// Identity recorded in audit columns and compared against assignees.
    pub fn name(&self) -> &str {
        &self.user.email
    }

    pub fn role(&self) -> UserRole {
        self.user.role
    }

    pub fn actor(&self) -> Actor<'_> {
        Actor {
            user: self.name(),
            role: self.user.role,
        }
    }

    pub fn require(&self, policy: Policy) -> Result<(), ApiError> {
        if policy.allows(self.user.role) {
            Ok(())
        } else {
            tracing::debug!(user = %self.user.email, policy = policy.name(), "policy denied");
            Err(ApiError::forbidden(format!(
                "{} policy does not allow role {}",
                policy.name(),
                self.user.role
            )))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let digest = token_digest(token);
        let user = SessionRepo::new(&state.pool)
            .find_user(&digest)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        Ok(Self {
            user,
            token_digest: digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/findings");
        if let Some(h) = header {
            builder = builder.header(AUTHORIZATION, h);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "wrong horse"));
        assert!(!verify_password("not-a-hash", "correct horse"));
    }

    #[test]
    fn tokens_are_random_and_digested() {
        let (a, digest_a) = new_session_token();
        let (b, _) = new_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_eq!(digest_a, token_digest(&a));
        assert_eq!(digest_a.len(), 64);
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }
}
