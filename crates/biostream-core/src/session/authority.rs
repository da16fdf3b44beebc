//! Session authority: password check, token minting, validation, revocation

use super::display_id;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on token lifetime (10 years)
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Authentication failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid password")]
    InvalidCredentials,

    #[error("Unknown session token")]
    UnknownToken,

    #[error("Session token has expired")]
    ExpiredToken,
}

/// Bearer token handed to a caller after login
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Public view of an active session; never carries the full token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    /// First 8 characters of the token followed by "..."
    pub id: String,
    pub issued_at: DateTime<Utc>,
    pub age_secs: f64,
    pub remaining_secs: f64,
}

#[derive(Debug, Clone)]
struct TokenRecord {
    issued_at: Instant,
    expires_at: Instant,
    issued_wall: DateTime<Utc>,
}

impl TokenRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Mints and tracks bearer tokens for a single shared password
///
/// Only the SHA-256 digest of the password is kept.
pub struct SessionAuthority {
    password_digest: [u8; 32],
    ttl: Duration,
    tokens: HashMap<String, TokenRecord>,
}

impl SessionAuthority {
    pub fn new(password: &str, ttl: Duration) -> Self {
        Self {
            password_digest: digest(password),
            ttl: ttl.min(MAX_TTL),
            tokens: HashMap::new(),
        }
    }

    /// Token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Exchange the password for a fresh token
    pub fn authenticate(&mut self, password: &str) -> Result<Token, AuthError> {
        self.authenticate_at(password, Instant::now())
    }

    pub fn authenticate_at(&mut self, password: &str, now: Instant) -> Result<Token, AuthError> {
        if !constant_time_eq(&digest(password), &self.password_digest) {
            tracing::warn!("auth_rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let value = generate_session_token();
        let issued_wall = Utc::now();
        let expires_wall = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| issued_wall.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.tokens.insert(
            value.clone(),
            TokenRecord {
                issued_at: now,
                expires_at: now + self.ttl,
                issued_wall,
            },
        );

        tracing::info!(
            token = %display_id(&value),
            active = self.tokens.len(),
            "session_created"
        );

        Ok(Token {
            value,
            issued_at: issued_wall,
            expires_at: expires_wall,
        })
    }

    /// Check a token, deleting it if it has expired
    pub fn check_token(&mut self, token: &str) -> Result<(), AuthError> {
        self.check_token_at(token, Instant::now())
    }

    pub fn check_token_at(&mut self, token: &str, now: Instant) -> Result<(), AuthError> {
        let record = self.tokens.get(token).ok_or(AuthError::UnknownToken)?;
        if record.is_expired(now) {
            self.tokens.remove(token);
            tracing::info!(token = %display_id(token), "session_expired");
            return Err(AuthError::ExpiredToken);
        }
        Ok(())
    }

    /// True if the token is known and unexpired
    pub fn validate_token(&mut self, token: &str) -> bool {
        self.check_token(token).is_ok()
    }

    pub fn validate_token_at(&mut self, token: &str, now: Instant) -> bool {
        self.check_token_at(token, now).is_ok()
    }

    /// Forget a token; returns whether it existed
    pub fn revoke_token(&mut self, token: &str) -> bool {
        let removed = self.tokens.remove(token).is_some();
        if removed {
            tracing::info!(token = %display_id(token), "session_revoked");
        }
        removed
    }

    /// Drop all expired tokens; returns how many were removed
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| !record.is_expired(now));
        let purged = before - self.tokens.len();
        if purged > 0 {
            tracing::debug!(purged, "sessions_purged");
        }
        purged
    }

    /// Unexpired sessions, after purging expired ones
    pub fn list_active_sessions(&mut self) -> Vec<SessionInfo> {
        self.list_active_sessions_at(Instant::now())
    }

    pub fn list_active_sessions_at(&mut self, now: Instant) -> Vec<SessionInfo> {
        self.purge_expired_at(now);
        let mut sessions: Vec<SessionInfo> = self
            .tokens
            .iter()
            .map(|(token, record)| SessionInfo {
                id: display_id(token),
                issued_at: record.issued_wall,
                age_secs: now.saturating_duration_since(record.issued_at).as_secs_f64(),
                remaining_secs: record.expires_at.saturating_duration_since(now).as_secs_f64(),
            })
            .collect();
        sessions.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        sessions
    }

    /// Number of stored tokens (expired ones included until purged)
    pub fn active_count(&self) -> usize {
        self.tokens.len()
    }
}

impl std::fmt::Debug for SessionAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthority")
            .field("ttl", &self.ttl)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

fn digest(password: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(Sha256::digest(password.as_bytes()).as_slice());
    out
}

/// 32 random bytes, URL-safe base64 without padding
fn generate_session_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(ttl_secs: u64) -> SessionAuthority {
        SessionAuthority::new("hunter2", Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_wrong_password_rejected() {
        let mut auth = authority(60);
        assert_eq!(
            auth.authenticate("nope"),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(auth.active_count(), 0);
    }

    #[test]
    fn test_token_shape() {
        let mut auth = authority(60);
        let token = auth.authenticate("hunter2").unwrap();
        // 32 bytes -> 43 chars of unpadded base64
        assert_eq!(token.value.len(), 43);
        assert!(!token.value.contains('='));
        assert!(!token.value.contains('+') && !token.value.contains('/'));
        assert!(token.expires_at > token.issued_at);
    }

    #[test]
    fn test_tokens_coexist_and_differ() {
        let mut auth = authority(60);
        let a = auth.authenticate("hunter2").unwrap();
        let b = auth.authenticate("hunter2").unwrap();
        assert_ne!(a.value, b.value);
        assert!(auth.validate_token(&a.value));
        assert!(auth.validate_token(&b.value));
    }

    #[test]
    fn test_expired_token_is_deleted() {
        let mut auth = authority(10);
        let t0 = Instant::now();
        let token = auth.authenticate_at("hunter2", t0).unwrap();

        assert!(auth.validate_token_at(&token.value, t0 + Duration::from_secs(9)));
        assert_eq!(
            auth.check_token_at(&token.value, t0 + Duration::from_secs(10)),
            Err(AuthError::ExpiredToken)
        );
        // Lazily deleted: now unknown
        assert_eq!(
            auth.check_token_at(&token.value, t0),
            Err(AuthError::UnknownToken)
        );
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let mut auth = authority(60);
        let token = auth.authenticate("hunter2").unwrap();
        assert!(auth.revoke_token(&token.value));
        assert!(!auth.revoke_token(&token.value));
        assert!(!auth.validate_token(&token.value));
    }

    #[test]
    fn test_purge_and_list() {
        let mut auth = authority(10);
        let t0 = Instant::now();
        let old = auth.authenticate_at("hunter2", t0).unwrap();
        let fresh = auth
            .authenticate_at("hunter2", t0 + Duration::from_secs(5))
            .unwrap();

        let sessions = auth.list_active_sessions_at(t0 + Duration::from_secs(12));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, format!("{}...", &fresh.value[..8]));
        assert!((sessions[0].age_secs - 7.0).abs() < 1e-9);
        assert!((sessions[0].remaining_secs - 3.0).abs() < 1e-9);
        assert!(!auth.validate_token_at(&old.value, t0 + Duration::from_secs(12)));

        assert_eq!(auth.purge_expired_at(t0 + Duration::from_secs(20)), 1);
        assert_eq!(auth.active_count(), 0);
    }

    #[test]
    fn test_unknown_token() {
        let mut auth = authority(60);
        assert_eq!(auth.check_token("abc"), Err(AuthError::UnknownToken));
    }

    #[test]
    fn test_display_id_truncates() {
        assert_eq!(display_id("abcdefghijkl"), "abcdefgh...");
        assert_eq!(display_id("abc"), "abc...");
    }
}
