//! Password login and bearer-token sessions
//!
//! One shared password gates the whole service. A successful login mints an
//! opaque random token with a fixed lifetime; tokens expire lazily on
//! validation and are purged periodically by the coordinator.

pub mod authority;

pub use authority::{AuthError, SessionAuthority, SessionInfo, Token};

/// Truncated form of a token, safe to log or show
pub fn display_id(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}
