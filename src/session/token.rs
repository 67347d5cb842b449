//! Session token issuance and parsing.
//!
//! Tokens have the shape `ralph-YYYYMMDD-HHMMSS-<32 hex chars>` (128 bits of
//! randomness) and are embedded in every prompt sent to the agent and echoed
//! back in its completion signal, so a stale or replayed signal from a prior
//! run can never be mistaken for a live one.

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(String);

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ralph-\d{8}-\d{6}-[0-9a-f]{32}$").unwrap())
}

impl SessionToken {
    /// Mint a fresh token stamped with the current UTC time.
    pub fn generate() -> Self {
        let now = Utc::now();
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("ralph-{}-{hex}", now.format("%Y%m%d-%H%M%S")))
    }

    /// Parse and validate a token's shape. Does not check freshness — that's
    /// the session store's job, comparing against the active session.
    pub fn parse(s: &str) -> Option<Self> {
        if token_regex().is_match(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
