//! Session identity resolution and cookie plumbing.

use chrono::{Duration as ChronoDuration, Utc};

use crate::domain::config::MAX_COOKIE_MAX_AGE_SECONDS;
use crate::domain::ids::SessionId;

/// Name of the cookie carrying the session identifier.
pub const SESSION_COOKIE: &str = "session_id";

/// Outcome of resolving an inbound identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    /// The session to use for this request.
    pub id: SessionId,
    /// Whether the id was just created and a cookie must be sent back.
    pub is_new: bool,
}

/// Issues and recognizes session identifiers.
#[derive(Debug, Clone)]
pub struct SessionResolver {
    cookie_max_age_seconds: i64,
}

impl Default for SessionResolver {
    fn default() -> Self {
        Self::new(60 * 60 * 24)
    }
}

impl SessionResolver {
    /// Create a resolver issuing cookies valid for `cookie_max_age_seconds`.
    #[must_use]
    pub const fn new(cookie_max_age_seconds: i64) -> Self {
        Self {
            cookie_max_age_seconds,
        }
    }

    /// Return the inbound token if well-formed, otherwise a fresh identifier.
    #[must_use]
    pub fn resolve(&self, token: Option<&str>) -> ResolvedSession {
        match token.and_then(|token| token.parse::<SessionId>().ok()) {
            Some(id) => ResolvedSession { id, is_new: false },
            None => ResolvedSession {
                id: SessionId::generate(),
                is_new: true,
            },
        }
    }

    /// `Set-Cookie` header value binding `id` to the browser.
    ///
    /// The lifetime is clamped to `0..=MAX_COOKIE_MAX_AGE_SECONDS`.
    #[must_use]
    pub fn issue_cookie(&self, id: &SessionId) -> String {
        let max_age = self.cookie_max_age_seconds.clamp(0, MAX_COOKIE_MAX_AGE_SECONDS);
        let expires = Utc::now() + ChronoDuration::seconds(max_age);
        format!(
            "{SESSION_COOKIE}={id}; Path=/; Expires={}; Max-Age={max_age}; HttpOnly; SameSite=Lax",
            expires.format("%a, %d %b %Y %H:%M:%S GMT"),
        )
    }
}

/// Extract the session token from a raw `Cookie` header value.
#[must_use]
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim_matches('"'))
}
