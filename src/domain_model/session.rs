use super::User;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token bundle issued by the auth backend.
///
/// Only the auth client reads the tokens. Everything else looks at presence of
/// a session and at its [`User`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    #[serde(default = "default_token_type")]
    pub(crate) token_type: String,
    pub(crate) expires_in: i64,
    #[serde(default)]
    pub(crate) expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
        user: User,
    ) -> Self {
        let expires_at = Utc::now().timestamp() + expires_in;
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
            expires_in,
            expires_at: Some(expires_at),
            user,
        }
    }

    /// Fills `expires_at` from `expires_in` when the backend omitted it.
    pub(crate) fn stamped(mut self, issued_at: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(issued_at.timestamp() + self.expires_in);
        }
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// True when the session expires within `margin` from `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at() {
            Some(at) => at - now <= margin,
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Notification emitted by the auth client whenever its session changes.
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

impl AuthStateChange {
    pub fn new(event: AuthChangeEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_model::UserId;

    fn user() -> User {
        User {
            id: UserId(uuid::Uuid::nil()),
            email: None,
            identities: vec![],
        }
    }

    #[test]
    fn debug_output_hides_tokens() {
        let session = Session::new("secret-access", "secret-refresh", 3600, user());
        let printed = format!("{:?}", session);
        assert!(!printed.contains("secret-access"));
        assert!(!printed.contains("secret-refresh"));
    }

    #[test]
    fn expiry_margin() {
        let session = Session::new("a", "r", 60, user());
        let now = Utc::now();
        assert!(session.expires_within(now, Duration::seconds(90)));
        assert!(!session.expires_within(now, Duration::seconds(10)));
    }

    #[test]
    fn token_response_without_expires_at_is_stamped() {
        let json = serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": uuid::Uuid::nil(), "email": "a@b.c" }
        });
        let issued_at = Utc.timestamp_opt(1_000, 0).unwrap();
        let session: Session = serde_json::from_value(json).unwrap();
        let session = session.stamped(issued_at);
        assert_eq!(session.expires_at, Some(4_600));
        assert_eq!(session.user.email.as_deref(), Some("a@b.c"));
    }
}
