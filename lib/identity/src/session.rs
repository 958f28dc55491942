//! Sessions, identity claims and session-change events.
//!
//! A session is issued by the identity collaborator on a successful
//! credential exchange or token refresh. This crate only reads sessions;
//! the Session Store is their sole owner.

use chrono::{DateTime, Utc};
use ensemble_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque access token carried by a session.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// The minimal identity assertion carried by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Stable id, shared with the durable profile.
    pub user_id: UserId,
    /// Email the member signed in with.
    pub email: String,
    /// Display-name hint from registration metadata.
    pub name_hint: Option<String>,
    /// Avatar URL hint from registration metadata.
    pub avatar_hint: Option<String>,
}

impl Claim {
    /// Creates a claim without hints.
    #[must_use]
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name_hint: None,
            avatar_hint: None,
        }
    }

    /// Sets the display-name hint.
    #[must_use]
    pub fn with_name_hint(mut self, name: Option<String>) -> Self {
        self.name_hint = name;
        self
    }

    /// Sets the avatar hint.
    #[must_use]
    pub fn with_avatar_hint(mut self, avatar: Option<String>) -> Self {
        self.avatar_hint = avatar;
        self
    }

    /// Returns the part of the email before `@`, if it is non-empty.
    #[must_use]
    pub fn email_local_part(&self) -> Option<&str> {
        let local = self.email.split('@').next().unwrap_or_default().trim();
        (!local.is_empty()).then_some(local)
    }
}

/// An authenticated session: opaque token plus identity claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    token: SessionToken,
    claim: Claim,
    issued_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session issued now.
    #[must_use]
    pub fn new(token: SessionToken, claim: Claim) -> Self {
        Self {
            token,
            claim,
            issued_at: Utc::now(),
        }
    }

    /// Returns the access token.
    #[must_use]
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Returns the identity claim.
    #[must_use]
    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    /// Returns the subject's stable id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.claim.user_id
    }

    /// Returns when the token was issued.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Discrete change reported by the Session Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A credential exchange produced a new session.
    SignedIn(Session),
    /// The token was refreshed; the identity behind it is unchanged.
    TokenRefreshed(Session),
    /// The member signed out or the token was invalidated.
    SignedOut,
    /// The store has no session to report.
    NoSession,
}

impl SessionEvent {
    /// Returns the session carried by the event, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) => Some(session),
            Self::SignedOut | Self::NoSession => None,
        }
    }

    /// Returns the event name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "SIGNED_IN",
            Self::TokenRefreshed(_) => "TOKEN_REFRESHED",
            Self::SignedOut => "SIGNED_OUT",
            Self::NoSession => "NO_SESSION",
        }
    }
}
