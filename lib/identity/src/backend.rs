//! Interfaces consumed from the hosted identity and database service.
//!
//! The service is opaque: these traits describe only what identity
//! resolution needs from it. Splitting session handling from directory
//! lookups lets either side be replaced in tests.

use crate::error::BackendError;
use crate::organization::Organization;
use crate::profile::{ExperienceLevel, Profile, ProfileUpdate};
use crate::role::RoleBinding;
use crate::session::{Session, SessionEvent};
use async_trait::async_trait;
use ensemble_core::{OrganizationId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Fields submitted when creating an account.
#[derive(Clone, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub experience_level: ExperienceLevel,
}

impl Registration {
    /// Creates a registration with the required fields.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            display_name: display_name.into(),
            phone: None,
            experience_level: ExperienceLevel::default(),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("password", &"..")
            .field("display_name", &self.display_name)
            .field("phone", &self.phone)
            .field("experience_level", &self.experience_level)
            .finish()
    }
}

/// Source of the current authentication session and its change events.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the current session, if any.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Subscribes to session-change events.
    ///
    /// Only events sent after the call are received.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Exchanges credentials for a session.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    /// Creates an account and signs it in.
    async fn sign_up(&self, registration: Registration) -> Result<Session, BackendError>;

    /// Ends the current session.
    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Profile, role and organization records.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Fetches a profile; `BackendError::NotFound` if the row does not exist.
    async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, BackendError>;

    /// Fetches every role binding of a member.
    async fn fetch_role_bindings(&self, user_id: UserId)
    -> Result<Vec<RoleBinding>, BackendError>;

    /// Fetches an organization together with its sub-units and categories.
    async fn fetch_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Organization, BackendError>;

    /// Writes a partial profile update.
    async fn update_profile(
        &self,
        user_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_debug_hides_password() {
        let registration = Registration::new("ana@example.com", "hunter2", "Ana");
        let debug = format!("{registration:?}");
        assert!(debug.contains("ana@example.com"));
        assert!(!debug.contains("hunter2"));
    }
}
