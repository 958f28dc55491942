//! In-process identity backend.
//!
//! `InMemoryBackend` implements both [`SessionStore`] and
//! [`IdentityDirectory`] over plain maps. It is meant for local development
//! and tests: faults can be injected per operation and every call is
//! counted.

use crate::backend::{IdentityDirectory, Registration, SessionStore};
use crate::error::BackendError;
use crate::organization::Organization;
use crate::profile::{Profile, ProfileUpdate};
use crate::role::RoleBinding;
use crate::session::{Claim, Session, SessionEvent, SessionToken};
use async_trait::async_trait;
use ensemble_core::{OrganizationId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;

const EVENT_CAPACITY: usize = 64;

/// A backend operation, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSession,
    SignIn,
    SignUp,
    SignOut,
    FetchProfile,
    FetchRoleBindings,
    FetchOrganization,
    UpdateProfile,
}

/// Misbehavior applied to every call of an operation until cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The call never completes.
    Stall,
    /// The call fails with this error.
    Fail(BackendError),
    /// The call completes normally after this delay.
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct Account {
    user_id: UserId,
    password: String,
    name_hint: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by lowercase email.
    accounts: HashMap<String, Account>,
    current: Option<Session>,
    profiles: HashMap<UserId, Profile>,
    bindings: Vec<RoleBinding>,
    organizations: HashMap<OrganizationId, Organization>,
    faults: HashMap<Operation, Fault>,
    calls: HashMap<Operation, u32>,
    withheld_profile_misses: u32,
}

/// Cloneable in-memory identity service; clones share state.
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an account without a profile row and returns its id.
    pub fn add_account(
        &self,
        email: &str,
        password: &str,
        name_hint: Option<&str>,
    ) -> UserId {
        let user_id = UserId::new();
        self.state().accounts.insert(
            email.to_lowercase(),
            Account {
                user_id,
                password: password.to_string(),
                name_hint: name_hint.map(str::to_string),
            },
        );
        user_id
    }

    /// Stores (or replaces) a profile row.
    pub fn insert_profile(&self, profile: Profile) {
        self.state().profiles.insert(profile.id, profile);
    }

    /// Returns the stored profile row.
    #[must_use]
    pub fn profile(&self, user_id: UserId) -> Option<Profile> {
        self.state().profiles.get(&user_id).cloned()
    }

    /// Adds a role binding.
    pub fn grant(&self, binding: RoleBinding) {
        self.state().bindings.push(binding);
    }

    /// Stores (or replaces) an organization.
    pub fn insert_organization(&self, organization: Organization) {
        self.state()
            .organizations
            .insert(organization.id, organization);
    }

    /// Makes the next `misses` profile fetches report not-found, as if the
    /// profile row had not been created yet.
    pub fn withhold_profile(&self, misses: u32) {
        self.state().withheld_profile_misses = misses;
    }

    /// Applies `fault` to every call of `operation`.
    pub fn inject(&self, operation: Operation, fault: Fault) {
        self.state().faults.insert(operation, fault);
    }

    /// Removes the fault on `operation`.
    pub fn clear_fault(&self, operation: Operation) {
        self.state().faults.remove(&operation);
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn calls(&self, operation: Operation) -> u32 {
        self.state().calls.get(&operation).copied().unwrap_or_default()
    }

    /// The session currently held by the store.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.state().current.clone()
    }

    /// Issues a new token for the current session and emits
    /// `TokenRefreshed`.
    pub fn refresh_session(&self) -> Option<Session> {
        let refreshed = {
            let mut state = self.state();
            let claim = state.current.as_ref()?.claim().clone();
            let session = Session::new(new_token(), claim);
            state.current = Some(session.clone());
            session
        };
        self.emit(SessionEvent::TokenRefreshed(refreshed.clone()));
        Some(refreshed)
    }

    /// Sends an arbitrary event to subscribers.
    pub fn emit(&self, event: SessionEvent) {
        debug!(event = event.kind(), "emitting session event");
        // No subscribers is not an error for the store.
        let _ = self.events.send(event);
    }

    async fn enter(&self, operation: Operation) -> Result<(), BackendError> {
        let fault = {
            let mut state = self.state();
            *state.calls.entry(operation).or_default() += 1;
            state.faults.get(&operation).cloned()
        };

        match fault {
            None => Ok(()),
            Some(Fault::Stall) => std::future::pending().await,
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn open_session(&self, account: &Account, email: &str) -> Session {
        let claim = Claim::new(account.user_id, email).with_name_hint(account.name_hint.clone());
        let session = Session::new(new_token(), claim);
        self.state().current = Some(session.clone());
        self.emit(SessionEvent::SignedIn(session.clone()));
        session
    }
}

fn new_token() -> SessionToken {
    SessionToken::new(format!("tok_{}", Ulid::new()))
}

#[async_trait]
impl SessionStore for InMemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.enter(Operation::GetSession).await?;
        Ok(self.current_session())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.enter(Operation::SignIn).await?;
        let account = self
            .state()
            .accounts
            .get(&email.to_lowercase())
            .filter(|account| account.password == password)
            .cloned()
            .ok_or_else(|| BackendError::Rejected {
                reason: "Invalid login credentials".to_string(),
            })?;
        Ok(self.open_session(&account, email))
    }

    async fn sign_up(&self, registration: Registration) -> Result<Session, BackendError> {
        self.enter(Operation::SignUp).await?;
        let account = {
            let mut state = self.state();
            let key = registration.email.to_lowercase();
            if state.accounts.contains_key(&key) {
                return Err(BackendError::Rejected {
                    reason: "User already registered".to_string(),
                });
            }
            let account = Account {
                user_id: UserId::new(),
                password: registration.password.clone(),
                name_hint: Some(registration.display_name.clone()),
            };
            state.accounts.insert(key, account.clone());

            let mut profile = Profile::new(
                account.user_id,
                registration.display_name.clone(),
                registration.email.clone(),
            );
            profile.phone.clone_from(&registration.phone);
            profile.experience_level = registration.experience_level;
            state.profiles.insert(account.user_id, profile);
            account
        };
        Ok(self.open_session(&account, &registration.email))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.enter(Operation::SignOut).await?;
        self.state().current = None;
        self.emit(SessionEvent::SignedOut);
        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryBackend {
    async fn fetch_profile(&self, user_id: UserId) -> Result<Profile, BackendError> {
        self.enter(Operation::FetchProfile).await?;
        let mut state = self.state();
        if state.withheld_profile_misses > 0 {
            state.withheld_profile_misses -= 1;
            return Err(profile_not_found(user_id));
        }
        state
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| profile_not_found(user_id))
    }

    async fn fetch_role_bindings(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RoleBinding>, BackendError> {
        self.enter(Operation::FetchRoleBindings).await?;
        Ok(self
            .state()
            .bindings
            .iter()
            .filter(|binding| binding.subject == user_id)
            .cloned()
            .collect())
    }

    async fn fetch_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Organization, BackendError> {
        self.enter(Operation::FetchOrganization).await?;
        self.state()
            .organizations
            .get(&organization_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                resource: format!("organization {organization_id}"),
            })
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<(), BackendError> {
        self.enter(Operation::UpdateProfile).await?;
        let mut state = self.state();
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| profile_not_found(user_id))?;
        *profile = profile.apply(update);
        Ok(())
    }
}

fn profile_not_found(user_id: UserId) -> BackendError {
    BackendError::NotFound {
        resource: format!("profile {user_id}"),
    }
}
