//! Identity assembly: turns session events into one published identity.
//!
//! The assembler owns the resolution state machine:
//!
//! ```text
//!            SignedIn / startup
//!   Idle ───────────────────────▶ Resolving ──▶ Resolved
//!    ▲                               │
//!    │         SignedOut             └────────▶ Fallback
//!    └──────────────────────── (from any phase)
//! ```
//!
//! Every cycle captures a generation number when it starts and may only
//! commit while that generation is still current. A trigger that arrives
//! while a cycle is in flight is dropped, and `SignedOut` bumps the
//! generation and aborts the in-flight task, so late completions never
//! overwrite newer state.
//!
//! Readers observe the result through a `tokio::sync::watch` channel of
//! [`IdentitySnapshot`]s.

use crate::backend::{IdentityDirectory, Registration, SessionStore};
use crate::config::{FallbackRefresh, IdentityConfig};
use crate::error::AccountError;
use crate::identity::{IdentityOrigin, ResolvedIdentity};
use crate::profile::ProfileUpdate;
use crate::resolver::{OrganizationResolver, ProfileLookup, ProfileResolver, RoleResolver};
use crate::retry::{Attempt, Stage};
use crate::session::{Claim, Session, SessionEvent};
use ensemble_core::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Where the assembler is in its resolution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No session.
    #[default]
    Idle,
    /// A cycle is in flight.
    Resolving,
    /// The last cycle produced a full identity.
    Resolved,
    /// The last cycle produced a fallback identity.
    Fallback,
}

impl Phase {
    fn after(identity: &ResolvedIdentity) -> Self {
        match identity.origin() {
            IdentityOrigin::Resolved => Self::Resolved,
            IdentityOrigin::Fallback => Self::Fallback,
        }
    }
}

/// What readers see: the phase, the generation that produced it and the
/// current identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySnapshot {
    /// Phase at the time of publishing.
    pub phase: Phase,
    /// Generation of the cycle (or sign-out) that published the snapshot.
    pub generation: u64,
    /// The identity readers should render, if any.
    pub identity: Option<Arc<ResolvedIdentity>>,
}

impl IdentitySnapshot {
    /// Returns true while a cycle is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Resolving
    }
}

#[derive(Default)]
struct Control {
    generation: u64,
    phase: Phase,
    session: Option<Session>,
    cycle: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn IdentityDirectory>,
    config: Arc<IdentityConfig>,
    profiles: ProfileResolver,
    roles: RoleResolver,
    organizations: OrganizationResolver,
    control: Mutex<Control>,
    snapshot: watch::Sender<IdentitySnapshot>,
}

/// Single writer of the current identity.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IdentityAssembler {
    inner: Arc<Inner>,
}

impl IdentityAssembler {
    /// Creates an idle assembler. Call [`start`](Self::start) to begin
    /// following the session store.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn IdentityDirectory>,
        config: IdentityConfig,
    ) -> Self {
        let config = Arc::new(config);
        let (snapshot, _) = watch::channel(IdentitySnapshot::default());

        Self {
            inner: Arc::new(Inner {
                profiles: ProfileResolver::new(Arc::clone(&directory), config.profile_retry()),
                roles: RoleResolver::new(Arc::clone(&directory), Arc::clone(&config)),
                organizations: OrganizationResolver::new(
                    Arc::clone(&directory),
                    config.organization_retry(),
                ),
                sessions,
                directory,
                config,
                control: Mutex::new(Control::default()),
                snapshot,
            }),
        }
    }

    /// Subscribes to session events and resolves the session that already
    /// exists, if any.
    ///
    /// The subscription is taken before the session is read so no event is
    /// lost in between. Startup counts as a cycle: the phase is `Resolving`
    /// until the initial session has been handled.
    pub fn start(&self) {
        let mut control = self.inner.control();
        if control.listener.is_some() {
            warn!("identity assembler already started");
            return;
        }

        let events = self.inner.sessions.subscribe();
        control.listener = Some(tokio::spawn(listen(Arc::downgrade(&self.inner), events)));
        self.inner.begin_cycle(&mut control, None);
        info!("identity assembler started");
    }

    /// Applies one session event to the state machine.
    pub fn handle_event(&self, event: SessionEvent) {
        self.inner.handle_event(event);
    }

    /// Returns the current identity, if any.
    #[must_use]
    pub fn current_identity(&self) -> Option<Arc<ResolvedIdentity>> {
        self.inner.snapshot.borrow().identity.clone()
    }

    /// Returns true while a cycle is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.snapshot.borrow().is_loading()
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.snapshot.borrow().phase
    }

    /// Returns a copy of the latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> IdentitySnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Returns the session the assembler is following, with the latest
    /// token seen for it.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.inner.control().session.clone()
    }

    /// Returns a receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<IdentitySnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Exchanges credentials for a session. The identity follows through the
    /// resulting `SignedIn` event.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::LoginFailed` if the session store refuses.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AccountError> {
        self.inner
            .sessions
            .sign_in(email, password)
            .await
            .map_err(|error| AccountError::LoginFailed {
                reason: error.reason(),
            })?;
        Ok(())
    }

    /// Creates an account and signs it in.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::RegistrationFailed` if the session store
    /// refuses.
    #[instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn register(&self, registration: Registration) -> Result<(), AccountError> {
        self.inner
            .sessions
            .sign_up(registration)
            .await
            .map_err(|error| AccountError::RegistrationFailed {
                reason: error.reason(),
            })?;
        Ok(())
    }

    /// Signs out. Local state is cleared even if the remote call fails.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::LogoutFailed` if the remote sign-out failed.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), AccountError> {
        let remote = self.inner.sessions.sign_out().await;
        self.inner.clear(&mut self.inner.control());

        remote.map_err(|error| {
            warn!(error = %error, "remote sign-out failed, local state cleared");
            AccountError::LogoutFailed {
                reason: error.reason(),
            }
        })?;
        Ok(())
    }

    /// Writes a partial profile update, then runs a full cycle and returns
    /// the identity it produced.
    ///
    /// The forced cycle supersedes any cycle already in flight.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::EmptyUpdate` for an update without fields,
    /// `AccountError::NotSignedIn` without a session (or if the member signs
    /// out before the cycle commits), and `AccountError::ProfileUpdateFailed`
    /// if the write fails.
    #[instrument(skip(self, update))]
    pub async fn update_user(
        &self,
        update: ProfileUpdate,
    ) -> Result<Arc<ResolvedIdentity>, AccountError> {
        if update.is_empty() {
            return Err(AccountError::EmptyUpdate.into());
        }

        let session = self
            .inner
            .control()
            .session
            .clone()
            .ok_or(AccountError::NotSignedIn)?;

        self.inner
            .directory
            .update_profile(session.user_id(), &update)
            .await
            .map_err(|error| AccountError::ProfileUpdateFailed {
                reason: error.reason(),
            })?;

        let generation = {
            let mut control = self.inner.control();
            let Some(current) = control.session.clone() else {
                return Err(AccountError::NotSignedIn.into());
            };
            self.inner.begin_cycle(&mut control, Some(current))
        };

        let mut snapshots = self.inner.snapshot.subscribe();
        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.generation >= generation && !snapshot.is_loading())
            .await
            .map_err(|_| AccountError::NotSignedIn)?
            .clone();

        Ok(snapshot.identity.ok_or(AccountError::NotSignedIn)?)
    }

    /// Stops following the session store and abandons any in-flight cycle.
    pub fn shutdown(&self) {
        let mut control = self.inner.control();
        if let Some(listener) = control.listener.take() {
            listener.abort();
        }
        self.inner.clear(&mut control);
        info!("identity assembler stopped");
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, control: &Control, identity: Option<Arc<ResolvedIdentity>>) {
        self.snapshot.send_replace(IdentitySnapshot {
            phase: control.phase,
            generation: control.generation,
            identity,
        });
    }

    fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        let mut control = self.control();
        let kind = event.kind();

        match (event, control.phase) {
            (SessionEvent::SignedOut | SessionEvent::NoSession, _) => self.clear(&mut control),
            (SessionEvent::TokenRefreshed(session), Phase::Resolving) => {
                if control
                    .session
                    .as_ref()
                    .is_some_and(|current| current.user_id() == session.user_id())
                {
                    control.session = Some(session);
                }
                debug!(
                    event = kind,
                    generation = control.generation,
                    "cycle in flight, keeping refreshed token only"
                );
            }
            (SessionEvent::SignedIn(_), Phase::Resolving) => {
                debug!(
                    event = kind,
                    generation = control.generation,
                    "cycle in flight, dropping trigger"
                );
            }
            (SessionEvent::SignedIn(session), _)
            | (SessionEvent::TokenRefreshed(session), Phase::Idle) => {
                self.begin_cycle(&mut control, Some(session));
            }
            (SessionEvent::TokenRefreshed(session), Phase::Resolved) => {
                debug!("token refreshed, identity unchanged");
                control.session = Some(session);
            }
            (SessionEvent::TokenRefreshed(session), Phase::Fallback) => {
                match self.config.refresh_in_fallback {
                    FallbackRefresh::Reresolve => {
                        debug!("token refreshed while in fallback, resolving again");
                        self.begin_cycle(&mut control, Some(session));
                    }
                    FallbackRefresh::Keep => {
                        control.session = Some(session);
                    }
                }
            }
        }
    }

    /// Starts a cycle and returns its generation. `None` resolves whatever
    /// session the store currently holds.
    fn begin_cycle(self: &Arc<Self>, control: &mut Control, session: Option<Session>) -> u64 {
        if let Some(cycle) = control.cycle.take() {
            cycle.abort();
        }
        control.generation += 1;
        control.phase = Phase::Resolving;

        // Keep showing the previous identity only while it belongs to the
        // same member.
        let previous = self
            .snapshot
            .borrow()
            .identity
            .clone()
            .filter(|identity| {
                session
                    .as_ref()
                    .is_some_and(|session| identity.user_id() == session.user_id())
            });
        if let Some(session) = &session {
            control.session = Some(session.clone());
        }
        self.publish(control, previous);

        let generation = control.generation;
        let inner = Arc::clone(self);
        control.cycle = Some(tokio::spawn(async move {
            inner.run_cycle(generation, session).await;
        }));

        debug!(generation, "resolution cycle started");
        generation
    }

    #[instrument(skip(self, session))]
    async fn run_cycle(&self, generation: u64, session: Option<Session>) {
        let session = match session {
            Some(session) => Some(session),
            None => self.initial_session().await,
        };
        let Some(session) = session else {
            self.commit_idle(generation);
            return;
        };

        let identity = self.resolve(session.claim()).await;
        self.commit(generation, session, identity);
    }

    async fn initial_session(&self) -> Option<Session> {
        let sessions = self.sessions.as_ref();
        match self
            .config
            .session_retry()
            .run(move || sessions.get_session(), |_| Attempt::Terminal)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                warn!(error = %error, "could not read the initial session, treating as signed out");
                None
            }
        }
    }

    /// Resolves profile and role concurrently, then the organization when
    /// the role needs one. Never fails: every shortfall becomes a fallback.
    ///
    /// One deadline covers the cycle. If it passes before profile and role
    /// are both known, the identity is built from the claim alone. If it
    /// passes during the organization lookup, the identity is committed
    /// without organization details.
    async fn resolve(&self, claim: &Claim) -> ResolvedIdentity {
        let deadline = Instant::now() + self.config.cycle_timeout();

        let joined = tokio::time::timeout_at(deadline, async {
            tokio::join!(self.profiles.resolve(claim), self.roles.resolve(claim))
        })
        .await;
        let Ok((lookup, role)) = joined else {
            warn!(
                stage = %Stage::Cycle,
                timeout_ms = self.config.cycle_timeout_ms,
                "resolution cycle timed out, using fallback identity"
            );
            return ResolvedIdentity::fallback(claim, self.roles.default_for(claim));
        };

        let profile = match lookup {
            ProfileLookup::Found(profile) => profile,
            ProfileLookup::NotFound => return ResolvedIdentity::fallback(claim, role),
        };

        let organization = match role.organization_id {
            Some(organization_id) if role.requires_organization() => {
                tokio::time::timeout_at(deadline, self.organizations.resolve(organization_id))
                    .await
                    .unwrap_or_else(|_| {
                        warn!(
                            stage = %Stage::Cycle,
                            %organization_id,
                            "cycle deadline reached during organization lookup"
                        );
                        None
                    })
            }
            _ => None,
        };
        ResolvedIdentity::resolved(claim, profile, role, organization)
    }

    fn commit(&self, generation: u64, session: Session, identity: ResolvedIdentity) {
        let mut control = self.control();
        if control.generation != generation || control.phase != Phase::Resolving {
            debug!(
                generation,
                current = control.generation,
                "discarding stale resolution result"
            );
            return;
        }

        control.phase = Phase::after(&identity);
        // A token refreshed mid-cycle is newer than the one the cycle began with.
        if !control
            .session
            .as_ref()
            .is_some_and(|current| current.user_id() == session.user_id())
        {
            control.session = Some(session);
        }
        control.cycle = None;
        info!(
            generation,
            phase = ?control.phase,
            role = %identity.role(),
            "identity committed"
        );
        self.publish(&control, Some(Arc::new(identity)));
    }

    fn commit_idle(&self, generation: u64) {
        let mut control = self.control();
        if control.generation != generation || control.phase != Phase::Resolving {
            return;
        }
        control.phase = Phase::Idle;
        control.session = None;
        control.cycle = None;
        debug!(generation, "no session");
        self.publish(&control, None);
    }

    fn clear(&self, control: &mut Control) {
        if let Some(cycle) = control.cycle.take() {
            cycle.abort();
        }
        control.generation += 1;
        control.phase = Phase::Idle;
        control.session = None;
        self.publish(control, None);
        debug!(generation = control.generation, "identity cleared");
    }
}

async fn listen(inner: Weak<Inner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                debug!(event = event.kind(), "session event received");
                inner.handle_event(event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session events lagged");
            }
            Err(RecvError::Closed) => {
                debug!("session event stream closed");
                break;
            }
        }
    }
}
