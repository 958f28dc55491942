//! Profile resolution with retry on transient absence.

use super::classify_absence;
use crate::backend::IdentityDirectory;
use crate::profile::Profile;
use crate::retry::{BoundedRetry, RetryError};
use crate::session::Claim;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of a profile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookup {
    Found(Profile),
    /// No usable profile: absent after every attempt, a hard collaborator
    /// error, or the ceiling elapsed.
    NotFound,
}

/// Fetches the durable profile behind a claim.
#[derive(Clone)]
pub struct ProfileResolver {
    directory: Arc<dyn IdentityDirectory>,
    retry: BoundedRetry,
}

impl ProfileResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn IdentityDirectory>, retry: BoundedRetry) -> Self {
        Self { directory, retry }
    }

    /// Looks up the profile, retrying while the row does not exist yet.
    ///
    /// Absence is an expected outcome (the registration trigger may lag), so
    /// every failure maps to [`ProfileLookup::NotFound`].
    #[instrument(skip(self, claim), fields(user_id = %claim.user_id))]
    pub async fn resolve(&self, claim: &Claim) -> ProfileLookup {
        let directory = self.directory.as_ref();
        let user_id = claim.user_id;

        match self
            .retry
            .run(move || directory.fetch_profile(user_id), classify_absence)
            .await
        {
            Ok(profile) => {
                debug!("profile found");
                ProfileLookup::Found(profile)
            }
            Err(RetryError::Exhausted { attempts, .. }) => {
                info!(attempts, "profile still missing after retries");
                ProfileLookup::NotFound
            }
            Err(error @ RetryError::TimedOut { .. }) => {
                warn!(error = %error, "profile lookup timed out");
                ProfileLookup::NotFound
            }
            Err(RetryError::Terminal { error, .. }) => {
                warn!(error = %error, "profile lookup failed");
                ProfileLookup::NotFound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::error::BackendError;
    use crate::memory::{Fault, InMemoryBackend, Operation};
    use ensemble_core::UserId;
    use std::time::Duration;

    fn resolver(backend: &InMemoryBackend) -> ProfileResolver {
        ProfileResolver::new(
            Arc::new(backend.clone()),
            IdentityConfig::default().profile_retry(),
        )
    }

    fn seeded() -> (InMemoryBackend, Claim) {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), "ana@example.com");
        backend.insert_profile(Profile::new(claim.user_id, "Ana", "ana@example.com"));
        (backend, claim)
    }

    #[tokio::test(start_paused = true)]
    async fn finds_existing_profile_on_first_attempt() {
        let (backend, claim) = seeded();

        let lookup = resolver(&backend).resolve(&claim).await;

        assert!(matches!(lookup, ProfileLookup::Found(p) if p.display_name == "Ana"));
        assert_eq!(backend.calls(Operation::FetchProfile), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_while_row_lags() {
        let (backend, claim) = seeded();
        backend.withhold_profile(1);
        let start = tokio::time::Instant::now();

        let lookup = resolver(&backend).resolve(&claim).await;

        assert!(matches!(lookup, ProfileLookup::Found(_)));
        assert_eq!(backend.calls(Operation::FetchProfile), 2);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_two_misses() {
        let (backend, claim) = seeded();
        backend.withhold_profile(5);

        let lookup = resolver(&backend).resolve(&claim).await;

        assert_eq!(lookup, ProfileLookup::NotFound);
        assert_eq!(backend.calls(Operation::FetchProfile), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_error_is_not_retried() {
        let (backend, claim) = seeded();
        backend.inject(
            Operation::FetchProfile,
            Fault::Fail(BackendError::Unavailable {
                reason: "connection reset".to_string(),
            }),
        );

        let lookup = resolver(&backend).resolve(&claim).await;

        assert_eq!(lookup, ProfileLookup::NotFound);
        assert_eq!(backend.calls(Operation::FetchProfile), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_lookup_ends_at_ceiling() {
        let (backend, claim) = seeded();
        backend.inject(Operation::FetchProfile, Fault::Stall);
        let start = tokio::time::Instant::now();

        let lookup = resolver(&backend).resolve(&claim).await;

        assert_eq!(lookup, ProfileLookup::NotFound);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(8));
        assert!(elapsed < Duration::from_millis(8_100));
    }
}
