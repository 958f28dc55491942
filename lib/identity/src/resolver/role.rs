//! Effective-role resolution.

use crate::backend::IdentityDirectory;
use crate::config::IdentityConfig;
use crate::retry::{Attempt, BoundedRetry};
use crate::role::EffectiveRole;
use crate::session::Claim;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Fetches role bindings and reduces them to one effective role.
#[derive(Clone)]
pub struct RoleResolver {
    directory: Arc<dyn IdentityDirectory>,
    retry: BoundedRetry,
    config: Arc<IdentityConfig>,
}

impl RoleResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn IdentityDirectory>, config: Arc<IdentityConfig>) -> Self {
        Self {
            directory,
            retry: config.role_retry(),
            config,
        }
    }

    /// Returns the default role for a member with no usable bindings.
    #[must_use]
    pub fn default_for(&self, claim: &Claim) -> EffectiveRole {
        EffectiveRole::default_for(self.config.is_bootstrap_email(&claim.email))
    }

    /// Resolves the effective role of `claim`.
    ///
    /// A failed or timed-out lookup falls through to the same default as an
    /// empty binding list.
    #[instrument(skip(self, claim), fields(user_id = %claim.user_id))]
    pub async fn resolve(&self, claim: &Claim) -> EffectiveRole {
        let directory = self.directory.as_ref();
        let user_id = claim.user_id;

        let bindings = match self
            .retry
            .run(
                move || directory.fetch_role_bindings(user_id),
                |_| Attempt::Terminal,
            )
            .await
        {
            Ok(bindings) => bindings,
            Err(error) => {
                warn!(error = %error, "role lookup failed, applying default role");
                return self.default_for(claim);
            }
        };

        match EffectiveRole::from_bindings(&bindings) {
            Some(effective) => {
                debug!(
                    role = %effective.role,
                    bindings = bindings.len(),
                    "effective role reduced"
                );
                effective
            }
            None => {
                let effective = self.default_for(claim);
                debug!(role = %effective.role, "no role bindings, applying default role");
                effective
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::memory::{Fault, InMemoryBackend, Operation};
    use crate::role::{Role, RoleBinding, RoleSource};
    use ensemble_core::{OrganizationId, UserId};
    use std::time::Duration;

    const SEED: &str = "seed@example.com";

    fn resolver(backend: &InMemoryBackend) -> RoleResolver {
        let config = IdentityConfig::default().with_bootstrap_admin_email(SEED);
        RoleResolver::new(Arc::new(backend.clone()), Arc::new(config))
    }

    #[tokio::test]
    async fn member_and_admin_reduce_to_admin() {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), "ana@example.com");
        let org = OrganizationId::new();
        backend.grant(RoleBinding::scoped(claim.user_id, org, Role::Member));
        backend.grant(RoleBinding::scoped(claim.user_id, org, Role::Admin));

        let effective = resolver(&backend).resolve(&claim).await;

        assert_eq!(effective.role, Role::Admin);
        assert_eq!(effective.organization_id, Some(org));
        assert_eq!(effective.source, RoleSource::Bindings);
    }

    #[tokio::test]
    async fn bootstrap_email_without_bindings_is_global_owner() {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), SEED);

        let effective = resolver(&backend).resolve(&claim).await;

        assert_eq!(effective, EffectiveRole::bootstrap());
        assert!(!effective.requires_organization());
    }

    #[tokio::test]
    async fn bootstrap_email_with_bindings_uses_bindings() {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), SEED);
        let org = OrganizationId::new();
        backend.grant(RoleBinding::scoped(claim.user_id, org, Role::Leader));

        let effective = resolver(&backend).resolve(&claim).await;

        assert_eq!(effective.role, Role::Leader);
        assert_eq!(effective.source, RoleSource::Bindings);
    }

    #[tokio::test]
    async fn other_email_without_bindings_is_member() {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), "ana@example.com");

        let effective = resolver(&backend).resolve(&claim).await;

        assert_eq!(effective, EffectiveRole::member());
    }

    #[tokio::test]
    async fn lookup_error_falls_back_to_default() {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), "ana@example.com");
        backend.grant(RoleBinding::global(claim.user_id, Role::Admin));
        backend.inject(
            Operation::FetchRoleBindings,
            Fault::Fail(BackendError::Malformed {
                reason: "unexpected payload".to_string(),
            }),
        );

        let effective = resolver(&backend).resolve(&claim).await;

        assert_eq!(effective, EffectiveRole::member());
        assert_eq!(backend.calls(Operation::FetchRoleBindings), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_lookup_falls_back_after_ceiling() {
        let backend = InMemoryBackend::new();
        let claim = Claim::new(UserId::new(), SEED);
        backend.inject(Operation::FetchRoleBindings, Fault::Stall);
        let start = tokio::time::Instant::now();

        let effective = resolver(&backend).resolve(&claim).await;

        assert_eq!(effective, EffectiveRole::bootstrap());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3_100));
    }
}
