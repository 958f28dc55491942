//! Organization resolution for organization-scoped roles.

use crate::backend::IdentityDirectory;
use crate::organization::Organization;
use crate::retry::{Attempt, BoundedRetry};
use ensemble_core::OrganizationId;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Loads organization details and sub-units.
#[derive(Clone)]
pub struct OrganizationResolver {
    directory: Arc<dyn IdentityDirectory>,
    retry: BoundedRetry,
}

impl OrganizationResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn IdentityDirectory>, retry: BoundedRetry) -> Self {
        Self { directory, retry }
    }

    /// Returns the organization, or `None` if it could not be loaded in time.
    #[instrument(skip(self), fields(organization_id = %organization_id))]
    pub async fn resolve(&self, organization_id: OrganizationId) -> Option<Organization> {
        let directory = self.directory.as_ref();

        match self
            .retry
            .run(
                move || directory.fetch_organization(organization_id),
                |_| Attempt::Terminal,
            )
            .await
        {
            Ok(organization) => {
                debug!(sub_units = organization.sub_units.len(), "organization loaded");
                Some(organization)
            }
            Err(error) => {
                warn!(error = %error, "organization lookup failed, continuing without it");
                None
            }
        }
    }
}
