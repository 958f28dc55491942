//! Per-stage resolvers used by the identity assembler.
//!
//! Each resolver wraps one directory lookup in a [`BoundedRetry`] and turns
//! every failure into a normal outcome (`NotFound`, a default role, no
//! organization). None of them return errors.
//!
//! [`BoundedRetry`]: crate::retry::BoundedRetry

pub mod organization;
pub mod profile;
pub mod role;

pub use organization::OrganizationResolver;
pub use profile::{ProfileLookup, ProfileResolver};
pub use role::RoleResolver;

use crate::error::BackendError;
use crate::retry::Attempt;

/// Only a missing record is worth another attempt.
pub(crate) fn classify_absence(error: &BackendError) -> Attempt {
    if error.is_not_found() {
        Attempt::Transient
    } else {
        Attempt::Terminal
    }
}
