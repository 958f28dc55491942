//! Roles, role bindings and effective-role reduction.
//!
//! A member may hold several bindings (admin in one organization, member in
//! another). Reduction picks exactly one effective role by fixed priority,
//! never by recency or row order, so the result does not depend on how the
//! backend orders its rows.

use ensemble_core::{OrganizationId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permission level within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the organization; the bootstrap account holds this globally.
    Owner,
    /// Manages the organization and its members.
    Admin,
    /// Leads one or more sub-units.
    Leader,
    /// Contributes to schedules and repertoire.
    Collaborator,
    /// Regular member.
    Member,
}

impl Role {
    /// All roles, highest priority first.
    pub const PRIORITY: [Self; 5] = [
        Self::Owner,
        Self::Admin,
        Self::Leader,
        Self::Collaborator,
        Self::Member,
    ];

    /// Position in [`Role::PRIORITY`]; lower is stronger.
    #[must_use]
    pub fn rank(self) -> usize {
        match self {
            Self::Owner => 0,
            Self::Admin => 1,
            Self::Leader => 2,
            Self::Collaborator => 3,
            Self::Member => 4,
        }
    }

    /// Returns true if this role is `other` or stronger.
    #[must_use]
    pub fn at_least(self, other: Self) -> bool {
        self.rank() <= other.rank()
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Leader => "leader",
            Self::Collaborator => "collaborator",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// A (subject, organization, role) triple as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    /// Member the binding applies to.
    pub subject: UserId,
    /// Organization the role is held in; `None` for a global binding.
    pub organization_id: Option<OrganizationId>,
    /// The role granted.
    pub role: Role,
}

impl RoleBinding {
    /// Creates a binding scoped to an organization.
    #[must_use]
    pub fn scoped(subject: UserId, organization_id: OrganizationId, role: Role) -> Self {
        Self {
            subject,
            organization_id: Some(organization_id),
            role,
        }
    }

    /// Creates a global binding.
    #[must_use]
    pub fn global(subject: UserId, role: Role) -> Self {
        Self {
            subject,
            organization_id: None,
            role,
        }
    }
}

/// Where an effective role came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// Reduced from the member's role bindings.
    Bindings,
    /// The configured bootstrap email matched.
    Bootstrap,
    /// No bindings were available; the member default applied.
    Default,
}

/// The single role a member acts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveRole {
    /// The winning role.
    pub role: Role,
    /// Organization attached to the winning binding.
    pub organization_id: Option<OrganizationId>,
    /// How the role was determined.
    pub source: RoleSource,
}

impl EffectiveRole {
    /// The global top-priority role granted to the bootstrap account.
    #[must_use]
    pub fn bootstrap() -> Self {
        Self {
            role: Role::Owner,
            organization_id: None,
            source: RoleSource::Bootstrap,
        }
    }

    /// Plain membership without an organization.
    #[must_use]
    pub fn member() -> Self {
        Self {
            role: Role::Member,
            organization_id: None,
            source: RoleSource::Default,
        }
    }

    /// Applies the no-bindings default for the given email.
    #[must_use]
    pub fn default_for(is_bootstrap: bool) -> Self {
        if is_bootstrap {
            Self::bootstrap()
        } else {
            Self::member()
        }
    }

    /// Reduces bindings to an effective role, if any binding exists.
    #[must_use]
    pub fn from_bindings(bindings: &[RoleBinding]) -> Option<Self> {
        reduce_bindings(bindings).map(|(role, organization_id)| Self {
            role,
            organization_id,
            source: RoleSource::Bindings,
        })
    }

    /// Returns true if organization details must be loaded for this role.
    #[must_use]
    pub fn requires_organization(&self) -> bool {
        self.source != RoleSource::Bootstrap && self.organization_id.is_some()
    }
}

/// Reduces a set of bindings to the highest-priority role.
///
/// The first role of [`Role::PRIORITY`] present in `bindings` wins. When the
/// winning role is held more than once, a global binding is preferred, then
/// the smallest organization id, so any permutation of `bindings` gives the
/// same answer.
#[must_use]
pub fn reduce_bindings(bindings: &[RoleBinding]) -> Option<(Role, Option<OrganizationId>)> {
    Role::PRIORITY.into_iter().find_map(|role| {
        bindings
            .iter()
            .filter(|binding| binding.role == role)
            .map(|binding| binding.organization_id)
            .min()
            .map(|organization_id| (role, organization_id))
    })
}
