//! The resolved identity published to the rest of the application.
//!
//! Every page reads the current identity to decide what to render. A
//! snapshot is immutable: each resolution cycle replaces it as a whole.

use crate::organization::Organization;
use crate::profile::{ExperienceLevel, Profile, Theme};
use crate::role::{EffectiveRole, Role};
use crate::session::Claim;
use chrono::{DateTime, Utc};
use ensemble_core::{OrganizationId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How an identity was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityOrigin {
    /// Profile and role resolution both completed.
    Resolved,
    /// Synthesized locally from the session claim.
    Fallback,
}

/// Who the caller is, which organization they belong to and what they may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    user_id: UserId,
    email: String,
    display_name: String,
    avatar_url: Option<String>,
    phone: Option<String>,
    experience_level: ExperienceLevel,
    skills: BTreeSet<String>,
    locale: Option<String>,
    theme: Theme,
    created_at: Option<DateTime<Utc>>,
    role: EffectiveRole,
    organization: Option<Organization>,
    origin: IdentityOrigin,
}

impl ResolvedIdentity {
    /// Composes a fully resolved identity.
    ///
    /// `organization` is `None` when the role is not organization-scoped or
    /// the organization lookup failed.
    #[must_use]
    pub fn resolved(
        claim: &Claim,
        profile: Profile,
        role: EffectiveRole,
        organization: Option<Organization>,
    ) -> Self {
        Self {
            user_id: profile.id,
            email: profile.email,
            display_name: profile.display_name,
            avatar_url: claim.avatar_hint.clone(),
            phone: profile.phone,
            experience_level: profile.experience_level,
            skills: profile.skills,
            locale: profile.locale,
            theme: profile.theme,
            created_at: Some(profile.created_at),
            role,
            organization,
            origin: IdentityOrigin::Resolved,
        }
    }

    /// Synthesizes a minimal identity from the session claim alone.
    #[must_use]
    pub fn fallback(claim: &Claim, role: EffectiveRole) -> Self {
        Self {
            user_id: claim.user_id,
            email: claim.email.clone(),
            display_name: fallback_display_name(claim),
            avatar_url: claim.avatar_hint.clone(),
            phone: None,
            experience_level: ExperienceLevel::default(),
            skills: BTreeSet::new(),
            locale: None,
            theme: Theme::default(),
            created_at: None,
            role,
            organization: None,
            origin: IdentityOrigin::Fallback,
        }
    }

    /// Returns the member's stable id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the contact email.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Never empty.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the avatar URL from the session claim.
    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar_url.as_deref()
    }

    /// Returns the contact phone number.
    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    /// Returns the self-declared experience; `Beginner` for a fallback.
    #[must_use]
    pub fn experience_level(&self) -> ExperienceLevel {
        self.experience_level
    }

    /// Returns the skill tags; empty for a fallback.
    #[must_use]
    pub fn skills(&self) -> &BTreeSet<String> {
        &self.skills
    }

    /// Returns the locale preference.
    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Returns the UI theme preference.
    #[must_use]
    pub fn theme(&self) -> Theme {
        self.theme
    }

    /// Profile creation time; `None` for a fallback identity.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Returns the effective role with its organization and source.
    #[must_use]
    pub fn effective_role(&self) -> &EffectiveRole {
        &self.role
    }

    /// Returns the winning role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role.role
    }

    /// Returns the organization the role is scoped to, if any.
    #[must_use]
    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.role.organization_id
    }

    /// Loaded organization details, if any.
    #[must_use]
    pub fn organization(&self) -> Option<&Organization> {
        self.organization.as_ref()
    }

    /// Returns whether the identity was fully resolved.
    #[must_use]
    pub fn origin(&self) -> IdentityOrigin {
        self.origin
    }

    /// Returns true if the identity was built from the claim alone.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.origin == IdentityOrigin::Fallback
    }

    /// Owners and admins manage members, sub-units and categories.
    #[must_use]
    pub fn can_manage_organization(&self) -> bool {
        self.role().at_least(Role::Admin)
    }

    /// Leaders and above build schedules for their sub-units.
    #[must_use]
    pub fn can_lead(&self) -> bool {
        self.role().at_least(Role::Leader)
    }
}

fn fallback_display_name(claim: &Claim) -> String {
    claim
        .name_hint
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| claim.email_local_part())
        .map(str::to_string)
        .or_else(|| Some(claim.email.trim().to_string()).filter(|email| !email.is_empty()))
        .unwrap_or_else(|| claim.user_id.to_string())
}
