//! Durable member profiles and partial profile updates.
//!
//! A profile is keyed by the claim's stable id. It is created server-side at
//! registration (or lazily by a database trigger, which is why it can lag
//! behind the session) and is never deleted by this crate.

use chrono::{DateTime, Utc};
use ensemble_core::UserId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Self-declared musical experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

/// Preferred UI theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// The durable profile record of a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same id as the session claim.
    pub id: UserId,
    /// Name shown to other members.
    pub display_name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone number.
    pub phone: Option<String>,
    /// Self-declared experience.
    pub experience_level: ExperienceLevel,
    /// Skill tags (instruments, voice parts, technical roles).
    pub skills: BTreeSet<String>,
    /// BCP 47 locale preference, e.g. `pt-BR`.
    pub locale: Option<String>,
    /// UI theme preference.
    pub theme: Theme,
    /// When the profile row was created.
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Creates a profile with default preferences, as the registration
    /// trigger does.
    #[must_use]
    pub fn new(id: UserId, display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email: email.into(),
            phone: None,
            experience_level: ExperienceLevel::default(),
            skills: BTreeSet::new(),
            locale: None,
            theme: Theme::default(),
            created_at: Utc::now(),
        }
    }

    /// Returns the profile with `update` applied.
    ///
    /// Fields absent from the update keep their current value.
    #[must_use]
    pub fn apply(&self, update: &ProfileUpdate) -> Self {
        let mut next = self.clone();
        if let Some(name) = &update.display_name {
            next.display_name.clone_from(name);
        }
        if let Some(phone) = &update.phone {
            next.phone.clone_from(phone);
        }
        if let Some(level) = update.experience_level {
            next.experience_level = level;
        }
        if let Some(skills) = &update.skills {
            next.skills.clone_from(skills);
        }
        if let Some(locale) = &update.locale {
            next.locale.clone_from(locale);
        }
        if let Some(theme) = update.theme {
            next.theme = theme;
        }
        next
    }
}

/// A partial profile write. Only `Some` fields are changed.
///
/// Optional profile fields take a nested option: `Some(None)` clears the
/// value and is written as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub phone: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<BTreeSet<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub locale: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

impl ProfileUpdate {
    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Sets the display name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the phone number.
    #[must_use]
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(Some(phone.into()));
        self
    }

    /// Removes the phone number.
    #[must_use]
    pub fn clear_phone(mut self) -> Self {
        self.phone = Some(None);
        self
    }

    /// Sets the experience level.
    #[must_use]
    pub fn experience_level(mut self, level: ExperienceLevel) -> Self {
        self.experience_level = Some(level);
        self
    }

    /// Replaces the skill set.
    #[must_use]
    pub fn skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = Some(skills.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the locale.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(Some(locale.into()));
        self
    }

    /// Removes the locale preference, falling back to the app default.
    #[must_use]
    pub fn clear_locale(mut self) -> Self {
        self.locale = Some(None);
        self
    }

    /// Sets the theme.
    #[must_use]
    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }
}

// A field that is present, even as `null`, is part of the update.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::new(UserId::new(), "Ana Souza", "ana@example.com")
    }

    #[test]
    fn new_profile_has_default_preferences() {
        let p = profile();
        assert_eq!(p.experience_level, ExperienceLevel::Beginner);
        assert_eq!(p.theme, Theme::System);
        assert!(p.skills.is_empty());
        assert!(p.locale.is_none());
        assert!(p.phone.is_none());
    }

    #[test]
    fn apply_changes_only_given_fields() {
        let before = profile();
        let update = ProfileUpdate::default()
            .experience_level(ExperienceLevel::Advanced)
            .skills(["guitar", "vocals"]);

        let after = before.apply(&update);

        assert_eq!(after.display_name, before.display_name);
        assert_eq!(after.email, before.email);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.experience_level, ExperienceLevel::Advanced);
        assert!(after.skills.contains("guitar"));
        assert!(after.skills.contains("vocals"));
    }

    #[test]
    fn apply_replaces_skill_set() {
        let before = profile().apply(&ProfileUpdate::default().skills(["drums"]));
        let after = before.apply(&ProfileUpdate::default().skills(["bass"]));
        assert_eq!(after.skills.len(), 1);
        assert!(after.skills.contains("bass"));
    }

    #[test]
    fn empty_update_detection() {
        assert!(ProfileUpdate::default().is_empty());
        assert!(!ProfileUpdate::default().theme(Theme::Dark).is_empty());
    }

    #[test]
    fn update_serializes_only_present_fields() {
        let update = ProfileUpdate::default().locale("pt-BR");
        let json = serde_json::to_value(&update).expect("serialize");
        assert_eq!(json, serde_json::json!({ "locale": "pt-BR" }));
    }

    #[test]
    fn clearing_optional_fields() {
        let before = profile().apply(
            &ProfileUpdate::default()
                .phone("+55 11 5555-0100")
                .locale("pt-BR"),
        );
        assert_eq!(before.phone.as_deref(), Some("+55 11 5555-0100"));

        let after = before.apply(&ProfileUpdate::default().clear_phone());

        assert!(after.phone.is_none());
        assert_eq!(after.locale.as_deref(), Some("pt-BR"));
        assert!(!ProfileUpdate::default().clear_locale().is_empty());
    }

    #[test]
    fn null_clears_and_absent_keeps() {
        let update: ProfileUpdate =
            serde_json::from_value(serde_json::json!({ "locale": null })).expect("deserialize");
        assert_eq!(update.locale, Some(None));
        assert_eq!(update.phone, None);
        assert_eq!(
            serde_json::to_value(&update).expect("serialize"),
            serde_json::json!({ "locale": null })
        );
    }

    #[test]
    fn enum_wire_names() {
        let level = serde_json::to_string(&ExperienceLevel::Intermediate).expect("serialize");
        let theme = serde_json::to_string(&Theme::Dark).expect("serialize");
        assert_eq!(level, "\"intermediate\"");
        assert_eq!(theme, "\"dark\"");
    }
}
