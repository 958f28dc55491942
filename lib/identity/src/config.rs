//! Identity resolution configuration.
//!
//! All ceilings are design values and can be tuned through environment
//! variables, e.g. `ENSEMBLE_IDENTITY__CYCLE_TIMEOUT_MS=15000`.

use crate::retry::{BoundedRetry, Stage};
use serde::Deserialize;
use std::time::Duration;

/// Environment prefix for identity settings.
pub const ENV_PREFIX: &str = "ENSEMBLE_IDENTITY";

/// What a `TOKEN_REFRESHED` event does while the current identity is a
/// fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackRefresh {
    /// Treat the refresh as a chance to resolve the full identity again.
    #[default]
    Reresolve,
    /// Keep the fallback until the next sign-in.
    Keep,
}

/// Timeouts, retry policy and the bootstrap account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityConfig {
    /// Ceiling for the one-shot session fetch at startup.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Ceiling for the whole profile retry sequence.
    #[serde(default = "default_profile_timeout_ms")]
    pub profile_timeout_ms: u64,

    /// Attempt cap while the profile row is missing.
    #[serde(default = "default_profile_max_attempts")]
    pub profile_max_attempts: u32,

    /// Fixed delay between profile attempts.
    #[serde(default = "default_profile_retry_delay_ms")]
    pub profile_retry_delay_ms: u64,

    /// Ceiling for the role-binding fetch.
    #[serde(default = "default_role_timeout_ms")]
    pub role_timeout_ms: u64,

    /// Ceiling for the organization fetch.
    #[serde(default = "default_organization_timeout_ms")]
    pub organization_timeout_ms: u64,

    /// Ceiling for a whole resolution cycle.
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,

    /// Email of the seed account that is granted the global owner role when
    /// it has no role bindings. Unset disables the bypass.
    #[serde(default)]
    pub bootstrap_admin_email: Option<String>,

    /// Refresh policy while in fallback.
    #[serde(default)]
    pub refresh_in_fallback: FallbackRefresh,
}

fn default_session_timeout_ms() -> u64 {
    5_000
}

fn default_profile_timeout_ms() -> u64 {
    8_000
}

fn default_profile_max_attempts() -> u32 {
    2
}

fn default_profile_retry_delay_ms() -> u64 {
    500
}

fn default_role_timeout_ms() -> u64 {
    3_000
}

fn default_organization_timeout_ms() -> u64 {
    3_000
}

fn default_cycle_timeout_ms() -> u64 {
    10_000
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            profile_timeout_ms: default_profile_timeout_ms(),
            profile_max_attempts: default_profile_max_attempts(),
            profile_retry_delay_ms: default_profile_retry_delay_ms(),
            role_timeout_ms: default_role_timeout_ms(),
            organization_timeout_ms: default_organization_timeout_ms(),
            cycle_timeout_ms: default_cycle_timeout_ms(),
            bootstrap_admin_email: None,
            refresh_in_fallback: FallbackRefresh::default(),
        }
    }
}

impl IdentityConfig {
    /// Loads configuration from `ENSEMBLE_IDENTITY__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every ceiling is positive and at least one profile
    /// attempt is allowed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending field.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let ceilings = [
            ("session_timeout_ms", self.session_timeout_ms),
            ("profile_timeout_ms", self.profile_timeout_ms),
            ("role_timeout_ms", self.role_timeout_ms),
            ("organization_timeout_ms", self.organization_timeout_ms),
            ("cycle_timeout_ms", self.cycle_timeout_ms),
        ];
        if let Some((name, _)) = ceilings.iter().find(|(_, value)| *value == 0) {
            return Err(config::ConfigError::Message(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.profile_max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "profile_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Overall ceiling for a resolution cycle.
    #[must_use]
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    /// Retry policy for the startup session fetch.
    #[must_use]
    pub fn session_retry(&self) -> BoundedRetry {
        BoundedRetry::once(Stage::Session, Duration::from_millis(self.session_timeout_ms))
    }

    /// Retry policy for the profile lookup.
    #[must_use]
    pub fn profile_retry(&self) -> BoundedRetry {
        BoundedRetry::once(Stage::Profile, Duration::from_millis(self.profile_timeout_ms))
            .with_attempts(
                self.profile_max_attempts,
                Duration::from_millis(self.profile_retry_delay_ms),
            )
    }

    /// Retry policy for the role-binding lookup.
    #[must_use]
    pub fn role_retry(&self) -> BoundedRetry {
        BoundedRetry::once(Stage::Roles, Duration::from_millis(self.role_timeout_ms))
    }

    /// Retry policy for the organization lookup.
    #[must_use]
    pub fn organization_retry(&self) -> BoundedRetry {
        BoundedRetry::once(
            Stage::Organization,
            Duration::from_millis(self.organization_timeout_ms),
        )
    }

    /// Returns true if `email` is the configured bootstrap account.
    ///
    /// Comparison ignores case and surrounding whitespace.
    #[must_use]
    pub fn is_bootstrap_email(&self, email: &str) -> bool {
        self.bootstrap_admin_email
            .as_deref()
            .map(str::trim)
            .filter(|configured| !configured.is_empty())
            .is_some_and(|configured| configured.eq_ignore_ascii_case(email.trim()))
    }

    /// Sets the bootstrap email.
    #[must_use]
    pub fn with_bootstrap_admin_email(mut self, email: impl Into<String>) -> Self {
        self.bootstrap_admin_email = Some(email.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn defaults_match_design_values() {
        let config = IdentityConfig::default();
        assert_eq!(config.profile_retry().ceiling(), Duration::from_secs(8));
        assert_eq!(config.profile_retry().max_attempts(), 2);
        assert_eq!(config.profile_retry().delay(), Duration::from_millis(500));
        assert_eq!(config.role_retry().ceiling(), Duration::from_secs(3));
        assert_eq!(config.organization_retry().ceiling(), Duration::from_secs(3));
        assert_eq!(config.cycle_timeout(), Duration::from_secs(10));
        assert_eq!(config.refresh_in_fallback, FallbackRefresh::Reresolve);
        assert!(config.bootstrap_admin_email.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = IdentityConfig::from_environment(environment(&[])).expect("load");
        assert_eq!(config, IdentityConfig::default());
    }

    #[test]
    fn environment_overrides() {
        let config = IdentityConfig::from_environment(environment(&[
            ("ENSEMBLE_IDENTITY__CYCLE_TIMEOUT_MS", "15000"),
            ("ENSEMBLE_IDENTITY__BOOTSTRAP_ADMIN_EMAIL", "seed@example.com"),
            ("ENSEMBLE_IDENTITY__REFRESH_IN_FALLBACK", "keep"),
        ]))
        .expect("load");

        assert_eq!(config.cycle_timeout(), Duration::from_secs(15));
        assert_eq!(config.bootstrap_admin_email.as_deref(), Some("seed@example.com"));
        assert_eq!(config.refresh_in_fallback, FallbackRefresh::Keep);
        assert_eq!(config.role_timeout_ms, 3_000);
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let err = IdentityConfig::from_environment(environment(&[(
            "ENSEMBLE_IDENTITY__ROLE_TIMEOUT_MS",
            "0",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("role_timeout_ms"));
    }

    #[test]
    fn zero_profile_attempts_is_rejected() {
        let config = IdentityConfig {
            profile_max_attempts: 0,
            ..IdentityConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bootstrap_email_matching() {
        let config = IdentityConfig::default().with_bootstrap_admin_email("Seed@Example.com");
        assert!(config.is_bootstrap_email("seed@example.com"));
        assert!(config.is_bootstrap_email(" SEED@example.com "));
        assert!(!config.is_bootstrap_email("other@example.com"));

        assert!(!IdentityConfig::default().is_bootstrap_email("seed@example.com"));
        let blank = IdentityConfig::default().with_bootstrap_admin_email("  ");
        assert!(!blank.is_bootstrap_email(""));
    }
}
