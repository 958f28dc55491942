//! Strongly-typed identifiers for members, organizations and their parts.
//!
//! Every identifier wraps a ULID. Identifiers order by their ULID, which
//! gives role reduction a stable tie-break between organizations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when an identifier cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type that failed to parse.
    pub id_type: &'static str,
    /// Why parsing failed.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a fresh identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Wraps an existing ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the display prefix.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);

                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }
    };
}

define_id!(
    /// Stable identifier of an authenticated member, shared by the session
    /// claim and the durable profile.
    UserId,
    "usr"
);

define_id!(
    /// Identifier of a tenant organization.
    OrganizationId,
    "org"
);

define_id!(
    /// Identifier of a sub-unit (department-like grouping) of an organization.
    SubUnitId,
    "unit"
);

define_id!(
    /// Identifier of a service or event category.
    CategoryId,
    "cat"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        assert!(UserId::new().to_string().starts_with("usr_"));
        assert!(OrganizationId::new().to_string().starts_with("org_"));
        assert!(SubUnitId::new().to_string().starts_with("unit_"));
        assert!(CategoryId::new().to_string().starts_with("cat_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = OrganizationId::new();
        let prefixed: OrganizationId = id.to_string().parse().expect("prefixed");
        let bare: OrganizationId = id.as_ulid().to_string().parse().expect("bare");
        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "org_not-a-ulid".parse::<OrganizationId>().unwrap_err();
        assert_eq!(err.id_type, "OrganizationId");
        assert!(err.to_string().contains("OrganizationId"));
    }

    #[test]
    fn ordering_follows_ulid() {
        let low = UserId::from_ulid(Ulid::from_parts(1, 0));
        let high = UserId::from_ulid(Ulid::from_parts(2, 0));
        assert!(low < high);
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
    }
}
