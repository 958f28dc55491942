//! Session and identity resolution for ensemble.
//!
//! This crate provides:
//! - Session types and change events (`Session`, `Claim`, `SessionEvent`)
//! - Durable member records (`Profile`, `Organization`, `RoleBinding`)
//! - Per-stage resolvers with bounded retry (`resolver`, `retry`)
//! - The `IdentityAssembler`, which publishes one `ResolvedIdentity`
//! - An in-memory backend for development and tests
//!
//! # Role Model
//!
//! A member may hold several role bindings, each global or scoped to one
//! organization. The highest-priority role wins:
//!
//! ```
//! use ensemble_core::{OrganizationId, UserId};
//! use ensemble_identity::{EffectiveRole, Role, RoleBinding};
//!
//! let member = UserId::new();
//! let org = OrganizationId::new();
//! let bindings = vec![
//!     RoleBinding::scoped(member, org, Role::Member),
//!     RoleBinding::scoped(member, org, Role::Admin),
//! ];
//!
//! let effective = EffectiveRole::from_bindings(&bindings).unwrap();
//! assert_eq!(effective.role, Role::Admin);
//! assert_eq!(effective.organization_id, Some(org));
//! ```

pub mod assembler;
pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
pub mod organization;
pub mod profile;
pub mod resolver;
pub mod retry;
pub mod role;
pub mod session;

pub use assembler::{IdentityAssembler, IdentitySnapshot, Phase};
pub use backend::{IdentityDirectory, Registration, SessionStore};
pub use config::{FallbackRefresh, IdentityConfig};
pub use error::{AccountError, BackendError};
pub use identity::{IdentityOrigin, ResolvedIdentity};
pub use memory::InMemoryBackend;
pub use organization::{Organization, ServiceCategory, SubUnit};
pub use profile::{ExperienceLevel, Profile, ProfileUpdate, Theme};
pub use role::{EffectiveRole, Role, RoleBinding, RoleSource};
pub use session::{Claim, Session, SessionEvent, SessionToken};
