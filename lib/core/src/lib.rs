//! Core domain types shared across the ensemble workspace.
//!
//! This crate provides the strongly-typed identifiers used by every other
//! crate and the rootcause-based `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{CategoryId, OrganizationId, ParseIdError, SubUnitId, UserId};
