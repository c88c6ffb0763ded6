//! `shopworks-core` — shared identifiers and validation errors.
//!
//! This crate contains **pure** primitives (no runtime, no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{CycleId, TenantId};
