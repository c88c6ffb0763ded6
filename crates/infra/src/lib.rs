//! Infrastructure layer: database wiring and tenant directories.

pub mod db;
pub mod directory;

pub use db::{DatabaseSettings, DbError};
pub use directory::{PostgresTenantDirectory, StaticTenantDirectory};
