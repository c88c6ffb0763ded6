//! `shopworks-workers` — the periodic background work of the shop platform.
//!
//! Six task families, each a [`SchedulerLoop`](shopworks_scheduler::SchedulerLoop):
//! analytics, inventory, marketing, affinity, review emails and review imports.
//! Domain work is delegated to the service traits in [`families`]; this crate
//! owns only cadence, tenant selection and the per-tenant unit of work.

pub mod config;
pub mod families;
pub mod host;

pub use config::{AffinitySettings, ConfigError, FamilySettings, HostSettings, WorkersConfig};
pub use host::{Collaborators, Directories, WorkerHost, build_loops};
