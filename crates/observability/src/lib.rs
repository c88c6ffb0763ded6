//! Tracing and logging (shared setup).

/// Initialize process-wide observability (tracing/logging) with defaults.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize with explicit settings (format, default level).
///
/// Fails only when the configured default level is not a valid filter directive.
pub fn init_with(settings: &LogSettings) -> anyhow::Result<()> {
    tracing::init_with(settings)
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::{LogFormat, LogSettings};
