//! Tracing and logging (shared setup).

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::LogConfig;

/// Initialize process-wide observability from explicit settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init_with(config: &LogConfig) {
    tracing::init(config);
}
