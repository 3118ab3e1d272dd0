//! Engine tuning knobs.

use std::time::Duration;

/// Bounds applied by `LedgerEngine` to every unit of work.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on lock wait plus staging; commit runs outside it.
    pub unit_timeout: Duration,
    /// Maximum wait for a component's exclusive lock.
    pub lock_timeout: Duration,
    /// Entries fetched per store round trip when streaming history.
    pub history_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(2),
            history_page_size: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Page size is clamped to at least one entry.
    pub fn with_history_page_size(mut self, size: usize) -> Self {
        self.history_page_size = size.max(1);
        self
    }
}
