//! Transactional storage boundary for components, ledger entries and scan
//! events.
//!
//! The engine never talks to a database directly. It asks a `LedgerStore`
//! for a locked `LedgerUnit`, stages its writes on the unit, and commits or
//! rolls back as a whole.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{FailPoint, InMemoryLedgerStore, InMemoryUnit};
pub use postgres::{PostgresLedgerStore, PostgresUnit};
pub use r#trait::{
    ComponentPage, EntryFilter, HistoryCursor, HistoryPage, LedgerStore, LedgerUnit, StockUpdate, StoreError,
};
