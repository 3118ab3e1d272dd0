//! Infrastructure layer: ledger storage, the transaction engine and
//! background workers.

pub mod config;
pub mod history;
pub mod ledger_engine;
pub mod store;
pub mod workers;

mod integration_tests;

pub use config::EngineConfig;
pub use history::History;
pub use ledger_engine::{AppliedTransaction, AuditReport, LedgerEngine, LedgerError};
pub use store::{
    ComponentPage, EntryFilter, FailPoint, HistoryCursor, HistoryPage, InMemoryLedgerStore, LedgerStore, LedgerUnit,
    PostgresLedgerStore, StockUpdate, StoreError,
};
pub use workers::{LowStockWatcher, WorkerHandle};
