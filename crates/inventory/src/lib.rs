//! Inventory ledger domain module.
//!
//! This crate contains the business rules for lab stock movements, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). The
//! infrastructure layer owns locking and atomicity; everything it needs to
//! decide *what* to write lives here.

pub mod component;
pub mod ledger;
pub mod movement;
pub mod transaction;

pub use component::{Component, DEFAULT_REORDER_THRESHOLD, NewComponent, StockStatus};
pub use ledger::{LedgerEntry, ReplayError, ReplaySummary, ScanEvent, replay};
pub use movement::{Movement, MovementError, plan_movement};
pub use transaction::{ComponentRef, TransactionKind, TransactionRequest};
