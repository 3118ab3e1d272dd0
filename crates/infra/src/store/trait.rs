use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use labstock_core::{ComponentId, LedgerEntryId};
use labstock_inventory::{Component, ComponentRef, LedgerEntry, ScanEvent};

/// Storage failures, classified by what a caller can do about them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness rule was violated (scan code, part number, record id).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Lock contention, deadlock or serialization failure.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A storage-level integrity rule refused the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Persisted data could not be decoded into domain records.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Keyset position inside a component's newest-first history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub id: LedgerEntryId,
}

impl HistoryCursor {
    pub fn after(entry: &LedgerEntry) -> Self {
        Self {
            created_at: entry.created_at,
            id: entry.id,
        }
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub entries: Vec<LedgerEntry>,
    /// Set when the page was full; the next page starts strictly after it.
    pub next: Option<HistoryCursor>,
}

impl HistoryPage {
    pub(crate) fn from_entries(entries: Vec<LedgerEntry>, limit: usize) -> Self {
        let next = if limit > 0 && entries.len() == limit {
            entries.last().map(HistoryCursor::after)
        } else {
            None
        };
        Self { entries, next }
    }
}

/// One page of the component catalog, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentPage {
    pub components: Vec<Component>,
    /// 1-based page number.
    pub page: usize,
    pub per_page: usize,
    /// Components in the whole catalog.
    pub total: u64,
}

impl ComponentPage {
    pub fn total_pages(&self) -> u64 {
        match self.per_page as u64 {
            0 => 0,
            per_page => self.total.div_ceil(per_page),
        }
    }
}

/// Offset window over the ledger across components, newest first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryFilter {
    /// Restrict to one component.
    pub component_id: Option<ComponentId>,
    pub limit: usize,
    pub offset: usize,
}

/// The engine-owned fields written when stock moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockUpdate {
    pub quantity: i64,
    /// `None` keeps the stored location.
    pub location: Option<String>,
    pub moved_at: DateTime<Utc>,
}

/// An open, exclusively locked unit of work over a single component.
///
/// Nothing staged on a unit is visible to other readers until `commit`
/// returns `Ok`. Dropping a unit without committing discards it and releases
/// the lock.
#[async_trait]
pub trait LedgerUnit: Send {
    /// The component as read under the lock.
    fn component(&self) -> &Component;

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn append_scan_event(&mut self, event: &ScanEvent) -> Result<(), StoreError>;

    async fn record_movement(&mut self, update: &StockUpdate) -> Result<Component, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Persistence for the stock ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Unit: LedgerUnit;

    /// Resolve `target` and open a unit holding its exclusive lock.
    ///
    /// Waiting longer than `lock_timeout` for the lock yields
    /// `StoreError::Conflict`.
    async fn get_for_update(&self, target: &ComponentRef, lock_timeout: Duration) -> Result<Self::Unit, StoreError>;

    /// Committed state only; takes no lock.
    async fn get_component(&self, target: &ComponentRef) -> Result<Option<Component>, StoreError>;

    async fn insert_component(&self, component: &Component) -> Result<(), StoreError>;

    /// Set the component's scan code.
    ///
    /// With `overwrite == false` an existing code is kept and returned as is.
    async fn assign_scan_code(&self, id: ComponentId, code: &str, overwrite: bool) -> Result<Component, StoreError>;

    /// Components at or below their reorder threshold, lowest quantity first.
    async fn low_stock(&self) -> Result<Vec<Component>, StoreError>;

    /// Up to `limit` entries for `component_id`, ordered by
    /// `(created_at DESC, id DESC)`, starting strictly after `after`.
    async fn history_page(
        &self,
        component_id: ComponentId,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError>;

    /// Catalog page `page` (1-based) of `per_page` components, by name then id.
    async fn list_components(&self, page: usize, per_page: usize) -> Result<ComponentPage, StoreError>;

    /// Ledger entries matching `filter`, ordered by `(created_at DESC, id DESC)`.
    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn ledger_entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Scan events for a component, newest first.
    async fn scan_events(&self, component_id: ComponentId) -> Result<Vec<ScanEvent>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    type Unit = S::Unit;

    async fn get_for_update(&self, target: &ComponentRef, lock_timeout: Duration) -> Result<Self::Unit, StoreError> {
        (**self).get_for_update(target, lock_timeout).await
    }

    async fn get_component(&self, target: &ComponentRef) -> Result<Option<Component>, StoreError> {
        (**self).get_component(target).await
    }

    async fn insert_component(&self, component: &Component) -> Result<(), StoreError> {
        (**self).insert_component(component).await
    }

    async fn assign_scan_code(&self, id: ComponentId, code: &str, overwrite: bool) -> Result<Component, StoreError> {
        (**self).assign_scan_code(id, code, overwrite).await
    }

    async fn low_stock(&self) -> Result<Vec<Component>, StoreError> {
        (**self).low_stock().await
    }

    async fn history_page(
        &self,
        component_id: ComponentId,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError> {
        (**self).history_page(component_id, after, limit).await
    }

    async fn list_components(&self, page: usize, per_page: usize) -> Result<ComponentPage, StoreError> {
        (**self).list_components(page, per_page).await
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).list_entries(filter).await
    }

    async fn ledger_entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).ledger_entry(id).await
    }

    async fn scan_events(&self, component_id: ComponentId) -> Result<Vec<ScanEvent>, StoreError> {
        (**self).scan_events(component_id).await
    }
}
