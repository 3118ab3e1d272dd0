use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use labstock_core::{ComponentId, Entity, LedgerEntryId};
use labstock_inventory::{Component, ComponentRef, LedgerEntry, ScanEvent};

use super::r#trait::{
    ComponentPage, EntryFilter, HistoryCursor, HistoryPage, LedgerStore, LedgerUnit, StockUpdate, StoreError,
};

/// Insertion-ordered rows indexed by entity id.
#[derive(Debug)]
struct Table<E: Entity> {
    rows: Vec<E>,
    index: HashMap<E::Id, usize>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<E: Entity> Table<E> {
    fn contains(&self, id: &E::Id) -> bool {
        self.index.contains_key(id)
    }

    fn get(&self, id: &E::Id) -> Option<&E> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    fn get_mut(&mut self, id: &E::Id) -> Option<&mut E> {
        self.index.get(id).map(|&i| &mut self.rows[i])
    }

    /// Rejects a row whose id is already present.
    fn insert(&mut self, row: E) -> Result<(), E::Id> {
        let id = *row.id();
        if self.index.contains_key(&id) {
            return Err(id);
        }
        self.index.insert(id, self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    fn iter(&self) -> impl Iterator<Item = &E> {
        self.rows.iter()
    }
}

#[derive(Debug, Default)]
struct Tables {
    components: Table<Component>,
    entries: Table<LedgerEntry>,
    scan_events: Table<ScanEvent>,
}

impl Tables {
    fn resolve(&self, target: &ComponentRef) -> Option<&Component> {
        match target {
            ComponentRef::Id(id) => self.components.get(id),
            ComponentRef::ScanCode(code) => self
                .components
                .iter()
                .find(|c| c.scan_code.as_deref() == Some(code.as_str())),
        }
    }

    fn scan_code_owner(&self, code: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .find(|c| c.scan_code.as_deref() == Some(code))
            .map(|c| c.id)
    }
}

/// Step of a unit at which an injected failure fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailPoint {
    AppendEntry,
    AppendScanEvent,
    RecordMovement,
    Commit,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Not optimized for performance. Per-component
/// async mutexes stand in for row locks; writes staged on a unit are applied
/// under a single write lock at commit.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    locks: Mutex<HashMap<ComponentId, Arc<AsyncMutex<()>>>>,
    fail_point: Mutex<Option<FailPoint>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next unit opened by this store fail at `point`.
    pub fn fail_next_unit(&self, point: FailPoint) {
        if let Ok(mut slot) = self.fail_point.lock() {
            *slot = Some(point);
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| poisoned())
    }

    fn lock_for(&self, id: ComponentId) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(locks.entry(id).or_default()))
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

fn missing(target: &ComponentRef) -> StoreError {
    StoreError::NotFound(format!("component {target}"))
}

fn newest_first<T>(rows: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, LedgerEntryId)) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Unit = InMemoryUnit;

    async fn get_for_update(&self, target: &ComponentRef, lock_timeout: Duration) -> Result<InMemoryUnit, StoreError> {
        let id = {
            let tables = self.read()?;
            tables.resolve(target).map(|c| c.id).ok_or_else(|| missing(target))?
        };

        let lock = self.lock_for(id)?;
        let guard = tokio::time::timeout(lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "lock on component {id} not acquired within {lock_timeout:?}"
                ))
            })?;

        // Re-read under the lock; a scan code may have moved while we waited.
        let component = {
            let tables = self.read()?;
            tables.components.get(&id).cloned()
        };
        let component = component.ok_or_else(|| missing(target))?;
        if let ComponentRef::ScanCode(code) = target {
            if component.scan_code.as_deref() != Some(code.as_str()) {
                return Err(missing(target));
            }
        }

        let fail_point = self.fail_point.lock().map_err(|_| poisoned())?.take();

        Ok(InMemoryUnit {
            tables: Arc::clone(&self.tables),
            _lock: guard,
            component,
            entries: Vec::new(),
            scan_events: Vec::new(),
            update: None,
            fail_point,
        })
    }

    async fn get_component(&self, target: &ComponentRef) -> Result<Option<Component>, StoreError> {
        Ok(self.read()?.resolve(target).cloned())
    }

    async fn insert_component(&self, component: &Component) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        if let Some(part) = &component.part_number {
            if tables.components.iter().any(|c| c.part_number.as_ref() == Some(part)) {
                return Err(StoreError::Duplicate(format!("part number '{part}' is already registered")));
            }
        }
        if let Some(code) = &component.scan_code {
            if tables.scan_code_owner(code).is_some() {
                return Err(StoreError::Duplicate(format!("scan code '{code}' is already assigned")));
            }
        }

        tables
            .components
            .insert(component.clone())
            .map_err(|id| StoreError::Duplicate(format!("component {id} already exists")))
    }

    async fn assign_scan_code(&self, id: ComponentId, code: &str, overwrite: bool) -> Result<Component, StoreError> {
        let mut tables = self.write()?;

        if let Some(owner) = tables.scan_code_owner(code) {
            if owner != id {
                return Err(StoreError::Duplicate(format!("scan code '{code}' is already assigned")));
            }
        }

        let component = tables
            .components
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("component {id}")))?;
        if overwrite || component.scan_code.is_none() {
            component.scan_code = Some(code.to_string());
        }
        Ok(component.clone())
    }

    async fn low_stock(&self) -> Result<Vec<Component>, StoreError> {
        let tables = self.read()?;
        let mut low: Vec<Component> = tables.components.iter().filter(|c| c.is_low_stock()).cloned().collect();
        low.sort_by(|a, b| a.quantity.cmp(&b.quantity).then_with(|| a.name.cmp(&b.name)));
        Ok(low)
    }

    async fn history_page(
        &self,
        component_id: ComponentId,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError> {
        let tables = self.read()?;
        let mut entries: Vec<LedgerEntry> = tables
            .entries
            .iter()
            .filter(|e| e.component_id == component_id)
            .filter(|e| match after {
                Some(c) => (e.created_at, e.id) < (c.created_at, c.id),
                None => true,
            })
            .cloned()
            .collect();

        newest_first(&mut entries, |e| (e.created_at, e.id));
        entries.truncate(limit);
        Ok(HistoryPage::from_entries(entries, limit))
    }

    async fn list_components(&self, page: usize, per_page: usize) -> Result<ComponentPage, StoreError> {
        let tables = self.read()?;
        let mut all: Vec<&Component> = tables.components.iter().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let skip = page.saturating_sub(1).saturating_mul(per_page);
        Ok(ComponentPage {
            components: all.iter().skip(skip).take(per_page).map(|c| (*c).clone()).collect(),
            page,
            per_page,
            total: all.len() as u64,
        })
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let tables = self.read()?;
        let mut entries: Vec<LedgerEntry> = tables
            .entries
            .iter()
            .filter(|e| filter.component_id.is_none_or(|id| e.component_id == id))
            .cloned()
            .collect();

        newest_first(&mut entries, |e| (e.created_at, e.id));
        Ok(entries.into_iter().skip(filter.offset).take(filter.limit).collect())
    }

    async fn ledger_entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.read()?.entries.get(&id).cloned())
    }

    async fn scan_events(&self, component_id: ComponentId) -> Result<Vec<ScanEvent>, StoreError> {
        let tables = self.read()?;
        let mut events: Vec<ScanEvent> = tables
            .scan_events
            .iter()
            .filter(|s| s.component_id == component_id)
            .cloned()
            .collect();
        newest_first(&mut events, |s| (s.created_at, s.ledger_entry_id));
        Ok(events)
    }
}

/// Unit of work over one locked component.
///
/// Writes are staged locally; `commit` validates and applies all of them
/// under one write lock or none of them.
#[derive(Debug)]
pub struct InMemoryUnit {
    tables: Arc<RwLock<Tables>>,
    _lock: OwnedMutexGuard<()>,
    component: Component,
    entries: Vec<LedgerEntry>,
    scan_events: Vec<ScanEvent>,
    update: Option<StockUpdate>,
    fail_point: Option<FailPoint>,
}

impl InMemoryUnit {
    fn trip(&mut self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_point == Some(point) {
            self.fail_point = None;
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerUnit for InMemoryUnit {
    fn component(&self) -> &Component {
        &self.component
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.trip(FailPoint::AppendEntry)?;
        if entry.component_id != self.component.id {
            return Err(StoreError::Constraint(format!(
                "entry {} targets component {}, unit holds {}",
                entry.id, entry.component_id, self.component.id
            )));
        }
        if entry.quantity < 0 {
            return Err(StoreError::Constraint("ledger quantity cannot be negative".to_string()));
        }
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn append_scan_event(&mut self, event: &ScanEvent) -> Result<(), StoreError> {
        self.trip(FailPoint::AppendScanEvent)?;
        if !self.entries.iter().any(|e| e.id == event.ledger_entry_id) {
            return Err(StoreError::Constraint(format!(
                "scan event {} references unknown ledger entry {}",
                event.id, event.ledger_entry_id
            )));
        }
        self.scan_events.push(event.clone());
        Ok(())
    }

    async fn record_movement(&mut self, update: &StockUpdate) -> Result<Component, StoreError> {
        self.trip(FailPoint::RecordMovement)?;
        if update.quantity < 0 {
            return Err(StoreError::Constraint("component quantity cannot be negative".to_string()));
        }

        let mut updated = self.component.clone();
        updated.quantity = update.quantity;
        if let Some(location) = &update.location {
            updated.location = Some(location.clone());
        }
        updated.last_moved = Some(update.moved_at);

        self.update = Some(update.clone());
        Ok(updated)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.trip(FailPoint::Commit)?;

        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        for (i, e) in self.entries.iter().enumerate() {
            if tables.entries.contains(&e.id) || self.entries[..i].iter().any(|prev| prev.id == e.id) {
                return Err(StoreError::Duplicate(format!("ledger entry {} already exists", e.id)));
            }
        }
        for (i, s) in self.scan_events.iter().enumerate() {
            if tables.scan_events.contains(&s.id)
                || self.scan_events[..i].iter().any(|prev| prev.id == s.id)
                || tables.scan_events.iter().any(|existing| existing.ledger_entry_id == s.ledger_entry_id)
            {
                return Err(StoreError::Duplicate(format!("scan event {} already recorded", s.id)));
            }
        }
        if !tables.components.contains(&self.component.id) {
            return Err(StoreError::NotFound(format!("component {}", self.component.id)));
        }

        // Everything validated above; the inserts below cannot collide.
        for e in self.entries.drain(..) {
            tables
                .entries
                .insert(e)
                .map_err(|id| StoreError::Duplicate(format!("ledger entry {id} already exists")))?;
        }
        for s in self.scan_events.drain(..) {
            tables
                .scan_events
                .insert(s)
                .map_err(|id| StoreError::Duplicate(format!("scan event {id} already recorded")))?;
        }
        if let Some(update) = self.update.take() {
            if let Some(c) = tables.components.get_mut(&self.component.id) {
                c.quantity = update.quantity;
                if let Some(location) = update.location {
                    c.location = Some(location);
                }
                c.last_moved = Some(update.moved_at);
            }
        }

        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
