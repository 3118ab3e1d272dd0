//! Ledger engine: the only writer of stock quantities.
//!
//! ```text
//! TransactionRequest
//!   ↓
//! 1. Validate (stateless, before any lock)
//!   ↓
//! 2. Open a unit: resolve the component and take its exclusive lock
//!   ↓
//! 3. Plan the movement against the locked quantity (refuse overdraws)
//!   ↓
//! 4. Stage ledger entry → scan event (scans only) → quantity update
//!   ↓
//! 5. Commit
//! ```
//!
//! Steps 2–4 run under `EngineConfig::unit_timeout`. If the bound is hit the
//! unit is dropped (rolled back) and the caller gets `ConflictOrTimeout`;
//! nothing from that attempt is visible. Commit itself runs outside the bound
//! so a reported timeout never hides a committed write.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{Span, debug, info, instrument, warn};
use uuid::Uuid;

use labstock_core::{ComponentId, DomainError, LedgerEntryId};
use labstock_inventory::{
    Component, ComponentRef, LedgerEntry, MovementError, NewComponent, ReplaySummary, ScanEvent, TransactionRequest,
    plan_movement, replay,
};

use crate::config::EngineConfig;
use crate::history::History;
use crate::store::{ComponentPage, EntryFilter, LedgerStore, LedgerUnit, StockUpdate, StoreError};

/// Failures surfaced by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The referenced component (or record) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is malformed; retrying it unchanged will fail again.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("insufficient stock (available: {available}, requested: {requested})")]
    InsufficientStock { available: i64, requested: i64 },

    /// Lock contention or a bounded wait ran out. Safe to retry.
    #[error("conflict or timeout: {0}")]
    ConflictOrTimeout(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A uniqueness rule refused a catalog write.
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl LedgerError {
    /// Whether an identical retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConflictOrTimeout(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InvalidRequest(_) => "invalid_request",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::ConflictOrTimeout(_) => "conflict_or_timeout",
            LedgerError::StoreUnavailable(_) => "store_unavailable",
            LedgerError::AlreadyExists(_) => "already_exists",
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => LedgerError::NotFound(msg),
            StoreError::Duplicate(msg) => LedgerError::AlreadyExists(msg),
            StoreError::Conflict(msg) | StoreError::Timeout(msg) => LedgerError::ConflictOrTimeout(msg),
            StoreError::Unavailable(msg) => LedgerError::StoreUnavailable(msg),
            StoreError::Constraint(msg) => LedgerError::StoreUnavailable(format!("integrity check failed: {msg}")),
            StoreError::Corrupt(msg) => LedgerError::StoreUnavailable(format!("corrupt record: {msg}")),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::InvalidRequest(msg),
        }
    }
}

impl From<MovementError> for LedgerError {
    fn from(value: MovementError) -> Self {
        match value {
            MovementError::InsufficientStock { available, requested } => {
                LedgerError::InsufficientStock { available, requested }
            }
            other => LedgerError::InvalidRequest(other.to_string()),
        }
    }
}

/// Outcome of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedTransaction {
    pub entry: LedgerEntry,
    /// Present exactly when the request was scan-originated.
    pub scan_event: Option<ScanEvent>,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    /// Component state as committed.
    pub component: Component,
}

/// Result of reconciling a component's ledger with its cached quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub component_id: ComponentId,
    pub initial_quantity: i64,
    pub current_quantity: i64,
    pub entries: usize,
    pub scan_events: usize,
    /// Absent when replay itself failed.
    pub replay: Option<ReplaySummary>,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Applies stock transactions against a `LedgerStore`.
#[derive(Debug, Clone)]
pub struct LedgerEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S> LedgerEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Timestamps are kept at microsecond precision so every store round-trips
/// them unchanged.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Roll back `unit` and hand back the error that caused the abort.
async fn abort<U: LedgerUnit>(unit: U, err: LedgerError) -> LedgerError {
    if let Err(rollback_err) = unit.rollback().await {
        warn!(error = %rollback_err, "rollback failed; unit discarded");
    }
    err
}

/// Evaluate a staging step; on failure roll the unit back and return.
macro_rules! staged {
    ($unit:ident, $step:expr) => {{
        let result = $step;
        match result {
            Ok(value) => value,
            Err(e) => return Err(abort($unit, LedgerError::from(e)).await),
        }
    }};
}

impl<S> LedgerEngine<S>
where
    S: LedgerStore,
{
    /// Apply one transaction atomically.
    ///
    /// On success the ledger entry, the scan event (for scan requests) and the
    /// new quantity are all committed together. On any error none of them are.
    #[instrument(
        skip(self, request),
        fields(
            component = %request.component,
            kind = %request.kind,
            quantity = request.quantity,
            actor = %request.actor_id,
            entry_id = tracing::field::Empty
        ),
        err(level = "warn")
    )]
    pub async fn apply(&self, request: TransactionRequest) -> Result<AppliedTransaction, LedgerError> {
        let request = TransactionRequest {
            component: request.component.normalized(),
            ..request
        };
        request.validate()?;

        let staged = tokio::time::timeout(self.config.unit_timeout, self.stage(&request)).await;
        let (unit, applied) = match staged {
            Ok(result) => result?,
            Err(_) => {
                return Err(LedgerError::ConflictOrTimeout(format!(
                    "transaction not staged within {:?}",
                    self.config.unit_timeout
                )));
            }
        };

        unit.commit().await?;

        Span::current().record("entry_id", tracing::field::display(applied.entry.id));
        info!(
            previous = applied.previous_quantity,
            new = applied.new_quantity,
            scan = applied.scan_event.is_some(),
            "stock transaction committed"
        );
        Ok(applied)
    }

    async fn stage(&self, request: &TransactionRequest) -> Result<(S::Unit, AppliedTransaction), LedgerError> {
        let mut unit = self
            .store
            .get_for_update(&request.component, self.config.lock_timeout)
            .await?;

        let component_id = unit.component().id;
        debug!(component_id = %component_id, quantity = unit.component().quantity, "component locked");
        let movement = staged!(unit, plan_movement(request.kind, request.quantity, unit.component().quantity));

        let moved_at = now();
        let entry = LedgerEntry::from_movement(
            component_id,
            &movement,
            request.actor_id,
            request.ledger_reason(),
            request.reference.clone(),
            moved_at,
        );
        staged!(unit, unit.append_entry(&entry).await);

        let scan_event = match request.scan_code() {
            Some(code) => {
                let event = ScanEvent::for_entry(&entry, code, request.scan_location.clone());
                staged!(unit, unit.append_scan_event(&event).await);
                Some(event)
            }
            None => None,
        };

        let update = StockUpdate {
            quantity: movement.quantity_after,
            location: request.scan_location.clone(),
            moved_at,
        };
        let component = staged!(unit, unit.record_movement(&update).await);

        Ok((
            unit,
            AppliedTransaction {
                entry,
                scan_event,
                previous_quantity: movement.quantity_before,
                new_quantity: movement.quantity_after,
                component,
            },
        ))
    }

    /// Committed state of a component.
    pub async fn component(&self, target: &ComponentRef) -> Result<Component, LedgerError> {
        let target = target.clone().normalized();
        self.store
            .get_component(&target)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("component {target}")))
    }

    /// Newest-first history handle for a component.
    pub async fn history(&self, target: &ComponentRef) -> Result<History<'_, S>, LedgerError> {
        let component = self.component(target).await?;
        Ok(History::new(&self.store, component.id, self.config.history_page_size))
    }

    pub async fn entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, LedgerError> {
        self.store
            .ledger_entry(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("ledger entry {id}")))
    }

    /// Scan events for a component, newest first.
    pub async fn scan_events(&self, target: &ComponentRef) -> Result<Vec<ScanEvent>, LedgerError> {
        let component = self.component(target).await?;
        Ok(self.store.scan_events(component.id).await?)
    }

    /// Components at or below their reorder threshold.
    pub async fn low_stock(&self) -> Result<Vec<Component>, LedgerError> {
        Ok(self.store.low_stock().await?)
    }

    /// One page of the catalog, ordered by name. `page` is 1-based.
    pub async fn list_components(&self, page: usize, per_page: usize) -> Result<ComponentPage, LedgerError> {
        if page == 0 || per_page == 0 {
            return Err(LedgerError::InvalidRequest(
                "page and per_page must be at least 1".to_string(),
            ));
        }
        Ok(self.store.list_components(page, per_page).await?)
    }

    /// Ledger entries across components (or for one), newest first.
    pub async fn list_entries(&self, filter: EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        if filter.limit == 0 {
            return Err(LedgerError::InvalidRequest("limit must be at least 1".to_string()));
        }
        if let Some(id) = filter.component_id {
            self.component(&ComponentRef::Id(id)).await?;
        }
        Ok(self.store.list_entries(&filter).await?)
    }

    #[instrument(skip(self, new), fields(name = %new.name, component_id = tracing::field::Empty), err)]
    pub async fn register_component(&self, new: NewComponent) -> Result<Component, LedgerError> {
        let component = new.into_component(now())?;
        self.store.insert_component(&component).await?;

        Span::current().record("component_id", tracing::field::display(component.id));
        info!(quantity = component.quantity, "component registered");
        Ok(component)
    }

    /// Give a component a scan code.
    ///
    /// An explicit code replaces any existing one. Without one, an existing
    /// code is kept, otherwise a fresh one is generated.
    #[instrument(skip(self, code), fields(component_id = %id), err)]
    pub async fn assign_scan_code(&self, id: ComponentId, code: Option<String>) -> Result<Component, LedgerError> {
        let (code, overwrite) = match code {
            Some(code) => {
                let code = code.trim().to_string();
                if code.is_empty() {
                    return Err(LedgerError::InvalidRequest("scan code cannot be blank".to_string()));
                }
                (code, true)
            }
            None => (Uuid::new_v4().to_string(), false),
        };

        let component = self.store.assign_scan_code(id, &code, overwrite).await?;
        info!(scan_code = component.scan_code.as_deref().unwrap_or_default(), "scan code assigned");
        Ok(component)
    }

    /// Replay a component's ledger and compare it with the cached quantity.
    ///
    /// Holds the component's lock while reading so no transaction can land
    /// between the quantity and the history snapshot.
    #[instrument(skip(self, target), fields(component = %target), err)]
    pub async fn audit(&self, target: &ComponentRef) -> Result<AuditReport, LedgerError> {
        let audited = tokio::time::timeout(self.config.unit_timeout, self.audit_locked(target)).await;
        match audited {
            Ok(report) => {
                let report = report?;
                if !report.is_consistent() {
                    warn!(violations = ?report.violations, "ledger audit found inconsistencies");
                }
                Ok(report)
            }
            Err(_) => Err(LedgerError::ConflictOrTimeout(format!(
                "audit not completed within {:?}",
                self.config.unit_timeout
            ))),
        }
    }

    async fn audit_locked(&self, target: &ComponentRef) -> Result<AuditReport, LedgerError> {
        let target = target.clone().normalized();
        let unit = self.store.get_for_update(&target, self.config.lock_timeout).await?;
        let component = unit.component().clone();

        let history = History::new(&self.store, component.id, self.config.history_page_size);
        let mut entries = staged!(unit, history.collect().await);
        let scans = staged!(unit, self.store.scan_events(component.id).await);
        if let Err(e) = unit.rollback().await {
            warn!(error = %e, "releasing audit lock failed");
        }

        entries.reverse();
        let mut violations = Vec::new();

        let summary = match replay(component.id, component.initial_quantity, &entries) {
            Ok(summary) => {
                if summary.replayed_quantity != component.quantity {
                    violations.push(format!(
                        "ledger replays to {} but component quantity is {}",
                        summary.replayed_quantity, component.quantity
                    ));
                }
                Some(summary)
            }
            Err(e) => {
                violations.push(e.to_string());
                None
            }
        };

        for scan in &scans {
            if !entries.iter().any(|e| scan.corresponds_to(e)) {
                violations.push(format!(
                    "scan event {} has no matching ledger entry {}",
                    scan.id, scan.ledger_entry_id
                ));
            }
        }

        Ok(AuditReport {
            component_id: component.id,
            initial_quantity: component.initial_quantity,
            current_quantity: component.quantity,
            entries: entries.len(),
            scan_events: scans.len(),
            replay: summary,
            violations,
        })
    }
}
