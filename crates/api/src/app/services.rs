use std::{sync::Arc, time::Duration};

use labstock_core::{ComponentId, LedgerEntryId};
use labstock_infra::{
    AppliedTransaction, AuditReport, ComponentPage, EngineConfig, EntryFilter, InMemoryLedgerStore, LedgerEngine,
    LedgerError, LowStockWatcher, PostgresLedgerStore, StoreError, WorkerHandle,
};
use labstock_inventory::{Component, ComponentRef, LedgerEntry, NewComponent, ScanEvent, TransactionRequest};
use tracing::info;

use crate::config::AppConfig;

const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// The ledger engine behind the HTTP surface.
///
/// Without a database URL the service runs on the in-memory store, which
/// keeps nothing across restarts.
#[derive(Clone, Debug)]
pub enum AppServices {
    InMemory(Arc<LedgerEngine<InMemoryLedgerStore>>),
    Postgres(Arc<LedgerEngine<PostgresLedgerStore>>),
}

macro_rules! with_engine {
    ($services:expr, $engine:ident => $body:expr) => {
        match $services {
            AppServices::InMemory($engine) => $body,
            AppServices::Postgres($engine) => $body,
        }
    };
}

impl AppServices {
    pub fn in_memory(config: EngineConfig) -> Self {
        AppServices::InMemory(Arc::new(LedgerEngine::new(InMemoryLedgerStore::new(), config)))
    }

    /// Connect, migrate and wrap the configured backend.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let engine_config = config.engine_config();

        let Some(url) = config.database_url.as_deref() else {
            info!(backend = "in_memory", "ledger store selected");
            return Ok(Self::in_memory(engine_config));
        };

        let store = PostgresLedgerStore::connect(url, config.max_connections, POOL_ACQUIRE_TIMEOUT)
            .await?
            .with_statement_timeout(engine_config.unit_timeout);
        store.migrate().await?;
        info!(backend = "postgres", max_connections = config.max_connections, "ledger store selected");

        Ok(AppServices::Postgres(Arc::new(LedgerEngine::new(store, engine_config))))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory(_) => "in_memory",
            AppServices::Postgres(_) => "postgres",
        }
    }

    pub async fn apply(&self, request: TransactionRequest) -> Result<AppliedTransaction, LedgerError> {
        with_engine!(self, engine => engine.apply(request).await)
    }

    pub async fn component(&self, target: &ComponentRef) -> Result<Component, LedgerError> {
        with_engine!(self, engine => engine.component(target).await)
    }

    /// The newest `limit` entries for a component.
    pub async fn history(&self, target: &ComponentRef, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        with_engine!(self, engine => engine.history(target).await?.latest(limit).await)
    }

    pub async fn entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, LedgerError> {
        with_engine!(self, engine => engine.entry(id).await)
    }

    pub async fn scan_events(&self, target: &ComponentRef) -> Result<Vec<ScanEvent>, LedgerError> {
        with_engine!(self, engine => engine.scan_events(target).await)
    }

    pub async fn audit(&self, target: &ComponentRef) -> Result<AuditReport, LedgerError> {
        with_engine!(self, engine => engine.audit(target).await)
    }

    pub async fn register_component(&self, new: NewComponent) -> Result<Component, LedgerError> {
        with_engine!(self, engine => engine.register_component(new).await)
    }

    pub async fn assign_scan_code(&self, id: ComponentId, code: Option<String>) -> Result<Component, LedgerError> {
        with_engine!(self, engine => engine.assign_scan_code(id, code).await)
    }

    pub async fn list_components(&self, page: usize, per_page: usize) -> Result<ComponentPage, LedgerError> {
        with_engine!(self, engine => engine.list_components(page, per_page).await)
    }

    pub async fn list_entries(&self, filter: EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        with_engine!(self, engine => engine.list_entries(filter).await)
    }

    pub async fn low_stock(&self) -> Result<Vec<Component>, LedgerError> {
        with_engine!(self, engine => engine.low_stock().await)
    }

    pub fn spawn_low_stock_watcher(&self, every: Duration) -> WorkerHandle {
        with_engine!(self, engine => LowStockWatcher::spawn(Arc::clone(engine), every))
    }
}
