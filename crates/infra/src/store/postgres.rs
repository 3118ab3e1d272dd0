//! Postgres-backed ledger store.
//!
//! A unit of work is a database transaction that holds the component row
//! lock (`SELECT ... FOR UPDATE`). Lock waits and statement runtime are
//! bounded per transaction with `set_config(..., true)`, so a stuck unit fails
//! instead of queueing forever.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (check / foreign key / restrict) | `23514`, `23503`, `23001` | `Constraint` |
//! | Database (deadlock / serialization / lock not available) | `40P01`, `40001`, `55P03` | `Conflict` |
//! | Database (query canceled by statement_timeout) | `57014` | `Timeout` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | PoolClosed, Io, Tls | N/A | `Unavailable` |
//! | ColumnDecode, Decode | N/A | `Corrupt` |
//! | Other | N/A | `Unavailable` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use labstock_core::{ActorId, ComponentId, LedgerEntryId, ScanEventId};
use labstock_inventory::{Component, ComponentRef, LedgerEntry, ScanEvent, TransactionKind};

use super::r#trait::{
    ComponentPage, EntryFilter, HistoryCursor, HistoryPage, LedgerStore, LedgerUnit, StockUpdate, StoreError,
};

/// Schema applied by [`PostgresLedgerStore::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

macro_rules! component_columns {
    () => {
        "id, name, part_number, quantity, initial_quantity, reorder_threshold, location, scan_code, created_at, last_moved"
    };
}

macro_rules! entry_columns {
    () => {
        "id, component_id, kind, quantity, reason, reference, actor_id, quantity_before, quantity_after, created_at"
    };
}

macro_rules! scan_columns {
    () => {
        "id, ledger_entry_id, scan_code, component_id, kind, quantity, location, actor_id, created_at"
    };
}

/// Postgres-backed ledger store.
///
/// `Send + Sync` and cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    statement_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            statement_timeout: Duration::from_secs(5),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Upper bound on any single statement run inside a unit.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, indexes and append-only triggers if missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Unit = PostgresUnit;

    #[instrument(skip(self, target), fields(component = %target), err)]
    async fn get_for_update(&self, target: &ComponentRef, lock_timeout: Duration) -> Result<PostgresUnit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set lock_timeout", e))?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", self.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set statement_timeout", e))?;

        let row = match target {
            ComponentRef::Id(id) => {
                sqlx::query_as::<_, ComponentRow>(concat!(
                    "SELECT ",
                    component_columns!(),
                    " FROM components WHERE id = $1 FOR UPDATE"
                ))
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
            }
            ComponentRef::ScanCode(code) => {
                sqlx::query_as::<_, ComponentRow>(concat!(
                    "SELECT ",
                    component_columns!(),
                    " FROM components WHERE scan_code = $1 FOR UPDATE"
                ))
                .bind(code)
                .fetch_optional(&mut *tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("lock component", e))?;

        match row {
            Some(row) => Ok(PostgresUnit {
                tx,
                component: row.into(),
            }),
            None => {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                Err(StoreError::NotFound(format!("component {target}")))
            }
        }
    }

    async fn get_component(&self, target: &ComponentRef) -> Result<Option<Component>, StoreError> {
        let row = match target {
            ComponentRef::Id(id) => {
                sqlx::query_as::<_, ComponentRow>(concat!("SELECT ", component_columns!(), " FROM components WHERE id = $1"))
                    .bind(id.as_uuid())
                    .fetch_optional(&*self.pool)
                    .await
            }
            ComponentRef::ScanCode(code) => {
                sqlx::query_as::<_, ComponentRow>(concat!(
                    "SELECT ",
                    component_columns!(),
                    " FROM components WHERE scan_code = $1"
                ))
                .bind(code)
                .fetch_optional(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("get_component", e))?;

        Ok(row.map(Component::from))
    }

    #[instrument(skip(self, component), fields(component_id = %component.id), err)]
    async fn insert_component(&self, component: &Component) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO components (",
            component_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(component.id.as_uuid())
        .bind(&component.name)
        .bind(&component.part_number)
        .bind(component.quantity)
        .bind(component.initial_quantity)
        .bind(component.reorder_threshold)
        .bind(&component.location)
        .bind(&component.scan_code)
        .bind(component.created_at)
        .bind(component.last_moved)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_component", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(component_id = %id), err)]
    async fn assign_scan_code(&self, id: ComponentId, code: &str, overwrite: bool) -> Result<Component, StoreError> {
        let row = sqlx::query_as::<_, ComponentRow>(concat!(
            "UPDATE components SET scan_code = CASE WHEN $3 OR scan_code IS NULL THEN $2 ELSE scan_code END ",
            "WHERE id = $1 RETURNING ",
            component_columns!()
        ))
        .bind(id.as_uuid())
        .bind(code)
        .bind(overwrite)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_scan_code", e))?;

        row.map(Component::from)
            .ok_or_else(|| StoreError::NotFound(format!("component {id}")))
    }

    async fn low_stock(&self) -> Result<Vec<Component>, StoreError> {
        let rows = sqlx::query_as::<_, ComponentRow>(concat!(
            "SELECT ",
            component_columns!(),
            " FROM components WHERE quantity <= reorder_threshold ORDER BY quantity ASC, name ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("low_stock", e))?;

        Ok(rows.into_iter().map(Component::from).collect())
    }

    #[instrument(skip(self), fields(component_id = %component_id, returned = tracing::field::Empty), err)]
    async fn history_page(
        &self,
        component_id: ComponentId,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(concat!(
            "SELECT ",
            entry_columns!(),
            " FROM ledger_entries WHERE component_id = $1 ",
            "AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3)) ",
            "ORDER BY created_at DESC, id DESC LIMIT $4"
        ))
        .bind(component_id.as_uuid())
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| *c.id.as_uuid()))
        .bind(to_sql_count(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history_page", e))?;

        let entries = rows
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("returned", entries.len());
        Ok(HistoryPage::from_entries(entries, limit))
    }

    async fn list_components(&self, page: usize, per_page: usize) -> Result<ComponentPage, StoreError> {
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let rows = sqlx::query_as::<_, ComponentRow>(concat!(
            "SELECT ",
            component_columns!(),
            " FROM components ORDER BY name ASC, id ASC LIMIT $1 OFFSET $2"
        ))
        .bind(to_sql_count(per_page))
        .bind(to_sql_count(offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_components", e))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM components")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_components", e))?;

        Ok(ComponentPage {
            components: rows.into_iter().map(Component::from).collect(),
            page,
            per_page,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    #[instrument(skip(self), fields(returned = tracing::field::Empty), err)]
    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(concat!(
            "SELECT ",
            entry_columns!(),
            " FROM ledger_entries WHERE ($1::uuid IS NULL OR component_id = $1) ",
            "ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(filter.component_id.map(|id| *id.as_uuid()))
        .bind(to_sql_count(filter.limit))
        .bind(to_sql_count(filter.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        let entries = rows
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("returned", entries.len());
        Ok(entries)
    }

    async fn ledger_entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(concat!(
            "SELECT ",
            entry_columns!(),
            " FROM ledger_entries WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_entry", e))?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn scan_events(&self, component_id: ComponentId) -> Result<Vec<ScanEvent>, StoreError> {
        let rows = sqlx::query_as::<_, ScanEventRow>(concat!(
            "SELECT ",
            scan_columns!(),
            " FROM scan_events WHERE component_id = $1 ORDER BY created_at DESC, ledger_entry_id DESC"
        ))
        .bind(component_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scan_events", e))?;

        rows.into_iter().map(ScanEvent::try_from).collect()
    }
}

/// A database transaction holding one component's row lock.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
    component: Component,
}

impl core::fmt::Debug for PostgresUnit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresUnit")
            .field("component", &self.component.id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerUnit for PostgresUnit {
    fn component(&self) -> &Component {
        &self.component
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO ledger_entries (",
            entry_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(entry.id.as_uuid())
        .bind(entry.component_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.quantity)
        .bind(&entry.reason)
        .bind(&entry.reference)
        .bind(entry.actor_id.as_uuid())
        .bind(entry.quantity_before)
        .bind(entry.quantity_after)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_entry", e))?;
        Ok(())
    }

    async fn append_scan_event(&mut self, event: &ScanEvent) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO scan_events (",
            scan_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(event.id.as_uuid())
        .bind(event.ledger_entry_id.as_uuid())
        .bind(&event.scan_code)
        .bind(event.component_id.as_uuid())
        .bind(event.kind.as_str())
        .bind(event.quantity)
        .bind(&event.location)
        .bind(event.actor_id.as_uuid())
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_scan_event", e))?;
        Ok(())
    }

    async fn record_movement(&mut self, update: &StockUpdate) -> Result<Component, StoreError> {
        let row = sqlx::query_as::<_, ComponentRow>(concat!(
            "UPDATE components SET quantity = $2, location = COALESCE($3, location), last_moved = $4 ",
            "WHERE id = $1 RETURNING ",
            component_columns!()
        ))
        .bind(self.component.id.as_uuid())
        .bind(update.quantity)
        .bind(&update.location)
        .bind(update.moved_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("record_movement", e))?;

        row.map(Component::from)
            .ok_or_else(|| StoreError::NotFound(format!("component {}", self.component.id)))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("23514") | Some("23503") | Some("23001") => StoreError::Constraint(msg),
                Some("40P01") | Some("40001") | Some("55P03") => StoreError::Conflict(msg),
                Some("57014") => StoreError::Timeout(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("timed out acquiring a connection in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// `LIMIT`/`OFFSET` values are `bigint`.
fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn parse_kind(raw: &str) -> Result<TransactionKind, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown transaction kind '{raw}'")))
}

struct ComponentRow {
    id: Uuid,
    name: String,
    part_number: Option<String>,
    quantity: i64,
    initial_quantity: i64,
    reorder_threshold: i64,
    location: Option<String>,
    scan_code: Option<String>,
    created_at: DateTime<Utc>,
    last_moved: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for ComponentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ComponentRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            part_number: row.try_get("part_number")?,
            quantity: row.try_get("quantity")?,
            initial_quantity: row.try_get("initial_quantity")?,
            reorder_threshold: row.try_get("reorder_threshold")?,
            location: row.try_get("location")?,
            scan_code: row.try_get("scan_code")?,
            created_at: row.try_get("created_at")?,
            last_moved: row.try_get("last_moved")?,
        })
    }
}

impl From<ComponentRow> for Component {
    fn from(row: ComponentRow) -> Self {
        Component {
            id: ComponentId::from_uuid(row.id),
            name: row.name,
            part_number: row.part_number,
            quantity: row.quantity,
            initial_quantity: row.initial_quantity,
            reorder_threshold: row.reorder_threshold,
            location: row.location,
            scan_code: row.scan_code,
            created_at: row.created_at,
            last_moved: row.last_moved,
        }
    }
}

struct LedgerEntryRow {
    id: Uuid,
    component_id: Uuid,
    kind: String,
    quantity: i64,
    reason: Option<String>,
    reference: Option<String>,
    actor_id: Uuid,
    quantity_before: i64,
    quantity_after: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerEntryRow {
            id: row.try_get("id")?,
            component_id: row.try_get("component_id")?,
            kind: row.try_get("kind")?,
            quantity: row.try_get("quantity")?,
            reason: row.try_get("reason")?,
            reference: row.try_get("reference")?,
            actor_id: row.try_get("actor_id")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: LedgerEntryId::from_uuid(row.id),
            component_id: ComponentId::from_uuid(row.component_id),
            kind: parse_kind(&row.kind)?,
            quantity: row.quantity,
            reason: row.reason,
            reference: row.reference,
            actor_id: ActorId::from_uuid(row.actor_id),
            quantity_before: row.quantity_before,
            quantity_after: row.quantity_after,
            created_at: row.created_at,
        })
    }
}

struct ScanEventRow {
    id: Uuid,
    ledger_entry_id: Uuid,
    scan_code: String,
    component_id: Uuid,
    kind: String,
    quantity: i64,
    location: Option<String>,
    actor_id: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ScanEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ScanEventRow {
            id: row.try_get("id")?,
            ledger_entry_id: row.try_get("ledger_entry_id")?,
            scan_code: row.try_get("scan_code")?,
            component_id: row.try_get("component_id")?,
            kind: row.try_get("kind")?,
            quantity: row.try_get("quantity")?,
            location: row.try_get("location")?,
            actor_id: row.try_get("actor_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<ScanEventRow> for ScanEvent {
    type Error = StoreError;

    fn try_from(row: ScanEventRow) -> Result<Self, Self::Error> {
        Ok(ScanEvent {
            id: ScanEventId::from_uuid(row.id),
            ledger_entry_id: LedgerEntryId::from_uuid(row.ledger_entry_id),
            scan_code: row.scan_code,
            component_id: ComponentId::from_uuid(row.component_id),
            kind: parse_kind(&row.kind)?,
            quantity: row.quantity,
            location: row.location,
            actor_id: ActorId::from_uuid(row.actor_id),
            created_at: row.created_at,
        })
    }
}
