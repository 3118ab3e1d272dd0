use serde::{Deserialize, Serialize};

use labstock_core::{ActorId, ComponentId};
use labstock_infra::{AppliedTransaction, ComponentPage, LedgerError};
use labstock_inventory::{
    Component, ComponentRef, LedgerEntry, NewComponent, ScanEvent, StockStatus, TransactionKind,
    TransactionRequest,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;
const DEFAULT_PAGE_SIZE: usize = 50;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterComponentRequest {
    pub name: String,
    pub part_number: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    pub reorder_threshold: Option<i64>,
    pub location: Option<String>,
}

impl From<RegisterComponentRequest> for NewComponent {
    fn from(body: RegisterComponentRequest) -> Self {
        NewComponent {
            name: body.name,
            part_number: body.part_number,
            quantity: body.quantity,
            reorder_threshold: body.reorder_threshold,
            location: body.location,
        }
    }
}

/// A manual transaction against a component id.
#[derive(Debug, Deserialize)]
pub struct TransactionBody {
    pub component_id: String,
    #[serde(alias = "transaction_type")]
    pub kind: String,
    pub quantity: i64,
    pub reason: Option<String>,
    pub reference: Option<String>,
}

impl TransactionBody {
    pub fn into_request(self, actor_id: ActorId) -> Result<TransactionRequest, LedgerError> {
        let component_id: ComponentId = self
            .component_id
            .parse()
            .map_err(|_| LedgerError::InvalidRequest(format!("invalid component id '{}'", self.component_id)))?;
        let kind: TransactionKind = self.kind.parse()?;

        Ok(TransactionRequest {
            component: ComponentRef::Id(component_id),
            kind,
            quantity: self.quantity,
            reason: self.reason,
            reference: self.reference,
            actor_id,
            scan_location: None,
        })
    }
}

/// A transaction triggered by scanning a QR label.
#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub scan_code: String,
    #[serde(alias = "transaction_type")]
    pub kind: String,
    pub quantity: i64,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub reference: Option<String>,
}

impl ScanBody {
    pub fn into_request(self, actor_id: ActorId) -> Result<TransactionRequest, LedgerError> {
        let kind: TransactionKind = self.kind.parse()?;

        Ok(TransactionRequest {
            component: ComponentRef::scan_code(self.scan_code),
            kind,
            quantity: self.quantity,
            reason: self.reason,
            reference: self.reference,
            actor_id,
            scan_location: self.location,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignScanCodeBody {
    pub scan_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// `?page=&limit=` for the catalog; pages start at 1.
#[derive(Debug, Default, Deserialize)]
pub struct ComponentListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl ComponentListQuery {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryListQuery {
    pub component_id: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl EntryListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ComponentView {
    #[serde(flatten)]
    pub component: Component,
    pub stock_status: StockStatus,
}

impl From<Component> for ComponentView {
    fn from(component: Component) -> Self {
        let stock_status = component.stock_status();
        Self { component, stock_status }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: u64,
    pub total_components: u64,
    pub per_page: usize,
}

#[derive(Debug, Serialize)]
pub struct ComponentListView {
    pub components: Vec<ComponentView>,
    pub pagination: Pagination,
}

impl From<ComponentPage> for ComponentListView {
    fn from(page: ComponentPage) -> Self {
        let pagination = Pagination {
            current_page: page.page,
            total_pages: page.total_pages(),
            total_components: page.total,
            per_page: page.per_page,
        };
        Self {
            components: page.components.into_iter().map(ComponentView::from).collect(),
            pagination,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub entry: LedgerEntry,
    pub scan_event: Option<ScanEvent>,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub component: ComponentView,
}

impl From<AppliedTransaction> for TransactionView {
    fn from(applied: AppliedTransaction) -> Self {
        Self {
            entry: applied.entry,
            scan_event: applied.scan_event,
            previous_quantity: applied.previous_quantity,
            new_quantity: applied.new_quantity,
            component: applied.component.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_is_defaulted_and_clamped() {
        assert_eq!(HistoryQuery::default().limit(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(HistoryQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(HistoryQuery { limit: Some(10_000) }.limit(), MAX_HISTORY_LIMIT);
    }

    #[test]
    fn listing_queries_have_defaults() {
        let catalog = ComponentListQuery::default();
        assert_eq!((catalog.page(), catalog.limit()), (1, DEFAULT_PAGE_SIZE));
        let zeroed = ComponentListQuery { page: Some(0), limit: Some(0) };
        assert_eq!((zeroed.page(), zeroed.limit()), (1, 1));

        let entries: EntryListQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!((entries.limit(), entries.offset), (DEFAULT_HISTORY_LIMIT, 0));
        assert!(entries.component_id.is_none());
    }

    #[test]
    fn scan_body_trims_the_code() {
        let scan = ScanBody {
            scan_code: "  QR-7 ".to_string(),
            kind: "out".to_string(),
            quantity: 1,
            location: None,
            reason: None,
            reference: None,
        };
        let request = scan.into_request(ActorId::new()).unwrap();
        assert_eq!(request.component, ComponentRef::ScanCode("QR-7".to_string()));
    }

    #[test]
    fn transaction_body_accepts_legacy_field_name() {
        let id = ComponentId::new();
        let body: TransactionBody = serde_json::from_value(serde_json::json!({
            "component_id": id.to_string(),
            "transaction_type": "in",
            "quantity": 4,
        }))
        .unwrap();

        let request = body.into_request(ActorId::new()).unwrap();
        assert_eq!(request.component, ComponentRef::Id(id));
        assert_eq!(request.kind, TransactionKind::Inward);
        assert!(request.scan_location.is_none());
    }

    #[test]
    fn bad_kind_or_id_is_an_invalid_request() {
        let body = TransactionBody {
            component_id: "not-a-uuid".to_string(),
            kind: "inward".to_string(),
            quantity: 1,
            reason: None,
            reference: None,
        };
        assert!(matches!(body.into_request(ActorId::new()), Err(LedgerError::InvalidRequest(_))));

        let scan = ScanBody {
            scan_code: "QR-1".to_string(),
            kind: "sideways".to_string(),
            quantity: 1,
            location: None,
            reason: None,
            reference: None,
        };
        assert!(matches!(scan.into_request(ActorId::new()), Err(LedgerError::InvalidRequest(_))));
    }
}
