use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use labstock_core::{ComponentId, LedgerEntryId};
use labstock_infra::EntryFilter;

use crate::app::dto::{self, TransactionView};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_entries).post(record_transaction))
        .route("/:id", get(get_entry))
}

pub async fn record_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::TransactionBody>,
) -> axum::response::Response {
    let request = match body.into_request(principal.actor_id()) {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services.apply(request).await {
        Ok(applied) => (StatusCode::CREATED, Json(TransactionView::from(applied))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Ledger entries across all components, newest first.
pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::EntryListQuery>,
) -> axum::response::Response {
    let component_id: Option<ComponentId> = match query.component_id.as_deref() {
        Some(raw) => match errors::parse_id(raw, "component") {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };
    let filter = EntryFilter {
        component_id,
        limit: query.limit(),
        offset: query.offset,
    };

    match services.list_entries(filter).await {
        Ok(entries) => {
            let returned = entries.len();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "transactions": entries,
                    "pagination": {
                        "limit": filter.limit,
                        "offset": filter.offset,
                        "returned": returned,
                    },
                })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: LedgerEntryId = match errors::parse_id(&id, "ledger entry") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.entry(id).await {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
