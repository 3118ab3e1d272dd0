use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use labstock_core::ComponentId;
use labstock_inventory::ComponentRef;

use crate::app::dto::{self, ComponentListView, ComponentView};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_components).post(register_component))
        .route("/low-stock", get(low_stock))
        .route("/:id", get(get_component))
        .route("/:id/history", get(get_history))
        .route("/:id/scans", get(get_scans))
        .route("/:id/audit", get(audit_component))
        .route("/:id/scan-code", post(assign_scan_code))
}

/// One page of the catalog, ordered by name.
pub async fn list_components(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ComponentListQuery>,
) -> axum::response::Response {
    match services.list_components(query.page(), query.limit()).await {
        Ok(page) => (StatusCode::OK, Json(ComponentListView::from(page))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn register_component(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterComponentRequest>,
) -> axum::response::Response {
    match services.register_component(body.into()).await {
        Ok(component) => (StatusCode::CREATED, Json(ComponentView::from(component))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_component(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ComponentId = match errors::parse_id(&id, "component") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.component(&ComponentRef::Id(id)).await {
        Ok(component) => (StatusCode::OK, Json(ComponentView::from(component))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let id: ComponentId = match errors::parse_id(&id, "component") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.history(&ComponentRef::Id(id), query.limit()).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_scans(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ComponentId = match errors::parse_id(&id, "component") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.scan_events(&ComponentRef::Id(id)).await {
        Ok(scans) => (StatusCode::OK, Json(scans)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Replays the component's ledger; `consistent: false` means the cached
/// quantity and the ledger disagree.
pub async fn audit_component(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ComponentId = match errors::parse_id(&id, "component") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.audit(&ComponentRef::Id(id)).await {
        Ok(report) => {
            let consistent = report.is_consistent();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "consistent": consistent,
                    "report": report,
                })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn assign_scan_code(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::AssignScanCodeBody>>,
) -> axum::response::Response {
    let id: ComponentId = match errors::parse_id(&id, "component") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match services.assign_scan_code(id, body.scan_code).await {
        Ok(component) => (StatusCode::OK, Json(ComponentView::from(component))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn low_stock(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.low_stock().await {
        Ok(components) => (
            StatusCode::OK,
            Json(components.into_iter().map(ComponentView::from).collect::<Vec<_>>()),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
