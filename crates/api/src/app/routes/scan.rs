use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use labstock_inventory::ComponentRef;

use crate::app::dto::{self, ComponentView, TransactionView};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(record_scan))
        .route("/:code", get(lookup_code))
}

pub async fn record_scan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ScanBody>,
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

/// Resolve a scanned code to its component before the user picks a movement.
pub async fn lookup_code(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> axum::response::Response {
    match services.component(&ComponentRef::scan_code(code)).await {
        Ok(component) => (StatusCode::OK, Json(ComponentView::from(component))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
