use axum::{Router, routing::get};

pub mod components;
pub mod scan;
pub mod system;
pub mod transactions;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/components", components::router())
        .nest("/transactions", transactions::router())
        .nest("/scan", scan::router())
}
