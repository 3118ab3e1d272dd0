//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the ledger engine behind the handlers
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use labstock_infra::EngineConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router around existing services.
pub fn build_router(services: Arc<AppServices>, jwt_secret: String) -> Router {
    let jwt = Arc::new(labstock_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a valid bearer token.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::log_requests))
                .layer(Extension(services)),
        )
}

/// Router over a fresh in-memory ledger with default bounds.
pub fn build_app(jwt_secret: String) -> Router {
    let services = Arc::new(AppServices::in_memory(EngineConfig::default()));
    build_router(services, jwt_secret)
}
