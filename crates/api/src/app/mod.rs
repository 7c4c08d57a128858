//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the shared access service
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use formgate_access::SessionValidator;
use formgate_infra::AppConfig;

use crate::middleware;
use crate::session::Hs256SessionValidator;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from configuration (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(config).await?);
    let sessions = Arc::new(Hs256SessionValidator::new(config.session_secret.as_bytes()));
    Ok(router(services, sessions))
}

/// Router over already-built services.
pub fn router(services: Arc<services::AppServices>, sessions: Arc<dyn SessionValidator>) -> Router {
    let auth_state = middleware::AuthState { sessions };

    // Protected routes: require a valid session.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
