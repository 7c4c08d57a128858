use axum::{Router, routing::get};

pub mod access;
pub mod modules;
pub mod system;
pub mod units;

pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/access", access::router())
        .nest("/units", units::router())
        .nest("/modules", modules::router())
}
