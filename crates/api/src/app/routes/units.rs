use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{post, put},
};
use chrono::Utc;
use serde_json::json;

use formgate_core::UnitId;

use crate::app::errors::access_error_to_response;
use crate::app::{dto, services::AppServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_unit))
        .route("/:id", put(update_unit).delete(delete_unit))
}

pub async fn create_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<dto::CreateUnitRequest>,
) -> axum::response::Response {
    match services
        .access
        .create_unit(caller.identity(), body.into(), Utc::now())
        .await
    {
        Ok(unit) => (StatusCode::CREATED, Json(dto::unit_to_json(&unit))).into_response(),
        Err(e) => access_error_to_response(e),
    }
}

pub async fn update_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateUnitRequest>,
) -> axum::response::Response {
    let unit_id = match id.parse::<UnitId>() {
        Ok(u) => u,
        Err(e) => return access_error_to_response(e),
    };
    match services
        .access
        .update_unit(caller.identity(), unit_id, body.into(), Utc::now())
        .await
    {
        Ok(unit) => (StatusCode::OK, Json(dto::unit_to_json(&unit))).into_response(),
        Err(e) => access_error_to_response(e),
    }
}

/// Deletes the unit and its whole subtree.
pub async fn delete_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let unit_id = match id.parse::<UnitId>() {
        Ok(u) => u,
        Err(e) => return access_error_to_response(e),
    };
    match services
        .access
        .delete_unit(caller.identity(), unit_id, Utc::now())
        .await
    {
        Ok(removed) => (StatusCode::OK, Json(json!({ "removed": removed }))).into_response(),
        Err(e) => access_error_to_response(e),
    }
}
