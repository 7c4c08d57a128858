use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post, put},
};
use chrono::Utc;
use serde_json::json;

use formgate_core::ModuleId;

use crate::app::errors::access_error_to_response;
use crate::app::{dto, services::AppServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_module))
        .route("/:id", delete(delete_module))
        .route("/:id/submodules", put(replace_submodules))
}

pub async fn create_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<dto::CreateModuleRequest>,
) -> axum::response::Response {
    match services
        .access
        .create_module(caller.identity(), body.into(), Utc::now())
        .await
    {
        Ok(module) => (StatusCode::CREATED, Json(dto::module_to_json(&module))).into_response(),
        Err(e) => access_error_to_response(e),
    }
}

pub async fn delete_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let module_id = match id.parse::<ModuleId>() {
        Ok(m) => m,
        Err(e) => return access_error_to_response(e),
    };
    match services
        .access
        .delete_module(caller.identity(), module_id, Utc::now())
        .await
    {
        Ok(removed) => (StatusCode::OK, Json(json!({ "removed": removed }))).into_response(),
        Err(e) => access_error_to_response(e),
    }
}

/// The body is the complete list of direct children; anything missing is removed.
pub async fn replace_submodules(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Json(body): Json<Vec<dto::SubmoduleRequest>>,
) -> axum::response::Response {
    let parent_id = match id.parse::<ModuleId>() {
        Ok(m) => m,
        Err(e) => return access_error_to_response(e),
    };
    let desired = body.into_iter().map(Into::into).collect();
    match services
        .access
        .replace_submodules(caller.identity(), parent_id, desired, Utc::now())
        .await
    {
        Ok(children) => {
            let items = children.iter().map(dto::module_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!({ "items": items }))).into_response()
        }
        Err(e) => access_error_to_response(e),
    }
}
