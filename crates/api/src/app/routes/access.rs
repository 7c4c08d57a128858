use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, put},
};
use chrono::Utc;
use serde_json::json;

use formgate_core::{AccessResult, RoleId};

use crate::app::errors::access_error_to_response;
use crate::app::{dto, services::AppServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/modules", get(list_modules))
        .route("/forms", get(list_forms))
        .route("/matrix", get(matrix))
        .route("/tree", get(tree))
        .route("/grants", put(set_user_permissions).delete(revoke_grant))
        .route("/roles/:id", delete(delete_role))
        .route("/roles/:id/grants", put(set_role_grants))
}

pub async fn list_modules(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let access = match services.access.caller(caller.identity(), Utc::now()).await {
        Ok(a) => a,
        Err(e) => return access_error_to_response(e),
    };
    let items = access
        .modules()
        .into_iter()
        .map(dto::module_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn list_forms(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let access = match services.access.caller(caller.identity(), Utc::now()).await {
        Ok(a) => a,
        Err(e) => return access_error_to_response(e),
    };
    let items = access
        .forms()
        .into_iter()
        .map(|(form, module)| dto::form_to_json(form, module))
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn matrix(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let access = match services.access.caller(caller.identity(), Utc::now()).await {
        Ok(a) => a,
        Err(e) => return access_error_to_response(e),
    };
    let effective = &access.access;

    let modules = access
        .modules()
        .into_iter()
        .map(|m| {
            let mut entry = dto::module_to_json(m);
            entry["actions"] = dto::actions_to_json(effective.module_actions(m.id));
            entry
        })
        .collect::<Vec<_>>();
    let forms = access
        .forms()
        .into_iter()
        .map(|(f, m)| {
            let mut entry = dto::form_to_json(f, m);
            entry["actions"] = dto::actions_to_json(effective.form_actions(f.id));
            entry
        })
        .collect::<Vec<_>>();

    (
        StatusCode::OK,
        Json(json!({
            "modules": modules,
            "forms": forms,
            "system": dto::system_to_json(effective.system),
        })),
    )
        .into_response()
}

pub async fn tree(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    let tree = match services
        .access
        .caller(caller.identity(), Utc::now())
        .await
        .and_then(|access| access.tree())
    {
        Ok(t) => t,
        Err(e) => return access_error_to_response(e),
    };
    (StatusCode::OK, Json(dto::tree_to_json(&tree))).into_response()
}

pub async fn set_user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Vec<dto::PermissionChangeRequest>>,
) -> axum::response::Response {
    let changes = match body
        .into_iter()
        .map(dto::PermissionChangeRequest::into_change)
        .collect::<AccessResult<Vec<_>>>()
    {
        Ok(c) => c,
        Err(e) => return access_error_to_response(e),
    };

    match services
        .access
        .set_user_permissions(caller.identity(), changes, Utc::now())
        .await
    {
        Ok(grants) => {
            let items = grants.iter().map(dto::grant_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!({ "items": items }))).into_response()
        }
        Err(e) => access_error_to_response(e),
    }
}

pub async fn set_role_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Json(body): Json<Vec<dto::RoleGrantRequest>>,
) -> axum::response::Response {
    let role_id = match id.parse::<RoleId>() {
        Ok(r) => r,
        Err(e) => return access_error_to_response(e),
    };
    let changes = match body
        .into_iter()
        .map(dto::RoleGrantRequest::into_change)
        .collect::<AccessResult<Vec<_>>>()
    {
        Ok(c) => c,
        Err(e) => return access_error_to_response(e),
    };

    match services
        .access
        .set_role_grants(caller.identity(), role_id, changes, Utc::now())
        .await
    {
        Ok(grants) => {
            let items = grants.iter().map(dto::grant_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!({ "items": items }))).into_response()
        }
        Err(e) => access_error_to_response(e),
    }
}

pub async fn revoke_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<dto::RevokeGrantRequest>,
) -> axum::response::Response {
    let key = match body.into_key() {
        Ok(k) => k,
        Err(e) => return access_error_to_response(e),
    };
    match services
        .access
        .revoke_grant(caller.identity(), key, Utc::now())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => access_error_to_response(e),
    }
}

/// Removes the role with its unit assignments and grants.
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let role_id = match id.parse::<RoleId>() {
        Ok(r) => r,
        Err(e) => return access_error_to_response(e),
    };
    match services
        .access
        .delete_role(caller.identity(), role_id, Utc::now())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => access_error_to_response(e),
    }
}
