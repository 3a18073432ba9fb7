// crates/server/src/routes/templates.rs
//! Template CRUD routes.
//!
//! - GET    /templates        — list all templates
//! - PUT    /templates/{name} — create or update one template
//! - DELETE /templates/{name} — delete a template

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use stamper_core::{Template, TemplateError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/templates — all templates keyed by name.
async fn list_templates(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, Template>> {
    Json(state.templates.list())
}

/// PUT /api/templates/{name} — create or replace a template.
async fn put_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(template): Json<Template>,
) -> ApiResult<Json<Template>> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("template name must not be empty".into()));
    }
    state
        .templates
        .upsert(&name, template.clone())
        .map_err(|e| match e {
            TemplateError::MissingImagePath { .. } => ApiError::BadRequest(e.to_string()),
            other => ApiError::from(other),
        })?;
    tracing::info!(template = %name, "template saved");
    Ok(Json(template))
}

/// DELETE /api/templates/{name}.
async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if state.templates.remove(&name)? {
        tracing::info!(template = %name, "template deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::TemplateNotFound(name))
    }
}

/// Build the templates sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/templates", get(list_templates))
        .route(
            "/templates/{name}",
            axum::routing::put(put_template).delete(delete_template),
        )
}
