// crates/server/src/routes/preview.rs
//! One-image preview: apply a template to the first discovered image and
//! return the PNG bytes, without creating a job.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use stamper_core::{enumerate_images, OutputFormat, Template};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub input_dir: PathBuf,
    /// Stored template name, or…
    #[serde(default)]
    pub template_name: Option<String>,
    /// …an inline template for unsaved previews.
    #[serde(default)]
    pub template: Option<Template>,
}

/// POST /api/preview — render one preview image.
async fn preview(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let template = match (&req.template_name, req.template) {
        (Some(name), _) => state
            .templates
            .get(name)
            .ok_or_else(|| ApiError::BadRequest(format!("template '{name}' not found")))?,
        (None, Some(inline)) => inline,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "provide templateName or an inline template".to_string(),
            ))
        }
    };

    let items =
        enumerate_images(&req.input_dir).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let first = items.into_iter().next().ok_or_else(|| {
        ApiError::BadRequest(format!("no images found in {}", req.input_dir.display()))
    })?;

    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
        let workdir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let out = workdir.path().join("preview.png");
        stamper_core::watermark::apply(&first.src, &out, &template, OutputFormat::Png, 90)
            .map_err(|e| e.to_string())?;
        std::fs::read(&out).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("preview task failed: {e}")))?
    .map_err(ApiError::Internal)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

/// Build the preview sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/preview", post(preview))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let config = AppConfig {
            templates_path: dir.path().join("templates.json"),
            ..AppConfig::default()
        };
        AppState::new(config).unwrap()
    }

    #[tokio::test]
    async fn preview_without_template_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.png"), b"x").unwrap();

        let body = serde_json::json!({ "inputDir": input.path() });
        let response = crate::routes::api_routes(test_state(&dir))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/preview")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preview_with_empty_dir_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let input = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        state
            .templates
            .upsert("t", Template::default())
            .unwrap();

        let body = serde_json::json!({ "inputDir": input.path(), "templateName": "t" });
        let response = crate::routes::api_routes(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/preview")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
