//! API route handlers for the stamper server.

pub mod health;
pub mod jobs;
pub mod preview;
pub mod templates;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health             - Health check
/// - GET    /api/templates          - List watermark templates
/// - PUT    /api/templates/{name}   - Create/update a template
/// - DELETE /api/templates/{name}   - Delete a template
/// - POST   /api/preview            - One-image preview (PNG bytes)
/// - POST   /api/jobs               - Start a batch job
/// - GET    /api/jobs               - List known jobs
/// - GET    /api/jobs/{id}          - Poll one job's snapshot
/// - GET    /api/jobs/{id}/stream   - SSE progress for an existing job
/// - GET    /api/jobs/stream        - Start + SSE stream in one request
/// - POST   /api/jobs/{id}/cancel   - Request cancellation (idempotent)
/// - DELETE /api/jobs/{id}          - Acknowledge a finished job
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", templates::router())
        .nest("/api", preview::router())
        .nest("/api", jobs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn api_routes_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            templates_path: dir.path().join("templates.json"),
            ..AppConfig::default()
        };
        let state = AppState::new(config).unwrap();
        let _router = api_routes(state);
    }
}
