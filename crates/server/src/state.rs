// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use stamper_core::TemplateStore;

use crate::config::AppConfig;
use crate::jobs::JobRegistry;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Named watermark templates, file-backed.
    pub templates: TemplateStore,
    /// Job registry: the process-wide id → job map, explicitly constructed
    /// here and nowhere else.
    pub jobs: Arc<JobRegistry>,
    /// Runtime knobs (worker concurrency, grace windows, eviction timeout).
    pub config: AppConfig,
}

impl AppState {
    /// Create application state wrapped in an `Arc` for sharing.
    pub fn new(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let templates = TemplateStore::open(&config.templates_path)?;
        Ok(Arc::new(Self {
            start_time: Instant::now(),
            templates,
            jobs: Arc::new(JobRegistry::new()),
            config,
        }))
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            templates_path: dir.path().join("templates.json"),
            ..AppConfig::default()
        };
        let state = AppState::new(config).unwrap();
        assert!(state.jobs.is_empty());
        assert!(state.templates.list().is_empty());
        assert!(state.uptime_secs() < 1);
    }
}
