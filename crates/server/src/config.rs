// crates/server/src/config.rs
//! Runtime configuration resolved from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8980;

/// Knobs for the job subsystem and server, with environment overrides.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port (`STAMPER_PORT`, then `PORT`).
    pub port: u16,
    /// Template store file (`STAMPER_TEMPLATES`).
    pub templates_path: PathBuf,
    /// Worker concurrency per job (`STAMPER_WORKERS`); defaults to the
    /// number of available processing units.
    pub worker_concurrency: usize,
    /// How long a cancelled or failed job waits for in-flight work to drain
    /// before finalizing anyway (`STAMPER_CANCEL_GRACE_SECS`).
    pub cancel_grace: Duration,
    /// How long a terminal job stays in the registry before timeout
    /// eviction, if the client never acknowledges it
    /// (`STAMPER_EVICT_AFTER_SECS`).
    pub evict_after: Duration,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_templates_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stamper")
        .join("templates.json")
}

impl AppConfig {
    /// Resolve configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            port: env_parse("STAMPER_PORT")
                .or_else(|| env_parse("PORT"))
                .unwrap_or(DEFAULT_PORT),
            templates_path: std::env::var("STAMPER_TEMPLATES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_templates_path()),
            worker_concurrency: env_parse::<usize>("STAMPER_WORKERS")
                .filter(|&n| n > 0)
                .unwrap_or_else(default_workers),
            cancel_grace: Duration::from_secs(
                env_parse("STAMPER_CANCEL_GRACE_SECS").unwrap_or(30),
            ),
            evict_after: Duration::from_secs(
                env_parse("STAMPER_EVICT_AFTER_SECS").unwrap_or(300),
            ),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            templates_path: default_templates_path(),
            worker_concurrency: default_workers(),
            cancel_grace: Duration::from_secs(30),
            evict_after: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(cfg.worker_concurrency >= 1);
        assert!(cfg.cancel_grace >= Duration::from_secs(1));
        assert!(cfg.evict_after > cfg.cancel_grace);
    }
}
