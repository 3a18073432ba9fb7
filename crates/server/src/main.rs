// crates/server/src/main.rs
//! Stamper server binary.
//!
//! Binds the HTTP server, opens the browser (unless disabled) and serves
//! until killed. All batch work happens in background jobs spawned by the
//! API; nothing blocks startup.

use std::net::SocketAddr;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use stamper_server::{create_app, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = AppConfig::from_env();
    let port = config.port;
    tracing::info!(
        workers = config.worker_concurrency,
        templates = %config.templates_path.display(),
        "starting stamper"
    );

    let state = AppState::new(config)?;
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    eprintln!("\n  stamper v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  \u{2192} http://localhost:{port}\n");

    if std::env::var_os("STAMPER_NO_OPEN").is_none() {
        let url = format!("http://localhost:{port}");
        if let Err(e) = open::that(&url) {
            tracing::debug!(error = %e, "could not open browser");
        }
    }

    axum::serve(listener, app).await?;
    Ok(())
}
