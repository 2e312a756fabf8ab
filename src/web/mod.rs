//! cotask-web: HTTP and WebSocket front end.
//!
//! Provides the REST API and a per-user change stream over WebSocket, and
//! persists state in SQLite under the data directory.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod utils;

use clap::Parser;

use crate::backend::Backend;
use crate::feed::ChangeFeed;
use crate::storage::db_path;

use config::{Cli, Config, FEED_CHANNEL_CAPACITY};
use state::AppState;

/// Entry point: parse CLI, open storage, start server.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::clog!("cotask-web starting");
    crate::clog!("  data directory: {}", config.data_dir.display());
    crate::clog!("  database: {}", db_path(&config.data_dir).display());
    crate::clog!(
        "  pending timeout: {}s",
        config.pending_timeout.as_secs()
    );

    let backend = Backend::open(&config.data_dir, ChangeFeed::new(FEED_CHANNEL_CAPACITY))?;
    let state = AppState::new(backend, config.pending_timeout).shared();

    // Build Axum router
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    crate::clog!("cotask-web listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
