//! Configuration types and constants for the cotask-web server.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub(crate) const FEED_CHANNEL_CAPACITY: usize = 1024;
pub(crate) const MAX_WS_CONNECTIONS: usize = 64;
pub(crate) const DEFAULT_PENDING_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_SEARCH_LIMIT: u32 = 20;
/// Leaves room above the avatar cap so oversized uploads reach validation.
pub(crate) const AVATAR_BODY_LIMIT: usize = 2 * crate::avatar::MAX_AVATAR_BYTES;

/// Web server for shared todo lists and notes.
///
/// Provides a REST API and a WebSocket change stream, and persists state in
/// SQLite.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "cotask-web", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: COTASK_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database and avatars [env: COTASK_HOME] [default: ~/.cotask]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Seconds before an unconfirmed optimistic change is dropped [env: COTASK_PENDING_TIMEOUT] [default: 10]
    #[arg(long)]
    pub pending_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub pending_timeout: Duration,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("COTASK_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".cotask"))
                    .unwrap_or_else(|_| PathBuf::from(".cotask"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("COTASK_BIND").ok())
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());

        let pending_timeout_secs = cli
            .pending_timeout_secs
            .or_else(|| {
                std::env::var("COTASK_PENDING_TIMEOUT")
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
            })
            .unwrap_or(DEFAULT_PENDING_TIMEOUT_SECS);

        Self {
            bind_addr,
            data_dir,
            pending_timeout: Duration::from_secs(pending_timeout_secs),
        }
    }
}
