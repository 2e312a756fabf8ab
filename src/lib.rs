pub mod auth;
pub mod avatar;
pub mod backend;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod permissions;
pub mod reconcile;
pub mod sharing;
pub mod storage;
pub mod web;

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
