//! Shared application state.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::auth::SessionStore;
use crate::backend::Backend;

pub struct AppState {
    pub backend: Backend,
    pub sessions: SessionStore,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub pending_timeout: Duration,
}

pub type SharedState = Arc<Mutex<AppState>>;

impl AppState {
    pub fn new(backend: Backend, pending_timeout: Duration) -> Self {
        Self {
            backend,
            sessions: SessionStore::new(),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            pending_timeout,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }
}
