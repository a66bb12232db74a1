//! Application state.
//!
//! Shared state for all request handlers.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::live_reload::epoch::Epoch;
use crate::{ErrorRenderer, ServerConfig};

/// Number of recently connected pages remembered for connection logging.
const CONNECTED_PAGES: usize = 1024;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Directory with the generated site.
    pub(crate) root: PathBuf,
    /// Normalized URL prefix, always of the form `/` or `/prefix/`.
    pub(crate) mount_path: String,
    /// Build epoch browsers wait on.
    pub(crate) epoch: Epoch,
    /// Longest time a long-poll request is held open.
    pub(crate) poll_timeout: Duration,
    /// Custom error page renderer.
    pub(crate) error_renderer: Option<ErrorRenderer>,
    next_request_id: AtomicU64,
    connected: Mutex<BTreeSet<u64>>,
}

impl AppState {
    pub(crate) fn new(config: &ServerConfig, epoch: Epoch) -> Self {
        Self {
            root: config.root.clone(),
            mount_path: normalize_mount_path(&config.mount_path),
            epoch,
            poll_timeout: config.poll_response_timeout,
            error_renderer: config.error_renderer.clone(),
            next_request_id: AtomicU64::new(1),
            connected: Mutex::new(BTreeSet::new()),
        }
    }

    /// Allocate an id for a served HTML page.
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record that the page with `request_id` started polling.
    ///
    /// Returns `true` the first time an id is seen. Only the most recent
    /// ids are remembered; the oldest are dropped first.
    pub(crate) fn mark_connected(&self, request_id: u64) -> bool {
        let mut connected = self
            .connected
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if connected.first().is_some_and(|&oldest| request_id < oldest)
            && connected.len() >= CONNECTED_PAGES
        {
            return false;
        }
        let inserted = connected.insert(request_id);
        while connected.len() > CONNECTED_PAGES {
            connected.pop_first();
        }
        inserted
    }

    /// Timeout in milliseconds handed to the reload script.
    pub(crate) fn poll_timeout_ms(&self) -> u64 {
        u64::try_from(self.poll_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Normalize a mount path to start and end with a slash.
pub(crate) fn normalize_mount_path(mount_path: &str) -> String {
    let trimmed = mount_path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}/")
    }
}
