//! Live-reload development server.
//!
//! This crate serves a generated site directory over HTTP, watches the source
//! paths that produce it, runs build callbacks when they change and tells
//! connected browser tabs to reload:
//! - Static files from the output directory, with the reload script injected
//!   into every HTML page
//! - The reload client script at `/js/livereload.js`
//! - A long-polling endpoint at `/livereload/{epoch}/{request_id}`
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use sitewatch_server::{LiveReloadServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         root: PathBuf::from("site"),
//!         ..ServerConfig::default()
//!     };
//!     let server = LiveReloadServer::start(config, Arc::new(|| Ok(()))).unwrap();
//!     server.watch("docs", None).unwrap();
//!     server.serve(async { tokio::signal::ctrl_c().await.unwrap() }).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router (tokio tasks)
//!                        │
//!                        ├─► Site files (read from disk per request, HTML rewritten)
//!                        │
//!                        └─► Long poll ──waits on──► Epoch
//!                                                      ▲
//! notify ──► watcher thread ──► BuildQueue ──► scheduler thread ──► build callbacks
//! ```

mod app;
mod error;
mod handlers;
mod html;
mod live_reload;
mod middleware;
mod server;
mod site;
mod state;
#[cfg(test)]
mod test_support;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use error::ServerError;
pub use live_reload::resolver::{WatchTarget, resolve_watch_targets};
pub use server::LiveReloadServer;

/// Boxed error type returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a build callback.
pub type BuildResult = Result<(), BoxError>;

/// A build callback, invoked on the scheduler thread.
///
/// Callbacks are compared by identity: registering the same `Arc` for several
/// paths makes it run once per cycle no matter how many of them changed.
pub type BuildCallback = Arc<dyn Fn() -> BuildResult + Send + Sync>;

/// Custom renderer for error response bodies, given the HTTP status code.
pub type ErrorRenderer = Arc<dyn Fn(u16) -> Result<Vec<u8>, BoxError> + Send + Sync>;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Directory with the generated site.
    pub root: PathBuf,
    /// URL prefix the site is served under.
    pub mount_path: String,
    /// Settle window between the first change and the build.
    pub build_delay: Duration,
    /// Longest time a long-poll request is held open.
    pub poll_response_timeout: Duration,
    /// Custom error page renderer.
    pub error_renderer: Option<ErrorRenderer>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            root: PathBuf::from("site"),
            mount_path: "/".to_owned(),
            build_delay: Duration::from_millis(100),
            poll_response_timeout: Duration::from_secs(60),
            error_renderer: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("root", &self.root)
            .field("mount_path", &self.mount_path)
            .field("build_delay", &self.build_delay)
            .field("poll_response_timeout", &self.poll_response_timeout)
            .field("error_renderer", &self.error_renderer.is_some())
            .finish()
    }
}
