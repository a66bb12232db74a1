//! Server lifecycle.
//!
//! Ties the watcher, the build scheduler and the HTTP router together and
//! tears them down in order on shutdown.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::net::TcpListener;

use crate::error::ServerError;
use crate::live_reload::epoch::Epoch;
use crate::live_reload::scheduler::{self, BuildQueue};
use crate::live_reload::watcher::ChangeWatcher;
use crate::state::AppState;
use crate::{BuildCallback, ServerConfig, app};

/// A running live-reload server.
///
/// Cloning yields another handle to the same server. Background threads stop
/// on [`shutdown`](Self::shutdown), when [`serve`](Self::serve) returns, or
/// when the last handle is dropped.
#[derive(Clone)]
pub struct LiveReloadServer {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    state: Arc<AppState>,
    queue: Arc<BuildQueue>,
    watcher: ChangeWatcher,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    default_builder: BuildCallback,
}

impl Inner {
    fn shutdown(&self) {
        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        // Release parked long-polls before waiting on anything else
        self.state.epoch.close();
        self.queue.shutdown();
        self.watcher.stop();
        if handle.join().is_err() {
            tracing::error!("Build scheduler thread panicked");
        }
        tracing::info!("Live reload stopped");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl LiveReloadServer {
    /// Start the watcher and the build scheduler.
    ///
    /// `default_builder` runs for registrations added without their own
    /// callback. No paths are watched until [`watch`](Self::watch) is called,
    /// and no requests are served until [`serve`](Self::serve).
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher or the scheduler thread
    /// cannot be created.
    pub fn start(config: ServerConfig, default_builder: BuildCallback) -> Result<Self, ServerError> {
        let epoch = Epoch::new();
        let queue = Arc::new(BuildQueue::new(config.build_delay));
        let watcher = ChangeWatcher::start(Arc::clone(&queue))?;
        let scheduler = match scheduler::spawn(Arc::clone(&queue), epoch.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                watcher.stop();
                return Err(err.into());
            }
        };
        let state = Arc::new(AppState::new(&config, epoch));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state,
                queue,
                watcher,
                scheduler: Mutex::new(Some(scheduler)),
                default_builder,
            }),
        })
    }

    /// Watch `path` and run `builder` (or the default builder) when anything
    /// under it changes.
    ///
    /// Symlinks under `path` are followed, so edits to their targets are
    /// detected too. Observation is active when this returns. Safe to call
    /// while serving and while a build is running.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not exist or cannot be watched.
    pub fn watch(&self, path: impl AsRef<Path>, builder: Option<BuildCallback>) -> Result<(), ServerError> {
        let callback = builder.unwrap_or_else(|| Arc::clone(&self.inner.default_builder));
        let registration = self.inner.watcher.register(path.as_ref(), callback)?;
        tracing::info!(path = %registration.root.display(), "Watching paths for changes");
        Ok(())
    }

    /// The HTTP router, for serving on a custom transport.
    pub fn router(&self) -> axum::Router {
        app::create_router(Arc::clone(&self.inner.state))
    }

    /// Current build epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.state.epoch.current()
    }

    /// Normalized URL prefix the site is served under, such as `/` or `/docs/`.
    #[must_use]
    pub fn mount_path(&self) -> &str {
        &self.inner.state.mount_path
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Bind the configured address and serve until `signal` resolves or
    /// [`shutdown`](Self::shutdown) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve<F>(&self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = format!("{}:{}", self.inner.config.host, self.inner.config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves or
    /// [`shutdown`](Self::shutdown) is called.
    ///
    /// Background threads are stopped and joined before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve_on<F>(&self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = listener.local_addr()?;
        tracing::info!("Serving on http://{address}{}", self.inner.state.mount_path);

        let epoch = self.inner.state.epoch.clone();
        let stop = async move {
            tokio::select! {
                () = signal => tracing::info!("Shutdown signal received, stopping server..."),
                () = epoch.closed() => {}
            }
            epoch.close();
        };

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(stop)
            .await;

        let inner = Arc::clone(&self.inner);
        if tokio::task::spawn_blocking(move || inner.shutdown()).await.is_err() {
            tracing::error!("Server shutdown panicked");
        }
        result.map_err(ServerError::Serve)
    }

    /// Stop serving, release parked long-polls, and join the watcher and
    /// scheduler threads.
    ///
    /// Blocks until the background threads have exited; a build that is
    /// running finishes first. Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.epoch.is_closed()
    }
}

impl std::fmt::Debug for LiveReloadServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReloadServer")
            .field("config", &self.inner.config)
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
