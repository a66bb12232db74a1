//! Error types for the live-reload server.

use std::path::PathBuf;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A watch root could not be resolved or observed.
    #[error("Cannot watch {}: {source}", path.display())]
    Watch {
        /// Path passed to `watch`.
        path: PathBuf,
        /// Underlying watcher error.
        #[source]
        source: notify::Error,
    },

    /// The filesystem watcher backend could not be created.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Binding the listening socket failed.
    #[error("Cannot bind {address}: {source}")]
    Bind {
        /// Address the server tried to bind.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server failed while running.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The server has already been shut down.
    #[error("Server is shut down")]
    ShutDown,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn watch(path: impl Into<PathBuf>, source: impl Into<notify::Error>) -> Self {
        Self::Watch {
            path: path.into(),
            source: source.into(),
        }
    }
}
