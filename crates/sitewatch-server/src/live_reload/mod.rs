//! Change detection and rebuild scheduling.
//!
//! The resolver expands a watch root into real filesystem paths, the watcher
//! maps notify events back to registrations, and the scheduler coalesces the
//! resulting dirty registrations into build cycles that advance the epoch.

pub(crate) mod epoch;
pub mod resolver;
pub(crate) mod scheduler;
pub(crate) mod watcher;

use std::fmt;
use std::path::PathBuf;

use crate::BuildCallback;

/// A watch root together with the callback it triggers.
///
/// Registrations are never removed; `id` is the registration order.
pub(crate) struct Registration {
    pub id: usize,
    pub root: PathBuf,
    pub callback: BuildCallback,
}

impl Registration {
    /// Identity of the callback, used to run each distinct callback once.
    pub(crate) fn callback_key(&self) -> *const () {
        std::sync::Arc::as_ptr(&self.callback).cast::<()>()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
