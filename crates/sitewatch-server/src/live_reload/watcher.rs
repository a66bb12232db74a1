//! Filesystem watcher.
//!
//! Wraps a notify watcher and keeps a reverse index from resolved real paths
//! to the registrations that own them. A dedicated thread receives notify
//! events, looks up the affected registrations and marks them dirty.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{MetadataKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::Registration;
use super::resolver::{WatchTarget, resolve_watch_targets};
use super::scheduler::BuildQueue;
use crate::BuildCallback;
use crate::error::ServerError;

/// How often the dispatch thread checks for shutdown while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often every root is resolved again to find new symlink targets.
const RESOLVE_INTERVAL: Duration = Duration::from_secs(2);

/// Registrations, their resolved targets and the directories handed to notify.
struct WatchIndex {
    registrations: Vec<Arc<Registration>>,
    targets: BTreeMap<WatchTarget, BTreeSet<usize>>,
    /// Observed directories and whether they are watched recursively.
    observed: BTreeMap<PathBuf, bool>,
    backend: Option<RecommendedWatcher>,
}

impl WatchIndex {
    fn new(backend: Option<RecommendedWatcher>) -> Self {
        Self {
            registrations: Vec::new(),
            targets: BTreeMap::new(),
            observed: BTreeMap::new(),
            backend,
        }
    }

    /// Returns `true` if the target is new for this registration.
    fn add_target(&mut self, target: WatchTarget, id: usize) -> notify::Result<bool> {
        let (dir, recursive) = target.observed_dir();
        let dir = dir.to_path_buf();
        self.observe(&dir, recursive)?;
        Ok(self.targets.entry(target).or_default().insert(id))
    }

    fn forget(&mut self, id: usize) {
        self.targets.retain(|_, owners| {
            owners.remove(&id);
            !owners.is_empty()
        });
    }

    fn observe(&mut self, dir: &Path, recursive: bool) -> notify::Result<()> {
        let covered = self.observed.iter().any(|(path, &path_recursive)| {
            (path_recursive && dir.starts_with(path)) || (path == dir && !recursive)
        });
        if covered {
            return Ok(());
        }

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| notify::Error::generic("file watcher is stopped"))?;

        // Upgrading a non-recursive watch to a recursive one
        if self.observed.remove(dir).is_some() {
            let _ = backend.unwatch(dir);
        }

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        backend.watch(dir, mode)?;
        tracing::debug!(path = %dir.display(), recursive, "Watching directory");
        self.observed.insert(dir.to_path_buf(), recursive);
        Ok(())
    }

    /// Registrations whose targets cover any of `paths`, in registration order.
    fn registrations_for(&self, paths: &[PathBuf]) -> Vec<Arc<Registration>> {
        let mut ids = BTreeSet::new();
        for path in paths {
            for (target, owners) in &self.targets {
                if target.covers(path) {
                    ids.extend(owners.iter().copied());
                }
            }
        }
        ids.into_iter()
            .filter_map(|id| self.registrations.get(id).map(Arc::clone))
            .collect()
    }
}

fn lock(index: &Mutex<WatchIndex>) -> MutexGuard<'_, WatchIndex> {
    index
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Watches registered roots and feeds changes into the build queue.
pub(crate) struct ChangeWatcher {
    index: Arc<Mutex<WatchIndex>>,
    stop: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeWatcher {
    /// Create the notify backend and start the dispatch thread.
    pub(crate) fn start(queue: Arc<BuildQueue>) -> Result<Self, ServerError> {
        let (tx, rx) = mpsc::channel();
        // Symlinks are followed by the resolver, which guards against cycles
        let config = notify::Config::default().with_follow_symlinks(false);
        let backend = RecommendedWatcher::new(tx, config)?;

        let index = Arc::new(Mutex::new(WatchIndex::new(Some(backend))));
        let stop = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let index = Arc::clone(&index);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("sitewatch-watcher".to_owned())
                .spawn(move || dispatch(&rx, &index, &queue, &stop))?
        };

        Ok(Self {
            index,
            stop,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Register `root` and start observing every real path it resolves to.
    ///
    /// Observation is active when this returns.
    pub(crate) fn register(
        &self,
        root: &Path,
        callback: BuildCallback,
    ) -> Result<Arc<Registration>, ServerError> {
        let targets = resolve_watch_targets(root).map_err(|e| ServerError::watch(root, e))?;
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());

        let mut index = lock(&self.index);
        if index.backend.is_none() {
            return Err(ServerError::ShutDown);
        }

        let id = index.registrations.len();
        for target in targets {
            if let Err(err) = index.add_target(target, id) {
                index.forget(id);
                return Err(ServerError::watch(&root, err));
            }
        }

        let registration = Arc::new(Registration { id, root, callback });
        index.registrations.push(Arc::clone(&registration));

        tracing::debug!(root = %registration.root.display(), "Registered watch root");
        Ok(registration)
    }

    /// Stop the notify backend and join the dispatch thread.
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let backend = lock(&self.index).backend.take();
        drop(backend);

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("File watcher thread panicked");
        }
    }
}

fn dispatch(
    rx: &mpsc::Receiver<notify::Result<Event>>,
    index: &Mutex<WatchIndex>,
    queue: &BuildQueue,
    stop: &AtomicBool,
) {
    let mut last_resolve = Instant::now();
    loop {
        if last_resolve.elapsed() >= RESOLVE_INTERVAL && !stop.load(Ordering::SeqCst) {
            last_resolve = Instant::now();
            let registrations = lock(index).registrations.clone();
            let grown = refresh(index, &registrations);
            if !grown.is_empty() {
                tracing::debug!(count = grown.len(), "Found new symlink targets");
                queue.mark_dirty(grown);
            }
        }

        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "File watcher error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if stop.load(Ordering::SeqCst) {
            break;
        }
        if !is_content_change(&event.kind) {
            continue;
        }

        let registrations = lock(index).registrations_for(&event.paths);
        if registrations.is_empty() {
            tracing::trace!(paths = ?event.paths, "Ignoring unrelated event");
            continue;
        }
        tracing::debug!(kind = ?event.kind, paths = ?event.paths, "Filesystem change");

        if introduces_symlink(&event) {
            refresh(index, &registrations);
        }
        queue.mark_dirty(registrations);
    }
    tracing::debug!("File watcher stopped");
}

/// Events that reflect a change worth rebuilding for.
///
/// Opening, reading and closing a file without writing, as well as access
/// time updates, are ignored.
fn is_content_change(kind: &EventKind) -> bool {
    !matches!(
        kind,
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime))
    )
}

fn introduces_symlink(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
    ) && event.paths.iter().any(|path| {
        std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
    })
}

/// Re-resolve registrations so that newly linked targets are observed.
///
/// Returns the registrations that gained targets.
fn refresh(index: &Mutex<WatchIndex>, registrations: &[Arc<Registration>]) -> Vec<Arc<Registration>> {
    let mut grown = Vec::new();
    for registration in registrations {
        let targets = match resolve_watch_targets(&registration.root) {
            Ok(targets) => targets,
            Err(err) => {
                tracing::debug!(root = %registration.root.display(), error = %err, "Cannot re-resolve watch root");
                continue;
            }
        };

        let mut index = lock(index);
        let mut added = false;
        for target in targets {
            match index.add_target(target, registration.id) {
                Ok(new) => added |= new,
                Err(err) => {
                    tracing::warn!(root = %registration.root.display(), error = %err, "Cannot watch symlink target");
                }
            }
        }
        if added {
            grown.push(Arc::clone(registration));
        }
    }
    grown
}
