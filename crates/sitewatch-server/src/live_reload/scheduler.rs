//! Debounced build scheduling.
//!
//! Coalesces bursts of filesystem changes into single build cycles. The
//! watcher thread marks registrations dirty, the scheduler thread waits for a
//! settle window, drains the dirty set and runs each distinct callback once.
//! Changes that land while a build is running schedule one more cycle.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::Registration;
use super::epoch::Epoch;

/// Phase of the build state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Nothing to do.
    Idle,
    /// Waiting for changes to settle until `deadline`.
    Debouncing { deadline: Instant },
    /// Callbacks are running.
    Building,
}

/// What the scheduler thread should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Sleep until the next change.
    Park,
    /// Sleep until the given instant or the next change.
    ParkUntil(Instant),
    /// Start a build cycle.
    Build,
}

/// Pure debounce state machine: `Idle -> Debouncing -> Building -> Idle`.
///
/// Time is passed in explicitly, so the machine can be driven without a clock.
#[derive(Debug)]
pub(crate) struct Debouncer {
    phase: Phase,
    pending_rebuild: bool,
    delay: Duration,
}

impl Debouncer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            pending_rebuild: false,
            delay,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Record that something changed at `now`.
    ///
    /// The first change opens a fixed settle window; later changes in the
    /// window join it without moving the deadline. During a build the change
    /// is remembered and picked up once the build finishes.
    pub(crate) fn record_change(&mut self, now: Instant) {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Debouncing {
                    deadline: now + self.delay,
                };
            }
            Phase::Debouncing { .. } => {}
            Phase::Building => self.pending_rebuild = true,
        }
    }

    /// Decide the next step at `now`, entering `Building` when the settle
    /// window has passed.
    pub(crate) fn poll(&mut self, now: Instant) -> Step {
        match self.phase {
            Phase::Idle | Phase::Building => Step::Park,
            Phase::Debouncing { deadline } if now >= deadline => {
                self.phase = Phase::Building;
                Step::Build
            }
            Phase::Debouncing { deadline } => Step::ParkUntil(deadline),
        }
    }

    /// Leave `Building`, debouncing again right away if changes arrived.
    pub(crate) fn finish_build(&mut self, now: Instant) {
        debug_assert_eq!(self.phase, Phase::Building);
        self.phase = if std::mem::take(&mut self.pending_rebuild) {
            Phase::Debouncing {
                deadline: now + self.delay,
            }
        } else {
            Phase::Idle
        };
    }
}

struct QueueState {
    dirty: BTreeMap<usize, Arc<Registration>>,
    debouncer: Debouncer,
    shutdown: bool,
}

/// Dirty set shared between the watcher and the scheduler thread.
pub(crate) struct BuildQueue {
    state: Mutex<QueueState>,
    wakeup: Condvar,
}

impl BuildQueue {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                dirty: BTreeMap::new(),
                debouncer: Debouncer::new(delay),
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Mark registrations as changed and wake the scheduler.
    pub(crate) fn mark_dirty(&self, registrations: impl IntoIterator<Item = Arc<Registration>>) {
        let mut state = self.lock();
        let mut changed = false;
        for registration in registrations {
            tracing::debug!(root = %registration.root.display(), "Registration marked dirty");
            state.dirty.insert(registration.id, registration);
            changed = true;
        }
        if changed {
            if state.debouncer.phase() == Phase::Idle {
                tracing::info!("Detected file changes");
            }
            state.debouncer.record_change(Instant::now());
            self.wakeup.notify_all();
        }
    }

    /// Block until a build cycle is due and return its registrations in
    /// registration order. Returns `None` once shut down.
    pub(crate) fn next_batch(&self) -> Option<Vec<Arc<Registration>>> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            state = match state.debouncer.poll(Instant::now()) {
                Step::Build => {
                    let batch = std::mem::take(&mut state.dirty);
                    return Some(batch.into_values().collect());
                }
                Step::Park => self
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Step::ParkUntil(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    tracing::debug!("Waiting for file changes to stop happening");
                    self.wakeup
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Mark the current build cycle as finished.
    pub(crate) fn finish_batch(&self) {
        self.lock().debouncer.finish_build(Instant::now());
    }

    /// Stop the scheduler loop; a build already running completes first.
    pub(crate) fn shutdown(&self) {
        self.lock().shutdown = true;
        self.wakeup.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn dirty_ids(&self) -> Vec<usize> {
        self.lock().dirty.keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) fn clear_dirty(&self) {
        let mut state = self.lock();
        state.dirty.clear();
        state.debouncer = Debouncer::new(state.debouncer.delay);
    }
}

/// Run each distinct callback of the batch once, in registration order.
///
/// Returns `true` if every callback succeeded. Failures and panics are
/// logged and do not stop the remaining callbacks.
pub(crate) fn run_builds(batch: &[Arc<Registration>]) -> bool {
    let mut seen = Vec::with_capacity(batch.len());
    let mut succeeded = true;

    for registration in batch {
        let key = registration.callback_key();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);

        let start = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| (registration.callback)())) {
            Ok(Ok(())) => {
                tracing::debug!(
                    root = %registration.root.display(),
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Build callback finished"
                );
            }
            Ok(Err(err)) => {
                tracing::error!(root = %registration.root.display(), error = %err, "Build failed");
                succeeded = false;
            }
            Err(_) => {
                tracing::error!(root = %registration.root.display(), "Build callback panicked");
                succeeded = false;
            }
        }
    }

    succeeded
}

/// Spawn the scheduler thread.
pub(crate) fn spawn(queue: Arc<BuildQueue>, epoch: Epoch) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sitewatch-builder".to_owned())
        .spawn(move || {
            while let Some(batch) = queue.next_batch() {
                if run_builds(&batch) {
                    let value = epoch.advance();
                    tracing::info!(epoch = value, "Reloading browsers");
                } else {
                    tracing::error!(
                        "An error happened during the rebuild. The server keeps serving the previous output until build errors are resolved."
                    );
                }
                queue.finish_batch();
            }
            tracing::debug!("Build scheduler stopped");
        })
}
