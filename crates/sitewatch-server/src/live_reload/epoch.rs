//! Build epoch shared between the scheduler and long-poll handlers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EpochState {
    value: u64,
    closed: bool,
}

/// Monotonic counter identifying the most recently completed build.
///
/// Starts at the current Unix time in milliseconds so that a fresh server is
/// never mistaken for a "no build yet" value held by a browser, and grows by
/// exactly one per completed build. Closing the epoch releases every waiter.
#[derive(Clone, Debug)]
pub(crate) struct Epoch {
    state: Arc<watch::Sender<EpochState>>,
}

impl Epoch {
    pub(crate) fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(1, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX / 2));
        Self::starting_at(now.max(1))
    }

    pub(crate) fn starting_at(value: u64) -> Self {
        let (state, _) = watch::channel(EpochState {
            value,
            closed: false,
        });
        Self {
            state: Arc::new(state),
        }
    }

    /// Current epoch value.
    pub(crate) fn current(&self) -> u64 {
        self.state.borrow().value
    }

    /// Record a completed build and wake all waiters.
    pub(crate) fn advance(&self) -> u64 {
        let mut advanced = 0;
        self.state.send_modify(|state| {
            state.value += 1;
            advanced = state.value;
        });
        advanced
    }

    /// Wait until the epoch differs from `known`, the timeout elapses or the
    /// epoch is closed, then return the current value.
    pub(crate) async fn wait_for_change(&self, known: u64, timeout: Duration) -> u64 {
        let mut rx = self.state.subscribe();
        let changed = async move {
            loop {
                {
                    let state = *rx.borrow_and_update();
                    if state.value != known || state.closed {
                        return;
                    }
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        let _ = tokio::time::timeout(timeout, changed).await;
        self.current()
    }

    /// Release all current and future waiters.
    pub(crate) fn close(&self) {
        self.state.send_modify(|state| state.closed = true);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub(crate) async fn closed(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let closed = rx.borrow_and_update().closed;
            if closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
