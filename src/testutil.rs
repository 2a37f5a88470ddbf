//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::client::RefreshError;
use crate::scheduler::{Scheduler, TimerHandle, TokenRefresher};
use crate::storage::{DurableStore, EphemeralStore, TokenStorage};

/// Open a fresh durable store in a temporary directory.
///
/// Returns both the store and the `TempDir` guard; the caller must keep the
/// `TempDir` alive for the duration of the test.
pub fn setup_durable() -> (DurableStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = DurableStore::open(temp_dir.path()).unwrap();
    (store, temp_dir)
}

/// A `TokenStorage` over a temp-dir durable store and an in-memory ephemeral
/// store, with both stores handed back for direct inspection.
pub fn setup_storage() -> (
    TokenStorage,
    Arc<DurableStore>,
    Arc<EphemeralStore>,
    TempDir,
) {
    let (durable, temp_dir) = setup_durable();
    let durable = Arc::new(durable);
    let ephemeral = Arc::new(EphemeralStore::new());
    let storage = TokenStorage::new(durable.clone(), ephemeral.clone());
    (storage, durable, ephemeral, temp_dir)
}

struct PendingTimer {
    delay: Duration,
    task: BoxFuture<'static, ()>,
    token: CancellationToken,
}

/// Virtual clock: timers only fire when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<PendingTimer>>,
}

impl ManualScheduler {
    /// Delays of timers that are armed and not cancelled, oldest first.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|timer| !timer.token.is_cancelled())
            .map(|timer| timer.delay)
            .collect()
    }

    /// Fire the oldest live timer and run its task to completion.
    ///
    /// Returns `false` when nothing was pending.
    pub async fn fire_next(&self) -> bool {
        let next = {
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|timer| !timer.token.is_cancelled());
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };

        match next {
            Some(timer) => {
                timer.task.await;
                true
            }
            None => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let token = CancellationToken::new();
        self.pending.lock().unwrap().push(PendingTimer {
            delay,
            task,
            token: token.clone(),
        });
        TimerHandle::new(token)
    }
}

/// `TokenRefresher` that replays queued outcomes (`Ok` once the queue is empty).
pub struct ScriptedRefresher {
    calls: AtomicUsize,
    has_token: AtomicBool,
    hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    results: Mutex<VecDeque<Result<(), RefreshError>>>,
}

impl ScriptedRefresher {
    pub fn new(has_token: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            has_token: AtomicBool::new(has_token),
            hook: Mutex::new(None),
            results: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_results(&self, results: impl IntoIterator<Item = Result<(), RefreshError>>) {
        self.results.lock().unwrap().extend(results);
    }

    /// Run `hook` inside every refresh, before it resolves.
    pub fn on_refresh(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for ScriptedRefresher {
    fn has_refresh_token(&self) -> bool {
        self.has_token.load(Ordering::SeqCst)
    }

    fn refresh(&self) -> BoxFuture<'_, Result<(), RefreshError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                hook();
            }
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
        .boxed()
    }
}
