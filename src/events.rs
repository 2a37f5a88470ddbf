//! Forced-logout notification.
//!
//! The request pipeline and the refresh path emit this signal when they decide
//! on their own that the session is dead. Listeners are plain callbacks so the
//! token layer does not depend on any particular UI or event bus.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

pub type LogoutListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`LogoutSignal::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Observer registry for forced logouts.
///
/// A session ends at most once: the first emit delivers and latches, every
/// later emit is swallowed until [`LogoutSignal::rearm`] is called when a new
/// session is established. The latch is a single atomic swap, so concurrent
/// emitters on any runtime flavour produce exactly one delivery.
#[derive(Default)]
pub struct LogoutSignal {
    listeners: Mutex<Vec<(ListenerId, LogoutListener)>>,
    next_id: AtomicU64,
    dispatched: AtomicBool,
}

impl LogoutSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the listener was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Notify every listener, unless this session's logout was already delivered.
    ///
    /// Returns whether listeners were invoked.
    pub fn emit(&self) -> bool {
        if self.dispatched.swap(true, Ordering::AcqRel) {
            debug!("Forced logout already dispatched for this session");
            return false;
        }

        // Snapshot so listeners may (un)subscribe without deadlocking
        let listeners: Vec<LogoutListener> = self
            .listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        warn!(listeners = listeners.len(), "Forced logout");
        for listener in listeners {
            listener();
        }
        true
    }

    /// Allow the next forced logout through. Called when a session starts.
    pub fn rearm(&self) {
        self.dispatched.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        !self.dispatched.load(Ordering::Acquire)
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, LogoutListener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LogoutSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogoutSignal")
            .field("listeners", &self.listeners().len())
            .field("dispatched", &self.dispatched.load(Ordering::Relaxed))
            .finish()
    }
}
