//! Proactive access-token refresh.
//!
//! Idle until `start()`. While running, exactly one timer is pending: the
//! regular interval after a success, or a backoff delay after consecutive
//! failures. Failures are logged and retried, never surfaced to callers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::FutureExt;
use tracing::{debug, warn};

use super::{Scheduler, TimerHandle, TokenRefresher};
use crate::config::RefreshConfig;

/// Delay before the next attempt after `failures` consecutive failures.
///
/// Indexes `backoff` by `failures - 1`, clamped to the last entry, so the
/// delay grows per failure up to the cap and then plateaus.
pub fn backoff_delay(backoff: &[Duration], failures: u32) -> Option<Duration> {
    let index = failures.saturating_sub(1) as usize;
    backoff.get(index).or_else(|| backoff.last()).copied()
}

#[derive(Debug, Default)]
struct ScheduleState {
    active: bool,
    /// Bumped by every start/stop; a tick from an older epoch never re-arms
    epoch: u64,
    failures: u32,
    timer: Option<TimerHandle>,
}

struct RefresherInner {
    backoff: Vec<Duration>,
    interval: Duration,
    refresher: Arc<dyn TokenRefresher>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<ScheduleState>,
}

/// Background refresh loop. Cheap to clone; clones drive the same loop.
#[derive(Clone)]
pub struct BackgroundRefresher {
    inner: Arc<RefresherInner>,
}

impl BackgroundRefresher {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        refresher: Arc<dyn TokenRefresher>,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                backoff: config.backoff(),
                interval: config.interval(),
                refresher,
                scheduler,
                state: Mutex::new(ScheduleState::default()),
            }),
        }
    }

    /// Arm the regular interval, replacing any pending timer.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        state.epoch += 1;
        state.active = true;
        state.failures = 0;
        let epoch = state.epoch;
        self.inner.arm(&mut state, self.inner.interval, epoch);
        debug!(
            interval_secs = self.inner.interval.as_secs(),
            "Background refresh started"
        );
    }

    /// Cancel the pending timer and reset the failure count.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        let was_active = state.active;
        state.epoch += 1;
        RefresherInner::go_idle(&mut state);
        if was_active {
            debug!("Background refresh stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().active
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }
}

impl RefresherInner {
    fn lock(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn go_idle(state: &mut ScheduleState) {
        state.active = false;
        state.failures = 0;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
    }

    fn arm(self: &Arc<Self>, state: &mut ScheduleState, delay: Duration, epoch: u64) {
        if let Some(previous) = state.timer.take() {
            previous.cancel();
        }

        let weak = Arc::downgrade(self);
        let task = async move {
            if let Some(inner) = weak.upgrade() {
                inner.tick(epoch).await;
            }
        }
        .boxed();

        state.timer = Some(self.scheduler.after(delay, task));
    }

    async fn tick(self: Arc<Self>, epoch: u64) {
        {
            let mut state = self.lock();
            if !state.active || state.epoch != epoch {
                return;
            }
            if !self.refresher.has_refresh_token() {
                debug!("No refresh token stored, background refresh going idle");
                Self::go_idle(&mut state);
                return;
            }
        }

        let result = self.refresher.refresh().await;

        let mut state = self.lock();
        if !state.active || state.epoch != epoch {
            debug!("Background refresh stopped while a refresh was in flight");
            return;
        }

        match result {
            Ok(()) => {
                state.failures = 0;
                debug!(
                    next_in_secs = self.interval.as_secs(),
                    "Background refresh succeeded"
                );
                self.arm(&mut state, self.interval, epoch);
            }
            Err(e) => {
                state.failures = state.failures.saturating_add(1);
                let delay = backoff_delay(&self.backoff, state.failures).unwrap_or(self.interval);
                warn!(
                    error = %e,
                    failures = state.failures,
                    delay_secs = delay.as_secs(),
                    "Background refresh failed, backing off"
                );
                self.arm(&mut state, delay, epoch);
            }
        }
    }
}

impl std::fmt::Debug for BackgroundRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("BackgroundRefresher")
            .field("active", &state.active)
            .field("failures", &state.failures)
            .field("interval", &self.inner.interval)
            .finish()
    }
}
