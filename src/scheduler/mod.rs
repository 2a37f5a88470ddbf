//! Timer capability and the proactive refresh loop built on it.

mod refresh;

pub use refresh::{backoff_delay, BackgroundRefresher};

use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::client::{RefreshError, SessionClient};

/// Cancels one pending timer. Cancelling after the timer fired is a no-op.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Run a task once after a delay.
pub trait Scheduler: Send + Sync {
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;
}

/// Wall-clock scheduler backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        });

        TimerHandle::new(token)
    }
}

/// Something that can mint a new access token from the stored refresh token.
pub trait TokenRefresher: Send + Sync {
    fn has_refresh_token(&self) -> bool;

    fn refresh(&self) -> BoxFuture<'_, Result<(), RefreshError>>;
}

impl TokenRefresher for SessionClient {
    fn has_refresh_token(&self) -> bool {
        match self.tokens().refresh_token() {
            Ok(stored) => stored.is_some(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to read refresh token");
                false
            }
        }
    }

    fn refresh(&self) -> BoxFuture<'_, Result<(), RefreshError>> {
        self.refresh_access_token().map(|r| r.map(|_| ())).boxed()
    }
}
