//! Single-flight access-token refresh.

use std::sync::{Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, warn};

use super::{ApiRequest, RefreshError, SessionClient};
use crate::api::auth::REFRESH_PATH;
use crate::api::models::{RefreshRequest, RefreshResponse};
use crate::storage::StoredRefreshToken;

type RefreshFlight = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// Slot holding the refresh currently on the wire, if any.
///
/// One instance belongs to each [`SessionClient`]; tests build isolated
/// clients instead of sharing process-wide state.
#[derive(Default)]
pub struct RefreshState {
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl RefreshState {
    pub fn is_in_flight(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<RefreshFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RefreshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshState")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

impl SessionClient {
    /// Obtain a new access token, joining the refresh already in flight if there is one.
    ///
    /// Every concurrent caller observes the same outcome. On failure the token
    /// stores are cleared and a forced logout is emitted before callers resume.
    pub async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        let flight = {
            let mut slot = self.inner.refresh.slot();
            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let client = self.clone();
                    let flight = async move {
                        let result = client.perform_refresh().await;
                        // Release before any waiter resumes, on every path
                        client.inner.refresh.slot().take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_in_flight()
    }

    async fn perform_refresh(&self) -> Result<String, RefreshError> {
        let tokens = &self.inner.tokens;
        let generation = tokens.generation();
        let stored = match tokens.refresh_token() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!("No refresh token stored, ending session");
                self.force_logout();
                return Err(RefreshError::MissingRefreshToken);
            }
            Err(e) => {
                self.force_logout();
                return Err(RefreshError::Storage(e.to_string()));
            }
        };

        debug!(persistence = ?stored.persistence, "Refreshing access token");
        match self.exchange_refresh_token(&stored, generation).await {
            Ok(access_token) => {
                debug!("Access token refreshed");
                self.inner.logout.rearm();
                Ok(access_token)
            }
            Err(RefreshError::Superseded) => {
                debug!("Session ended during refresh, discarding result");
                Err(RefreshError::Superseded)
            }
            Err(e) => match tokens.clear_generation(generation) {
                Ok(true) => {
                    warn!(error = %e, "Token refresh failed, ending session");
                    self.inner.logout.emit();
                    Err(e)
                }
                // A newer session must not be torn down by a stale failure
                Ok(false) => {
                    debug!(error = %e, "Refresh failed after session ended, ignoring");
                    Err(RefreshError::Superseded)
                }
                Err(storage_error) => {
                    error!(error = %storage_error, "Failed to clear token storage after refresh failure");
                    self.inner.logout.emit();
                    Err(e)
                }
            },
        }
    }

    async fn exchange_refresh_token(
        &self,
        stored: &StoredRefreshToken,
        generation: u64,
    ) -> Result<String, RefreshError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .json(&RefreshRequest {
                refresh_token: &stored.token,
            })
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let (response, _) = self
            .dispatch(&request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected { status });
        }

        let body: RefreshResponse = response.json().await.map_err(|_| RefreshError::Malformed)?;
        let access_token = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(RefreshError::Malformed)?;

        let written = self
            .inner
            .tokens
            .store_refresh(
                generation,
                &access_token,
                body.refresh_token.as_deref(),
                stored.persistence,
            )
            .map_err(|e| RefreshError::Storage(e.to_string()))?;
        if !written {
            return Err(RefreshError::Superseded);
        }

        Ok(access_token)
    }
}
