//! Session lifecycle: the single source of truth for who is logged in.
//!
//! [`AuthStore`] restores a session on startup, performs login and logout,
//! keeps the background refresher in step with the session, and reacts to
//! forced logouts raised by the request pipeline.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::api::models::{ProfileUpdate, RegisterRequest, RegisteredUser, UserProfile};
use crate::client::{SessionClient, SessionError};
use crate::config::SessionConfig;
use crate::events::{ListenerId, LogoutSignal};
use crate::scheduler::{BackgroundRefresher, TokioScheduler};
use crate::storage::{DurableStore, EphemeralStore, Persistence, TokenStorage};

/// What the UI sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user: Option<UserProfile>,
    /// True until the first restoration finishes; never true again afterwards.
    pub is_loading: bool,
}

impl AuthSession {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self {
            user: None,
            is_loading: true,
        }
    }
}

struct StoreInner {
    client: SessionClient,
    refresher: BackgroundRefresher,
    session: watch::Sender<AuthSession>,
    forced_logout_listener: ListenerId,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.client
            .logout_signal()
            .unsubscribe(self.forced_logout_listener);
        self.refresher.stop();
    }
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<StoreInner>,
}

impl AuthStore {
    /// Wire a store around an existing client and refresher.
    ///
    /// Registers the store's own forced-logout reaction on the client's signal,
    /// ahead of any listener added through [`AuthStore::on_forced_logout`].
    pub fn new(client: SessionClient, refresher: BackgroundRefresher) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let weak = weak.clone();
            let forced_logout_listener = client.logout_signal().subscribe(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_forced_logout();
                }
            });
            StoreInner {
                client,
                refresher,
                session: watch::Sender::new(AuthSession::default()),
                forced_logout_listener,
            }
        });
        Self { inner }
    }

    /// Build the production stack: redb durable store under `DATA_DIR`,
    /// in-memory ephemeral store, tokio timers.
    pub fn connect(config: &SessionConfig) -> Result<Self, SessionError> {
        let durable = Arc::new(DurableStore::open(&config.storage.data_dir)?);
        let ephemeral = Arc::new(EphemeralStore::new());
        let tokens = TokenStorage::new(durable, ephemeral);

        let client = SessionClient::new(&config.api, tokens, LogoutSignal::new())?;
        let refresher = BackgroundRefresher::new(
            Arc::new(TokioScheduler),
            Arc::new(client.clone()),
            &config.refresh,
        );
        Ok(Self::new(client, refresher))
    }

    pub fn client(&self) -> &SessionClient {
        &self.inner.client
    }

    pub fn session(&self) -> AuthSession {
        self.inner.session.borrow().clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.session.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.session.borrow().is_loading
    }

    /// Observe every session transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthSession> {
        self.inner.session.subscribe()
    }

    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.refresher.is_running()
    }

    /// Run `callback` after the store has reacted to a forced logout.
    pub fn on_forced_logout(&self, callback: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.client.logout_signal().subscribe(callback)
    }

    pub fn remove_forced_logout_listener(&self, id: ListenerId) -> bool {
        self.inner.client.logout_signal().unsubscribe(id)
    }

    /// Resolve the persisted tokens into either an authenticated or an anonymous session.
    ///
    /// Never fails: every network or storage problem resolves to anonymous.
    pub async fn restore(&self) -> AuthSession {
        match self.inner.resolve_user().await {
            Some(user) => {
                info!(user_id = user.id, "Session restored");
                self.inner.refresher.start();
                self.inner.session.send_replace(AuthSession {
                    user: Some(user),
                    is_loading: false,
                });
            }
            None => {
                debug!("No session to restore, continuing anonymously");
                self.inner.end_local_session();
                self.inner.session.send_modify(|session| {
                    session.user = None;
                    session.is_loading = false;
                });
            }
        }
        self.session()
    }

    /// Authenticate, persist the token pair, and load the profile.
    ///
    /// Server errors are returned untouched so callers can map status codes.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<UserProfile, SessionError> {
        let client = &self.inner.client;
        let pair = api::auth::login(client, email, password).await?;
        client.start_session(
            &pair.access_token,
            &pair.refresh_token,
            Persistence::from_remember_me(remember_me),
        )?;

        let user = match api::auth::me(client).await {
            Ok(user) => user,
            Err(e) => {
                self.inner.end_local_session();
                return Err(e);
            }
        };
        self.inner.refresher.start();
        self.inner.set_user(Some(user.clone()));
        info!(user_id = user.id, remember_me, "Logged in");
        Ok(user)
    }

    /// Create an account. Does not log the new user in.
    pub async fn register(
        &self,
        registration: &RegisterRequest,
    ) -> Result<RegisteredUser, SessionError> {
        api::auth::register(&self.inner.client, registration).await
    }

    /// Revoke the refresh token server-side (best effort) and end the local session.
    pub async fn logout(&self) {
        match self.inner.client.tokens().refresh_token() {
            Ok(Some(stored)) => {
                if let Err(e) = api::auth::logout(&self.inner.client, &stored.token).await {
                    warn!(error = %e, "Failed to revoke refresh token, logging out locally");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to read refresh token for revocation"),
        }
        self.inner.end_session();
        info!("Logged out");
    }

    /// Revoke every session of this user (best effort) and end the local one.
    pub async fn logout_all(&self) {
        if let Err(e) = api::auth::logout_all(&self.inner.client).await {
            warn!(error = %e, "Failed to revoke all sessions, logging out locally");
        }
        self.inner.end_session();
        info!("Logged out from all devices");
    }

    /// Re-fetch the current user.
    pub async fn refresh_user(&self) -> Result<UserProfile, SessionError> {
        let user = api::auth::me(&self.inner.client).await?;
        self.inner.set_user(Some(user.clone()));
        Ok(user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, SessionError> {
        let user = api::profile::update(&self.inner.client, update).await?;
        self.inner.set_user(Some(user.clone()));
        Ok(user)
    }

    /// Change the password. The server revokes every refresh token on
    /// success, so the local session ends too.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        api::auth::change_password(&self.inner.client, old_password, new_password).await?;
        self.inner.end_session();
        info!("Password changed, session ended");
        Ok(())
    }

    pub async fn delete_account(&self, password: &str) -> Result<(), SessionError> {
        api::auth::delete_account(&self.inner.client, password).await?;
        self.inner.end_session();
        info!("Account deleted, session ended");
        Ok(())
    }
}

impl StoreInner {
    async fn resolve_user(&self) -> Option<UserProfile> {
        let tokens = self.client.tokens();
        let access_token = tokens.access_token().unwrap_or_else(|e| {
            error!(error = %e, "Failed to read access token");
            None
        });

        if access_token.is_some() {
            // A 401 here already went through refresh-and-retry in the pipeline
            match api::auth::me(&self.client).await {
                Ok(user) => return Some(user),
                Err(e) => debug!(error = %e, "Stored access token rejected"),
            }
        }

        match tokens.refresh_token() {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "Failed to read refresh token");
                return None;
            }
        }

        if let Err(e) = self.client.refresh_access_token().await {
            debug!(error = %e, "Refresh during restoration failed");
            return None;
        }

        match api::auth::me(&self.client).await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(error = %e, "Profile fetch after refresh failed");
                None
            }
        }
    }

    fn set_user(&self, user: Option<UserProfile>) {
        self.session.send_if_modified(|session| {
            let changed = session.user != user || session.is_loading;
            session.user = user;
            session.is_loading = false;
            changed
        });
    }

    /// Clear tokens and stop the refresher without touching the UI state.
    fn end_local_session(&self) {
        if let Err(e) = self.client.tokens().clear() {
            error!(error = %e, "Failed to clear token storage");
        }
        self.refresher.stop();
    }

    fn end_session(&self) {
        self.end_local_session();
        self.session.send_if_modified(|session| {
            let changed = session.user.is_some();
            session.user = None;
            changed
        });
    }

    fn handle_forced_logout(&self) {
        let was_authenticated = self.session.borrow().is_authenticated();
        self.end_session();
        if was_authenticated {
            warn!("Session ended by forced logout");
        }
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("session", &*self.inner.session.borrow())
            .field("refresher", &self.inner.refresher)
            .finish()
    }
}
