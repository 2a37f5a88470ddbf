//! Shared HTTP request pipeline.
//!
//! Every API call goes through [`SessionClient::send`], which attaches the
//! bearer token, retries once after a refresh on `401`, and tears the session
//! down on a `403` to an authenticated call.

mod error;
mod refresh;

pub use error::{RefreshError, SessionError};
pub use refresh::RefreshState;

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::api::auth::REFRESH_PATH;
use crate::config::ApiConfig;
use crate::events::LogoutSignal;
use crate::storage::{Persistence, StorageError, TokenStorage};

#[derive(Debug, Clone)]
enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A request description that can be re-issued after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: RequestBody,
    refresh_on_unauthorized: bool,
    retried: bool,
    bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            refresh_on_unauthorized: true,
            retried: false,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, SessionError> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = RequestBody::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Opt out of the refresh-and-retry path, e.g. for credential checks
    /// where a `401` means "wrong password" rather than "token expired".
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }

    fn targets_refresh_endpoint(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        path.trim_end_matches('/') == REFRESH_PATH
    }

    fn may_refresh(&self) -> bool {
        self.refresh_on_unauthorized && !self.retried && !self.targets_refresh_endpoint()
    }

    fn into_retry(mut self, access_token: String) -> Self {
        self.retried = true;
        self.bearer = Some(access_token);
        self
    }
}

/// HTTP client bound to the API base URL and the token stores.
///
/// Cheap to clone; clones share the connection pool, the stores, and the
/// single-flight refresh slot.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStorage,
    refresh: RefreshState,
    logout: Arc<LogoutSignal>,
}

impl SessionClient {
    /// Build a client with its own connection pool and a fresh refresh slot.
    pub fn new(
        config: &ApiConfig,
        tokens: TokenStorage,
        logout: Arc<LogoutSignal>,
    ) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self::from_parts(
            &config.base_url,
            http,
            tokens,
            logout,
            RefreshState::default(),
        ))
    }

    /// Assemble a client from explicit collaborators.
    pub fn from_parts(
        base_url: &str,
        http: reqwest::Client,
        tokens: TokenStorage,
        logout: Arc<LogoutSignal>,
        refresh: RefreshState,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                tokens,
                refresh,
                logout,
            }),
        }
    }

    pub fn tokens(&self) -> &TokenStorage {
        &self.inner.tokens
    }

    pub fn logout_signal(&self) -> &Arc<LogoutSignal> {
        &self.inner.logout
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    /// Send a request through the full pipeline.
    ///
    /// Success statuses are returned as-is; every error status becomes
    /// [`SessionError::Rejected`] carrying the server's body.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, SessionError> {
        let mut request = request;
        loop {
            let (response, authorized) = self.dispatch(&request).await?;
            let status = response.status();
            if !(status.is_client_error() || status.is_server_error()) {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED && request.may_refresh() {
                let rejection = SessionError::rejected(response).await;
                match self.refresh_access_token().await {
                    Ok(access_token) => {
                        debug!(path = %request.path, "Retrying request with refreshed token");
                        request = request.into_retry(access_token);
                        continue;
                    }
                    Err(e) => {
                        debug!(path = %request.path, error = %e, "Refresh failed, propagating 401");
                        return Err(rejection);
                    }
                }
            }

            if status == StatusCode::FORBIDDEN && authorized {
                warn!(path = %request.path, "Authenticated request forbidden, ending session");
                self.force_logout();
            }

            return Err(SessionError::rejected(response).await);
        }
    }

    /// Send a request and decode a JSON response body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, SessionError> {
        Ok(self.send(request).await?.json().await?)
    }

    /// Issue one HTTP exchange with the bearer token attached.
    ///
    /// Returns the response and whether an `Authorization` header was sent.
    async fn dispatch(&self, request: &ApiRequest) -> Result<(Response, bool), reqwest::Error> {
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), self.url(&request.path));

        let bearer = match &request.bearer {
            Some(token) => Some(token.clone()),
            None => self.inner.tokens.access_token().unwrap_or_else(|e| {
                error!(error = %e, "Failed to read access token, sending unauthenticated");
                None
            }),
        };
        let authorized = bearer.is_some();
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await?;
        Ok((response, authorized))
    }

    /// Persist a freshly issued token pair and open a new session.
    pub fn start_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        persistence: Persistence,
    ) -> Result<(), StorageError> {
        self.inner
            .tokens
            .store_login(access_token, refresh_token, persistence)?;
        self.inner.logout.rearm();
        Ok(())
    }

    /// Drop all tokens and tell listeners the session is gone.
    pub(crate) fn force_logout(&self) {
        if let Err(e) = self.inner.tokens.clear() {
            error!(error = %e, "Failed to clear token storage during forced logout");
        }
        self.inner.logout.emit();
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}
