use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::storage::StorageError;

/// Outcome of a failed refresh, shared by every caller awaiting the same attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,
    #[error("Refresh rejected with status {status}")]
    Rejected { status: StatusCode },
    #[error("Refresh response did not contain an access token")]
    Malformed,
    #[error("Refresh request failed: {0}")]
    Transport(String),
    #[error("Token storage error: {0}")]
    Storage(String),
    /// The session was cleared or replaced while the refresh was in flight.
    #[error("Session ended while the refresh was in flight")]
    Superseded,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The server answered with an error status; the body is passed through untouched.
    #[error("Request rejected with status {status}")]
    Rejected { status: StatusCode, body: String },
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("Token storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    /// Consume an error response into a `Rejected` error.
    pub(crate) async fn rejected(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status = %status, error = %e, "Failed to read error response body");
                String::new()
            }
        };
        SessionError::Rejected { status, body }
    }

    /// HTTP status of a rejected request, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SessionError::Rejected { status, .. } => Some(*status),
            SessionError::Transport(e) => e.status(),
            SessionError::Refresh(RefreshError::Rejected { status }) => Some(*status),
            _ => None,
        }
    }

    /// Human-readable `detail` from a FastAPI-style error body.
    ///
    /// Validation errors carry a list of `{msg}` objects; their messages are
    /// joined with `"; "`.
    pub fn detail(&self) -> Option<String> {
        let SessionError::Rejected { body, .. } = self else {
            return None;
        };
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        match value.get("detail")? {
            serde_json::Value::String(message) => Some(message.clone()),
            serde_json::Value::Array(items) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                (!messages.is_empty()).then(|| messages.join("; "))
            }
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}
