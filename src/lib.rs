//! jobboard-session - session and token lifecycle for the job-board API client
//!
//! This crate sits between UI code and the REST API and provides:
//! - Token storage with a durable ("remember me") and an ephemeral store
//! - A request pipeline that attaches bearer tokens and retries once after a refresh on 401
//! - Single-flight refresh: concurrent callers share one `/auth/refresh` call
//! - Forced logout on unrecoverable auth failures, delivered once per session
//! - A background refresher with capped backoff on consecutive failures
//! - An observable auth store for session restoration, login and logout

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod events;
pub mod scheduler;
pub mod storage;
#[cfg(test)]
pub mod testutil;

pub use api::models::{TokenPair, UserProfile};
pub use auth::{AuthSession, AuthStore};
pub use client::{ApiRequest, RefreshError, SessionClient, SessionError};
pub use config::SessionConfig;
pub use events::LogoutSignal;
