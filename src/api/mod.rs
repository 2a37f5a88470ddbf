//! Typed wrappers over the REST endpoints the session layer talks to.
//!
//! Everything here goes through [`SessionClient::send`](crate::client::SessionClient::send),
//! so bearer injection and the 401/403 policy apply uniformly.

pub mod auth;
pub mod models;
pub mod profile;
