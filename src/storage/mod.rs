//! Client-side token persistence.
//!
//! The access token always lives in the durable store. The refresh token
//! lives in exactly one of the two stores, chosen by "remember me" at login.

pub mod db;
mod memory;
mod tables;
mod tokens;

pub use db::DurableStore;
pub use memory::EphemeralStore;
pub use tokens::{Persistence, StoredRefreshToken, TokenStorage};

use thiserror::Error;

/// Durable-store key holding the current bearer token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Key holding the refresh token, in whichever store owns it
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// A string key-value store for token material.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Returns whether the key was present.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
}
