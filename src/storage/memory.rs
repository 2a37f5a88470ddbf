use std::collections::HashMap;
use std::sync::Mutex;

use super::{StorageError, TokenStore};

/// Token store scoped to the running process; everything is gone on exit.
#[derive(Debug, Default)]
pub struct EphemeralStore {
    entries: Mutex<HashMap<String, String>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TokenStore for EphemeralStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries().remove(key).is_some())
    }
}
