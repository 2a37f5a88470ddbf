use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{StorageError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Where a refresh token is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Survives restarts ("remember me")
    Durable,
    /// Dropped with the process
    Ephemeral,
}

impl Persistence {
    pub fn from_remember_me(remember_me: bool) -> Self {
        if remember_me {
            Persistence::Durable
        } else {
            Persistence::Ephemeral
        }
    }
}

/// A refresh token together with the store that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRefreshToken {
    pub token: String,
    pub persistence: Persistence,
}

/// The two token stores and the rules for choosing between them.
///
/// Writes target exactly one store for the refresh token and scrub the key
/// from the other, so a stale copy never lingers in the store not written.
/// Reads prefer the durable store.
///
/// Every login and every clear starts a new session generation. A refresh
/// records the generation it started in and may only write back into it, so a
/// response that lands after logout or re-login is discarded.
#[derive(Clone)]
pub struct TokenStorage {
    durable: Arc<dyn TokenStore>,
    ephemeral: Arc<dyn TokenStore>,
    generation: Arc<Mutex<u64>>,
}

impl TokenStorage {
    pub fn new(durable: Arc<dyn TokenStore>, ephemeral: Arc<dyn TokenStore>) -> Self {
        Self {
            durable,
            ephemeral,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Current session generation, to be handed back to [`TokenStorage::store_refresh`].
    pub fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    pub fn access_token(&self) -> Result<Option<String>, StorageError> {
        self.durable.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<StoredRefreshToken>, StorageError> {
        if let Some(token) = self.durable.get(REFRESH_TOKEN_KEY)? {
            return Ok(Some(StoredRefreshToken {
                token,
                persistence: Persistence::Durable,
            }));
        }
        Ok(self
            .ephemeral
            .get(REFRESH_TOKEN_KEY)?
            .map(|token| StoredRefreshToken {
                token,
                persistence: Persistence::Ephemeral,
            }))
    }

    /// Persist a freshly issued pair from a successful login.
    pub fn store_login(
        &self,
        access_token: &str,
        refresh_token: &str,
        persistence: Persistence,
    ) -> Result<(), StorageError> {
        let mut generation = self.lock_generation();
        *generation = generation.wrapping_add(1);
        self.durable.set(ACCESS_TOKEN_KEY, access_token)?;
        self.put_refresh_token(refresh_token, persistence)
    }

    /// Persist the result of a successful refresh started in `generation`.
    ///
    /// A rotated refresh token goes to the same store the old one came from.
    /// Returns `false` without writing when the session has since been
    /// cleared or replaced.
    pub fn store_refresh(
        &self,
        generation: u64,
        access_token: &str,
        rotated_refresh_token: Option<&str>,
        persistence: Persistence,
    ) -> Result<bool, StorageError> {
        let current = self.lock_generation();
        if *current != generation {
            return Ok(false);
        }
        self.durable.set(ACCESS_TOKEN_KEY, access_token)?;
        if let Some(token) = rotated_refresh_token.filter(|token| !token.is_empty()) {
            self.put_refresh_token(token, persistence)?;
        }
        Ok(true)
    }

    /// Remove every token from both stores and end the current generation.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut generation = self.lock_generation();
        *generation = generation.wrapping_add(1);
        self.durable.remove(ACCESS_TOKEN_KEY)?;
        self.durable.remove(REFRESH_TOKEN_KEY)?;
        self.ephemeral.remove(REFRESH_TOKEN_KEY)?;
        Ok(())
    }

    /// Clear both stores only if `generation` is still the current session.
    ///
    /// Returns whether anything was cleared.
    pub fn clear_generation(&self, generation: u64) -> Result<bool, StorageError> {
        let mut current = self.lock_generation();
        if *current != generation {
            return Ok(false);
        }
        *current = current.wrapping_add(1);
        self.durable.remove(ACCESS_TOKEN_KEY)?;
        self.durable.remove(REFRESH_TOKEN_KEY)?;
        self.ephemeral.remove(REFRESH_TOKEN_KEY)?;
        Ok(true)
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn put_refresh_token(&self, token: &str, persistence: Persistence) -> Result<(), StorageError> {
        let (target, other) = match persistence {
            Persistence::Durable => (&self.durable, &self.ephemeral),
            Persistence::Ephemeral => (&self.ephemeral, &self.durable),
        };
        target.set(REFRESH_TOKEN_KEY, token)?;
        other.remove(REFRESH_TOKEN_KEY)?;
        Ok(())
    }
}

impl std::fmt::Debug for TokenStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStorage").finish_non_exhaustive()
    }
}
