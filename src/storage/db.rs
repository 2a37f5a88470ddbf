use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, WriteTransaction};
use std::path::Path;

use super::tables::TOKENS;
use super::{StorageError, TokenStore};

/// File name of the durable token store inside the data directory
pub const DB_FILE_NAME: &str = "session.redb";

/// Token store that survives process restarts ("remember me").
///
/// Backed by a single redb file; every write commits its own transaction so a
/// crash never leaves a half-written token pair visible.
pub struct DurableStore {
    db: RedbDatabase,
}

impl DurableStore {
    /// Open or create the store inside the given directory
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join(DB_FILE_NAME);
        let db = RedbDatabase::create(db_path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TOKENS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn begin_read(&self) -> Result<ReadTransaction, StorageError> {
        Ok(self.db.begin_read()?)
    }

    fn begin_write(&self) -> Result<WriteTransaction, StorageError> {
        Ok(self.db.begin_write()?)
    }
}

impl TokenStore for DurableStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;
        let value = table.get(key)?.map(|v| v.value().to_string());
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(TOKENS)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TOKENS)?;
            let removed = table.remove(key)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish_non_exhaustive()
    }
}
