use redb::{Database as RedbDatabase, ReadTransaction, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// A single change applied by [`Database::put_entries`]
#[derive(Debug, Clone, Copy)]
pub enum EntryOp<'a> {
    Remove(&'a str),
    Set(&'a str, &'a str),
}

/// Durable string key-value storage.
///
/// Cloning shares the underlying redb handle.
#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("auth-session.redb");
        let db = RedbDatabase::create(db_path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSION_ENTRIES)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // Entry operations
    // ========================================================================

    /// Get a single entry
    pub fn get_entry(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SESSION_ENTRIES)?;

        let value = table.get(key)?.map(|v| v.value().to_string());
        Ok(value)
    }

    /// Set a single entry, overwriting any previous value
    pub fn put_entry(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.put_entries(&[EntryOp::Set(key, value)])
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn remove_entry(&self, key: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSION_ENTRIES)?;
            let previous = table.remove(key)?;
            previous.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Apply several sets and removals in one write transaction
    pub fn put_entries(&self, ops: &[EntryOp<'_>]) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_ENTRIES)?;
            for op in ops {
                match *op {
                    EntryOp::Set(key, value) => {
                        table.insert(key, value)?;
                    }
                    EntryOp::Remove(key) => {
                        table.remove(key)?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========================================================================
    // JSON helpers
    // ========================================================================

    /// Store a serializable value as JSON
    pub fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(value)?;
        self.put_entry(key, &data)
    }

    /// Read a JSON value. A corrupt entry is reported as a serialization error.
    pub fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, DatabaseError> {
        match self.get_entry(key)? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
