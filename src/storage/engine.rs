//! Durable key-value store with an embedded replication outbox.
//!
//! Two redb tables live in one database file:
//!
//! - `default`: the dataset served to clients.
//! - `replication`: the outbox, holding the latest value of every key written
//!   on this primary that no replica has acknowledged yet.
//!
//! redb allows any number of concurrent read transactions next to a single
//! write transaction, so reads never wait for writers.

use super::error::StoreError;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

const DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("default");
const OUTBOX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("replication");

type Result<T> = std::result::Result<T, StoreError>;

pub struct Store {
    db: Database,
    read_only: bool,
}

impl Store {
    /// Opens the database at `path`, creating the file and both tables if needed.
    ///
    /// A `read_only` store is a replica: it refuses [`Store::put`] and only
    /// accepts [`Store::put_replica`].
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let tx = db.begin_write()?;
        tx.open_table(DATA_TABLE)?;
        tx.open_table(OUTBOX_TABLE)?;
        tx.commit()?;

        tracing::info!(read_only, "Opened store at {}", path.display());

        Ok(Self { db, read_only })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Writes the record and replaces its outbox entry in one transaction.
    ///
    /// Outbox entries travel to replicas as JSON strings, so key and value
    /// must be UTF-8. A non-UTF-8 entry at the head of the outbox would block
    /// every key queued behind it.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        if std::str::from_utf8(key).is_err() || std::str::from_utf8(value).is_err() {
            return Err(StoreError::InvalidUtf8);
        }

        let tx = self.db.begin_write()?;
        {
            let mut data = tx.open_table(DATA_TABLE)?;
            data.insert(key, value)?;

            let mut outbox = tx.open_table(OUTBOX_TABLE)?;
            outbox.insert(key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Writes the record without queueing it for further replication.
    ///
    /// Only the replication client calls this; it is what keeps replication
    /// to a single primary -> replica hop.
    pub fn put_replica(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut data = tx.open_table(DATA_TABLE)?;
            data.insert(key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tx = self.db.begin_read()?;
        let data = tx.open_table(DATA_TABLE)?;
        let value = data.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// The first pending outbox entry in key order. The entry stays queued
    /// until [`Store::ack_outbox_entry`] removes it.
    pub fn next_outbox_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let tx = self.db.begin_read()?;
        let outbox = tx.open_table(OUTBOX_TABLE)?;
        let entry = outbox
            .first()?
            .map(|(key, value)| (key.value().to_vec(), value.value().to_vec()));
        Ok(entry)
    }

    /// Removes the outbox entry for `key` if it still holds `expected`.
    ///
    /// Returns [`StoreError::NotFound`] when nothing is queued for `key` and
    /// [`StoreError::Mismatch`] when a newer value replaced the acknowledged
    /// one. Neither case modifies the outbox.
    pub fn ack_outbox_entry(&self, key: &[u8], expected: &[u8]) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut outbox = tx.open_table(OUTBOX_TABLE)?;
            let current = outbox.get(key)?.map(|guard| guard.value().to_vec());

            match current {
                None => return Err(StoreError::NotFound),
                Some(current) if current != expected => return Err(StoreError::Mismatch),
                Some(_) => {
                    outbox.remove(key)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes every record whose key satisfies `should_remove`.
    ///
    /// Keys are collected under a read snapshot first and removed in a single
    /// write transaction afterwards, so the predicate never runs while the
    /// writer lock is held. Returns the number of removed records.
    pub fn purge<F>(&self, should_remove: F) -> Result<usize>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut doomed = Vec::new();
        {
            let tx = self.db.begin_read()?;
            let data = tx.open_table(DATA_TABLE)?;
            for item in data.iter()? {
                let (key, _) = item?;
                if should_remove(key.value()) {
                    doomed.push(key.value().to_vec());
                }
            }
        }

        if doomed.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        let tx = self.db.begin_write()?;
        {
            let mut data = tx.open_table(DATA_TABLE)?;
            for key in &doomed {
                if data.remove(key.as_slice())?.is_some() {
                    removed += 1;
                }
            }
        }
        tx.commit()?;

        tracing::info!(removed, "Purged records no longer owned by this shard");
        Ok(removed)
    }

    /// Number of records in the dataset.
    pub fn len(&self) -> Result<u64> {
        let tx = self.db.begin_read()?;
        let data = tx.open_table(DATA_TABLE)?;
        Ok(data.len()?)
    }

    /// Number of entries waiting to be replicated.
    pub fn outbox_len(&self) -> Result<u64> {
        let tx = self.db.begin_read()?;
        let outbox = tx.open_table(OUTBOX_TABLE)?;
        Ok(outbox.len()?)
    }
}
