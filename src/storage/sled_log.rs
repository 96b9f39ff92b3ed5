//! Sled-backed persistent log and engine metadata.
//!
//! Entries live in their own tree keyed by big-endian index so that sled's
//! byte ordering matches log ordering. Term, cluster configuration and the
//! last purged position live in a separate metadata tree.

use std::path::Path;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::constants::ENGINE_META_TREE;
use crate::constants::META_KEY_CONFIGURATION;
use crate::constants::META_KEY_CURRENT_TERM;
use crate::constants::META_KEY_LAST_PURGED;
use crate::constants::RAFT_LOG_TREE;
use crate::ClusterMember;
use crate::Entry;
use crate::LogId;
use crate::StorageError;

#[derive(Clone)]
pub struct SledLog {
    db: sled::Db,
    entries: sled::Tree,
    meta: sled::Tree,
}

impl std::fmt::Debug for SledLog {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledLog").field("entries_len", &self.entries.len()).finish()
    }
}

fn log_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding().reject_trailing_bytes()
}

#[inline]
fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

impl SledLog {
    pub fn open(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self, StorageError> {
        debug!("open sled log from path: {:?}", &path);

        let db = sled::Config::default()
            .path(path.as_ref())
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
                StorageError::from(e)
            })?;
        let entries = db.open_tree(RAFT_LOG_TREE)?;
        let meta = db.open_tree(ENGINE_META_TREE)?;
        Ok(Self { db, entries, meta })
    }

    /// Durably appends one entry.
    pub fn append(
        &self,
        entry: &Entry,
    ) -> Result<(), StorageError> {
        trace!(index = entry.index, "append log entry");
        let encoded = log_options().serialize(entry)?;
        self.entries.insert(index_key(entry.index), encoded)?;
        self.entries.flush()?;
        Ok(())
    }

    pub fn get(
        &self,
        index: u64,
    ) -> Result<Option<Entry>, StorageError> {
        match self.entries.get(index_key(index))? {
            Some(ivec) => Ok(Some(log_options().deserialize(&ivec)?)),
            None => Ok(None),
        }
    }

    /// Position of the newest entry, falling back to the last purged
    /// position when every entry has been compacted away.
    pub fn last_log_id(&self) -> Result<Option<LogId>, StorageError> {
        match self.entries.last()? {
            Some((_, value)) => {
                let entry: Entry = log_options().deserialize(&value)?;
                Ok(Some(entry.log_id()))
            }
            None => self.last_purged(),
        }
    }

    /// All entries with an index strictly greater than `index`, in order
    pub fn entries_after(
        &self,
        index: u64,
    ) -> Result<Vec<Entry>, StorageError> {
        let mut result = Vec::new();
        for item in self.entries.range(index_key(index.saturating_add(1))..) {
            let (_, value) = item?;
            result.push(log_options().deserialize(&value)?);
        }
        Ok(result)
    }

    /// Removes every entry up to and including `upto`.
    pub fn purge_up_to(
        &self,
        upto: LogId,
    ) -> Result<usize, StorageError> {
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in self.entries.range(..=index_key(upto.index)) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.entries.apply_batch(batch)?;
        self.put_meta(META_KEY_LAST_PURGED, &upto)?;
        self.db.flush()?;
        debug!(removed, ?upto, "purged log entries");
        Ok(removed)
    }

    pub fn last_purged(&self) -> Result<Option<LogId>, StorageError> {
        self.get_meta(META_KEY_LAST_PURGED)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_term(&self) -> Result<u64, StorageError> {
        Ok(self.get_meta(META_KEY_CURRENT_TERM)?.unwrap_or(0))
    }

    pub fn save_current_term(
        &self,
        term: u64,
    ) -> Result<(), StorageError> {
        self.put_meta(META_KEY_CURRENT_TERM, &term)?;
        self.meta.flush()?;
        Ok(())
    }

    pub fn load_configuration(&self) -> Result<Option<Vec<ClusterMember>>, StorageError> {
        self.get_meta(META_KEY_CONFIGURATION)
    }

    pub fn save_configuration(
        &self,
        members: &[ClusterMember],
    ) -> Result<(), StorageError> {
        self.put_meta(META_KEY_CONFIGURATION, &members)?;
        self.meta.flush()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<usize, StorageError> {
        Ok(self.db.flush()?)
    }

    fn get_meta<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.meta.get(key)? {
            Some(ivec) => Ok(Some(log_options().deserialize(&ivec).map_err(|e| {
                StorageError::DataCorruption {
                    location: format!("{ENGINE_META_TREE}/{key}: {e}"),
                }
            })?)),
            None => Ok(None),
        }
    }

    fn put_meta<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        self.meta.insert(key, log_options().serialize(value)?)?;
        Ok(())
    }
}
