//! File-backed snapshot storage used by [`crate::LocalEngine`].
//!
//! Snapshots are assembled in a temporary file and only renamed to their
//! final name when the sink is closed, so a crashed or cancelled write can
//! never be mistaken for a valid snapshot. Finalized files are named
//! `snapshot-<index>-<term>.snap`; older ones beyond the retain count are
//! reaped after every successful snapshot.

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::SNAPSHOT_FILE_PREFIX;
use crate::constants::SNAPSHOT_FILE_SUFFIX;
use crate::constants::SNAPSHOT_TEMP_PREFIX;
use crate::LogId;
use crate::SnapshotSink;
use crate::StorageError;

/// A finalized snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub id: String,
    pub last_included: LogId,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    /// Opens (creating if needed) the snapshot directory and clears any
    /// temporary files left by an interrupted snapshot.
    pub fn open(
        dir: impl AsRef<Path>,
        retain: usize,
    ) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StorageError::PathError {
            path: dir.clone(),
            source: e,
        })?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SNAPSHOT_TEMP_PREFIX));
            if is_temp {
                warn!(?path, "Removing leftover temporary snapshot");
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            dir,
            retain: retain.max(1),
        })
    }

    /// Starts a new snapshot covering the log up to `last_included`.
    pub fn create(
        &self,
        last_included: LogId,
    ) -> Result<FileSnapshotSink, StorageError> {
        let id = snapshot_id(&last_included);
        let temp_path = self.dir.join(format!("{SNAPSHOT_TEMP_PREFIX}{id}"));
        let final_path = self.dir.join(format!("{id}{SNAPSHOT_FILE_SUFFIX}"));

        let file = File::create(&temp_path).map_err(|e| StorageError::PathError {
            path: temp_path.clone(),
            source: e,
        })?;
        debug!(?temp_path, "Created snapshot sink");

        Ok(FileSnapshotSink {
            id,
            writer: Some(BufWriter::new(file)),
            temp_path,
            final_path,
            store: self.clone(),
            finished: false,
        })
    }

    /// Finalized snapshots, newest first
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, StorageError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(last_included) = parse_snapshot_file_name(file_name) {
                snapshots.push(SnapshotMeta {
                    id: snapshot_id(&last_included),
                    last_included,
                    path,
                });
            }
        }
        snapshots.sort_by(|a, b| b.last_included.index.cmp(&a.last_included.index));
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<SnapshotMeta>, StorageError> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn read(
        &self,
        meta: &SnapshotMeta,
    ) -> Result<Vec<u8>, StorageError> {
        fs::read(&meta.path).map_err(|e| StorageError::PathError {
            path: meta.path.clone(),
            source: e,
        })
    }

    /// Removes the oldest snapshots beyond the retain count.
    fn reap(&self) -> Result<(), StorageError> {
        let snapshots = self.list()?;
        for meta in snapshots.iter().skip(self.retain) {
            info!(
                "Deleting old snapshot [index={}, term={}] at {}",
                meta.last_included.index,
                meta.last_included.term,
                meta.path.display()
            );
            fs::remove_file(&meta.path)?;
        }
        Ok(())
    }
}

/// Writer for one snapshot under construction.
///
/// Dropping a sink that was neither closed nor cancelled cancels it.
#[derive(Debug)]
pub struct FileSnapshotSink {
    id: String,
    writer: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    store: FileSnapshotStore,
    finished: bool,
}

impl FileSnapshotSink {
    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other(format!("snapshot sink {} already finished", self.id)))
    }
}

impl Write for FileSnapshotSink {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> std::io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn cancel(&mut self) -> std::io::Result<()> {
        self.finished = true;
        self.writer.take();
        match fs::remove_file(&self.temp_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> std::io::Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| std::io::Error::other(format!("snapshot sink {} already finished", self.id)))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path)?;
        self.finished = true;
        info!(path = ?self.final_path, "New snapshot created");

        if let Err(e) = self.store.reap() {
            error!(%e, "clean up old snapshot file failed");
        }
        Ok(())
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.cancel() {
                error!(id = %self.id, %e, "Failed to discard unfinished snapshot");
            }
        }
    }
}

fn snapshot_id(log_id: &LogId) -> String {
    format!("{}{}-{}", SNAPSHOT_FILE_PREFIX, log_id.index, log_id.term)
}

/// Parses `snapshot-<index>-<term>.snap`
pub(crate) fn parse_snapshot_file_name(name: &str) -> Option<LogId> {
    let body = name.strip_prefix(SNAPSHOT_FILE_PREFIX)?.strip_suffix(SNAPSHOT_FILE_SUFFIX)?;
    let (index, term) = body.split_once('-')?;
    Some(LogId {
        index: index.parse().ok()?,
        term: term.parse().ok()?,
    })
}
