use std::collections::BTreeMap;
use std::io::Read;
use std::io::Write;

use bincode::Options;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing::Span;

use crate::metrics::APPLIED_ENTRIES;
use crate::metrics::APPLY_FAILURES;
use crate::ApplyError;
use crate::DecodeError;
use crate::Entry;
use crate::FsmSnapshot;
use crate::Operation;
use crate::RestoreError;
use crate::SnapshotError;
use crate::SnapshotSink;
use crate::StateMachine;

/// The replicated key-value state machine.
///
/// Holds the authoritative mapping for this replica. The mapping is only
/// mutated through [`StateMachine::apply`] and [`StateMachine::restore`];
/// reads go through [`KvStore::get`]. A `BTreeMap` keeps iteration and
/// snapshot bytes identical across replicas that applied the same entries.
#[derive(Debug)]
pub struct KvStore {
    data: RwLock<BTreeMap<String, String>>,

    // Observability handle handed down by the node orchestrator
    span: Span,
}

impl KvStore {
    pub fn new(span: Span) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            span,
        }
    }

    /// Current value of `key` on this replica. Never mutates.
    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the whole mapping
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.data.read().clone()
    }

    /// Copies the mapping under the lock and hands back the owned copy.
    pub fn snapshot_copy(&self) -> KvSnapshot {
        let data = self.data.read().clone();
        KvSnapshot { data }
    }

    fn apply_operation(
        &self,
        op: Operation,
    ) {
        let mut data = self.data.write();
        match op {
            Operation::Insert { key, value } | Operation::Update { key, value } => {
                data.insert(key, value);
            }
            Operation::Delete { key } => {
                // Absent key is a no-op
                data.remove(&key);
            }
        }
    }
}

impl StateMachine for KvStore {
    fn apply(
        &self,
        entry: &Entry,
    ) -> Result<(), ApplyError> {
        let _enter = self.span.enter();

        // Decode before touching the map so a bad payload can never leave a
        // partial mutation behind.
        let op = match Operation::decode(&entry.payload) {
            Ok(op) => op,
            Err(DecodeError::Malformed(reason)) => {
                error!(
                    index = entry.index,
                    term = entry.term,
                    %reason,
                    "Data unmarshalling error, entry not applied"
                );
                APPLY_FAILURES.with_label_values(&["malformed"]).inc();
                return Err(ApplyError::Malformed {
                    index: entry.index,
                    term: entry.term,
                    reason,
                });
            }
            Err(DecodeError::UnknownOp(op)) => {
                error!(
                    index = entry.index,
                    term = entry.term,
                    op,
                    "Wrong operation type, entry not applied"
                );
                APPLY_FAILURES.with_label_values(&["unknown_op"]).inc();
                return Err(ApplyError::UnknownOp {
                    index: entry.index,
                    term: entry.term,
                    op,
                });
            }
        };

        debug!(index = entry.index, op = op.kind(), key = op.key(), "Applying entry");
        self.apply_operation(op);
        APPLIED_ENTRIES.inc();
        Ok(())
    }

    fn snapshot(&self) -> Box<dyn FsmSnapshot> {
        let snapshot = self.snapshot_copy();
        let _enter = self.span.enter();
        debug!(keys = snapshot.len(), "Captured snapshot copy");
        Box::new(snapshot)
    }

    fn restore(
        &self,
        data: &[u8],
    ) -> Result<(), RestoreError> {
        let _enter = self.span.enter();

        let restored = decode_snapshot(data).inspect_err(|e| {
            error!(%e, "Restore failure, existing state kept");
        })?;

        let keys = restored.len();
        *self.data.write() = restored;
        info!(keys, "Restored state from snapshot");
        Ok(())
    }
}

/// Owned copy of the store contents, ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvSnapshot {
    data: BTreeMap<String, String>,
}

impl KvSnapshot {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialized, compressed payload as it lands in a snapshot file
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        encode_snapshot(&self.data)
    }
}

impl FsmSnapshot for KvSnapshot {
    fn persist(
        &self,
        sink: &mut dyn SnapshotSink,
    ) -> Result<(), SnapshotError> {
        let result = self.to_bytes().and_then(|bytes| {
            sink.write_all(&bytes)?;
            sink.flush()?;
            sink.close()?;
            Ok(())
        });

        if let Err(e) = &result {
            warn!(sink = sink.id(), %e, "Snapshot persist failed, cancelling sink");
            if let Err(cancel_err) = sink.cancel() {
                error!(sink = sink.id(), %cancel_err, "Failed to cancel snapshot sink");
            }
        }
        result
    }

    fn release(self: Box<Self>) {}
}

fn snapshot_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

pub(crate) fn encode_snapshot(data: &BTreeMap<String, String>) -> Result<Vec<u8>, SnapshotError> {
    let raw = snapshot_options().serialize(data)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

pub(crate) fn decode_snapshot(data: &[u8]) -> Result<BTreeMap<String, String>, RestoreError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(|e| RestoreError::Malformed(format!("decompression failed: {e}")))?;

    snapshot_options()
        .deserialize(&raw)
        .map_err(|e| RestoreError::Malformed(e.to_string()))
}
