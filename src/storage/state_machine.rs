//! StateMachine
//!
//! The contract a consensus engine needs to treat the key-value store as a
//! pluggable replicated state machine:
//! - Applying committed log entries, strictly in commit order
//! - Capturing a consistent point-in-time copy for snapshotting
//! - Replacing the whole state from a snapshot payload

use std::io::Write;

#[cfg(test)]
use mockall::automock;

use crate::ApplyError;
use crate::Entry;
use crate::RestoreError;
use crate::SnapshotError;

#[cfg_attr(test, automock)]
pub trait StateMachine: Send + Sync + 'static {
    /// Applies one committed entry.
    ///
    /// Called by the engine in commit order and never concurrently with
    /// itself. A failed apply must leave existing state intact so that later
    /// entries can still be applied.
    fn apply(
        &self,
        entry: &Entry,
    ) -> Result<(), ApplyError>;

    /// Copies the current state. Only the copy happens under the state lock;
    /// serialization is deferred to [`FsmSnapshot::persist`].
    fn snapshot(&self) -> Box<dyn FsmSnapshot>;

    /// Replaces the whole state with the snapshot payload, or nothing at all.
    fn restore(
        &self,
        data: &[u8],
    ) -> Result<(), RestoreError>;
}

/// An immutable, fully materialized copy of state machine contents.
pub trait FsmSnapshot: Send + 'static {
    /// Serializes the copy into `sink`.
    ///
    /// On failure the sink is cancelled so no partial file is left behind as
    /// a valid snapshot; on success the sink is closed.
    fn persist(
        &self,
        sink: &mut dyn SnapshotSink,
    ) -> Result<(), SnapshotError>;

    /// Drops the in-memory copy.
    fn release(self: Box<Self>);
}

/// Destination of a snapshot being written.
pub trait SnapshotSink: Write + Send {
    /// Identifier of the snapshot under construction
    fn id(&self) -> &str;

    /// Discards everything written so far.
    fn cancel(&mut self) -> std::io::Result<()>;

    /// Makes the written snapshot durable and visible.
    fn close(&mut self) -> std::io::Result<()>;
}
