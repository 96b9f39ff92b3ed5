//! Single-process consensus engine.
//!
//! [`LocalEngine`] fulfils the [`ConsensusEngine`] contract for a node that
//! is the only voter it can reach: every proposal is appended to a sled log,
//! then delivered to the state machine by one sequencing task, strictly in
//! index order. Snapshots are copied on that task (so they line up exactly
//! with the applied prefix) and written to disk in the background, after
//! which the log is compacted.
//!
//! Membership changes are recorded in the persisted configuration. Shipping
//! log entries to other members is the job of a replicated engine plugged in
//! through [`ConsensusEngine`]; this engine does not replicate.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing::Instrument;
use tracing::Span;

use crate::constants::LOG_DB_DIR;
use crate::constants::SNAPSHOT_DIR;
use crate::metrics::SNAPSHOTS_TAKEN;
use crate::ClusterMember;
use crate::ConsensusEngine;
use crate::EngineError;
use crate::Entry;
use crate::FileSnapshotStore;
use crate::FsmSnapshot;
use crate::KvNodeConfig;
use crate::LogId;
use crate::SledLog;
use crate::StateMachine;

enum EngineCommand {
    Propose {
        payload: Vec<u8>,
        ack: oneshot::Sender<Result<LogId, EngineError>>,
    },
    Snapshot {
        ack: oneshot::Sender<Result<LogId, EngineError>>,
    },
    Shutdown,
}

struct Inner {
    local: ClusterMember,
    state_machine: Arc<dyn StateMachine>,
    log: SledLog,
    snapshots: FileSnapshotStore,

    configuration: ArcSwap<Vec<ClusterMember>>,
    leader: ArcSwapOption<ClusterMember>,
    // Serializes read-modify-write of `configuration`
    membership_lock: Mutex<()>,
    term: AtomicU64,

    last_snapshot_index: AtomicU64,
    snapshot_in_progress: AtomicBool,
    snapshot_threshold: u64,

    stopped: AtomicBool,
    tx: mpsc::Sender<EngineCommand>,
    // Awaited on shutdown so no task still holds the sled handle afterwards
    sequencer_task: Mutex<Option<JoinHandle<()>>>,
    snapshot_task: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl Inner {
    fn leader_is_local(&self) -> bool {
        self.leader.load().as_ref().is_some_and(|leader| leader.id == self.local.id)
    }
}

#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("local", &self.inner.local)
            .field("term", &self.inner.term.load(Ordering::Acquire))
            .finish()
    }
}

impl LocalEngine {
    /// Opens the engine's storage under `<db_root_dir>/<node_id>/`, rebuilds
    /// the state machine from the newest snapshot plus the log entries after
    /// it, and starts the sequencing task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(
        config: &KvNodeConfig,
        state_machine: Arc<dyn StateMachine>,
        span: Span,
    ) -> Result<Self, EngineError> {
        let data_dir: PathBuf = config.cluster.node_data_dir();
        let log = SledLog::open(data_dir.join(LOG_DB_DIR))?;
        let snapshots = FileSnapshotStore::open(data_dir.join(SNAPSHOT_DIR), config.engine.snapshot_retain)?;
        let local = ClusterMember::voter(&config.cluster.node_id, &config.cluster.raft_address);

        let (last_applied, last_snapshot) = span.in_scope(|| recover(&log, &snapshots, state_machine.as_ref()))?;

        let configuration = log.load_configuration()?.unwrap_or_default();
        let mut term = log.current_term()?;
        let is_member = configuration.iter().any(|m| m.id == local.id && m.voter);
        if is_member {
            // Restarting a bootstrapped node starts a new term
            term += 1;
            log.save_current_term(term)?;
        }

        let (tx, rx) = mpsc::channel(config.engine.proposal_buffer.max(1));
        let inner = Arc::new(Inner {
            leader: ArcSwapOption::from(is_member.then(|| Arc::new(local.clone()))),
            local,
            state_machine,
            log,
            snapshots,
            configuration: ArcSwap::from_pointee(configuration),
            membership_lock: Mutex::new(()),
            term: AtomicU64::new(term),
            last_snapshot_index: AtomicU64::new(last_snapshot.index),
            snapshot_in_progress: AtomicBool::new(false),
            snapshot_threshold: config.engine.snapshot_threshold,
            stopped: AtomicBool::new(false),
            tx,
            sequencer_task: Mutex::new(None),
            snapshot_task: Mutex::new(None),
            span,
        });

        inner.span.in_scope(|| {
            info!(
                term,
                last_applied = last_applied.index,
                leader = is_member,
                "Local engine opened"
            );
        });

        let sequencer = Sequencer {
            inner: inner.clone(),
            last_applied,
            applied_since_snapshot: last_applied.index.saturating_sub(last_snapshot.index),
        };
        let span = inner.span.clone();
        *inner.sequencer_task.lock() = Some(tokio::spawn(sequencer.run(rx).instrument(span)));

        Ok(Self { inner })
    }

    /// Index of the newest snapshot written by this engine
    pub fn last_snapshot_index(&self) -> u64 {
        self.inner.last_snapshot_index.load(Ordering::Acquire)
    }

    pub fn current_term(&self) -> u64 {
        self.inner.term.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    fn ensure_leader(&self) -> Result<(), EngineError> {
        self.ensure_running()?;
        if !self.is_leader() {
            return Err(EngineError::NotLeader { leader: self.leader() });
        }
        Ok(())
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<LogId, EngineError>>) -> EngineCommand,
    ) -> Result<LogId, EngineError> {
        let (ack, rx) = oneshot::channel();
        self.inner.tx.send(make(ack)).await.map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    fn update_configuration(
        &self,
        change: impl FnOnce(&mut Vec<ClusterMember>) -> bool,
    ) -> Result<bool, EngineError> {
        let _guard = self.inner.membership_lock.lock();
        let mut members = self.inner.configuration.load().as_ref().clone();
        if !change(&mut members) {
            return Ok(false);
        }
        self.inner.log.save_configuration(&members)?;
        self.inner.configuration.store(Arc::new(members));
        Ok(true)
    }
}

#[async_trait]
impl ConsensusEngine for LocalEngine {
    async fn bootstrap(
        &self,
        members: Vec<ClusterMember>,
    ) -> Result<(), EngineError> {
        self.ensure_running()?;
        let _enter = self.inner.span.enter();

        if !members.iter().any(|m| m.id == self.inner.local.id) {
            return Err(EngineError::Membership(format!(
                "bootstrap configuration does not contain local node {}",
                self.inner.local.id
            )));
        }

        let local = self.inner.local.clone();
        let bootstrapped = self.update_configuration(|current| {
            if !current.is_empty() {
                return false;
            }
            *current = members;
            true
        })?;

        if !bootstrapped {
            info!("Cluster already bootstrapped, keeping existing configuration");
            return Ok(());
        }

        let term = self.inner.term.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.log.save_current_term(term)?;
        self.inner.leader.store(Some(Arc::new(local)));
        info!(term, members = ?self.members(), "Bootstrapped new cluster");
        Ok(())
    }

    async fn submit(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<LogId, EngineError> {
        self.ensure_leader()?;

        match tokio::time::timeout(timeout, self.request(|ack| EngineCommand::Propose { payload, ack })).await {
            Ok(result) => result,
            Err(_) => {
                let _enter = self.inner.span.enter();
                warn!(?timeout, "Proposal not acknowledged in time");
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    async fn add_voter(
        &self,
        id: String,
        address: String,
    ) -> Result<(), EngineError> {
        self.ensure_leader()?;
        let _enter = self.inner.span.enter();

        let member = ClusterMember::voter(id, address);
        let changed = self.update_configuration(|members| {
            match members.iter_mut().find(|m| m.id == member.id) {
                Some(existing) if *existing == member => false,
                Some(existing) => {
                    *existing = member.clone();
                    true
                }
                None => {
                    members.push(member.clone());
                    true
                }
            }
        })?;

        if changed {
            info!(%member, "Added voter");
        } else {
            debug!(%member, "Voter already present");
        }
        Ok(())
    }

    async fn remove_server(
        &self,
        id: String,
    ) -> Result<bool, EngineError> {
        self.ensure_leader()?;
        let _enter = self.inner.span.enter();

        let removed = self.update_configuration(|members| {
            let before = members.len();
            members.retain(|m| m.id != id);
            members.len() != before
        })?;

        if !removed {
            warn!(%id, "Remove requested for unknown member");
            return Ok(false);
        }

        info!(%id, "Removed member");
        if id == self.inner.local.id {
            self.inner.leader.store(None);
            info!("Local node removed from configuration, stepping down");
        }
        Ok(true)
    }

    async fn snapshot(&self) -> Result<LogId, EngineError> {
        self.ensure_running()?;
        self.request(|ack| EngineCommand::Snapshot { ack }).await
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Proposals queued ahead of the shutdown are still processed
        let _ = self.inner.tx.send(EngineCommand::Shutdown).await;
        let sequencer = self.inner.sequencer_task.lock().take();
        if let Some(handle) = sequencer {
            if let Err(e) = handle.await {
                self.inner.span.in_scope(|| error!(%e, "Sequencer task failed"));
            }
        }
        let snapshot = self.inner.snapshot_task.lock().take();
        if let Some(handle) = snapshot {
            if let Err(e) = handle.await {
                self.inner.span.in_scope(|| error!(%e, "Snapshot task failed"));
            }
        }

        self.inner.leader.store(None);
        self.inner.log.flush()?;

        let _enter = self.inner.span.enter();
        info!("Local engine shut down");
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.inner.leader_is_local()
    }

    fn leader(&self) -> Option<ClusterMember> {
        self.inner.leader.load_full().map(|m| m.as_ref().clone())
    }

    fn members(&self) -> Vec<ClusterMember> {
        self.inner.configuration.load().as_ref().clone()
    }
}

/// Owns the apply order. Only this task touches the state machine after
/// recovery.
struct Sequencer {
    inner: Arc<Inner>,
    last_applied: LogId,
    applied_since_snapshot: u64,
}

impl Sequencer {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<EngineCommand>,
    ) {
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Propose { payload, ack } => {
                    let result = self.propose(payload);
                    // The caller may have timed out already
                    let _ = ack.send(result);
                    self.maybe_auto_snapshot();
                }
                EngineCommand::Snapshot { ack } => {
                    let _ = ack.send(self.start_snapshot());
                }
                EngineCommand::Shutdown => break,
            }
        }
        debug!("Sequencer stopped");
    }

    fn propose(
        &mut self,
        payload: Vec<u8>,
    ) -> Result<LogId, EngineError> {
        let inner = &self.inner;
        if !inner.leader_is_local() {
            return Err(EngineError::NotLeader {
                leader: inner.leader.load_full().map(|m| m.as_ref().clone()),
            });
        }

        let entry = Entry {
            index: self.last_applied.index + 1,
            term: inner.term.load(Ordering::Acquire),
            payload,
        };
        inner.log.append(&entry)?;
        self.last_applied = entry.log_id();
        self.applied_since_snapshot += 1;

        inner.state_machine.apply(&entry)?;
        debug!(index = entry.index, term = entry.term, "Committed entry applied");
        Ok(entry.log_id())
    }

    fn maybe_auto_snapshot(&mut self) {
        let threshold = self.inner.snapshot_threshold;
        if threshold == 0 || self.applied_since_snapshot < threshold {
            return;
        }
        match self.start_snapshot() {
            Ok(log_id) => info!(?log_id, "Automatic snapshot started"),
            Err(e) => debug!(%e, "Automatic snapshot skipped"),
        }
    }

    fn start_snapshot(&mut self) -> Result<LogId, EngineError> {
        let last_included = self.last_applied;
        if last_included.index <= self.inner.last_snapshot_index.load(Ordering::Acquire) {
            return Err(EngineError::Snapshot("nothing new to snapshot".to_string()));
        }
        if self.inner.snapshot_in_progress.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Snapshot("snapshot already in progress".to_string()));
        }

        // Copy on the sequencing task so the snapshot matches `last_included`
        let fsm_snapshot = self.inner.state_machine.snapshot();
        self.applied_since_snapshot = 0;

        let inner = self.inner.clone();
        let span = Span::current();
        let handle = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            if let Err(e) = persist_snapshot(&inner, fsm_snapshot, last_included) {
                error!(%e, ?last_included, "Snapshot failed");
            }
            inner.snapshot_in_progress.store(false, Ordering::Release);
        });
        *self.inner.snapshot_task.lock() = Some(handle);

        Ok(last_included)
    }
}

fn persist_snapshot(
    inner: &Inner,
    fsm_snapshot: Box<dyn FsmSnapshot>,
    last_included: LogId,
) -> Result<(), EngineError> {
    let mut sink = inner.snapshots.create(last_included)?;
    let result = fsm_snapshot.persist(&mut sink);
    fsm_snapshot.release();
    result.map_err(|e| EngineError::Snapshot(e.to_string()))?;

    let purged = inner.log.purge_up_to(last_included)?;
    inner.last_snapshot_index.store(last_included.index, Ordering::Release);
    SNAPSHOTS_TAKEN.inc();
    info!(?last_included, purged, "Snapshot persisted and log compacted");
    Ok(())
}

/// Restores the newest snapshot, then replays the log entries after it.
/// Returns (last applied, last snapshot) positions.
fn recover(
    log: &SledLog,
    snapshots: &FileSnapshotStore,
    state_machine: &dyn StateMachine,
) -> Result<(LogId, LogId), EngineError> {
    let mut last_snapshot = LogId::default();
    if let Some(meta) = snapshots.latest()? {
        let data = snapshots.read(&meta)?;
        state_machine
            .restore(&data)
            .map_err(|e| EngineError::Snapshot(format!("restore from {} failed: {e}", meta.id)))?;
        info!(id = %meta.id, "Restored state machine from snapshot");
        last_snapshot = meta.last_included;
    }

    if let Some(purged) = log.last_purged()? {
        if purged.index > last_snapshot.index {
            warn!(?purged, ?last_snapshot, "Log purged beyond the newest snapshot on disk");
        }
    }

    let mut last_applied = last_snapshot;
    for entry in log.entries_after(last_snapshot.index)? {
        if let Err(e) = state_machine.apply(&entry) {
            // Already committed; the state machine kept its prior state
            warn!(%e, "Replayed entry rejected by state machine");
        }
        last_applied = entry.log_id();
    }
    Ok((last_applied, last_snapshot))
}
