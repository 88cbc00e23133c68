//! Collaborator interfaces
//!
//! The synchronization manager coordinates; it never reads the WAL,
//! produces snapshots or touches the network itself. Those collaborators
//! are injected once, at construction, as an immutable record of trait
//! objects. Every method is synchronous: a sync operation either completes
//! its transition or errors, and long-running work (log replay, chunk
//! install, checkpointing) is signalled back through later inbound
//! operations.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncResult;
use crate::partition::{Lsn, PartitionId, PartitionRevision, SequentialNumber, SyncMode};
use crate::sync::protocol::SyncEvent;

/// One contiguous slice of redo log.
#[derive(Debug, Clone)]
pub struct LogSlice {
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub data: Vec<u8>,
}

/// Read access to the write-ahead log.
pub trait LogReader: Send + Sync {
    /// Read log records starting at `from_lsn`, capped at `max_bytes`.
    fn read_log(&self, pid: PartitionId, from_lsn: Lsn, max_bytes: usize) -> SyncResult<LogSlice>;
}

/// One batch of snapshot chunks.
#[derive(Debug, Clone)]
pub struct ChunkBatch {
    /// Size of each chunk in the batch.
    pub base_size: usize,
    /// Chunks in this batch.
    pub count: u32,
    /// Chunks in the whole snapshot.
    pub total: u32,
    pub data: Vec<u8>,
}

/// Snapshot chunk producer (checkpoint output).
pub trait ChunkProvider: Send + Sync {
    fn total_chunks(&self, pid: PartitionId) -> u32;

    /// Read up to `max_count` chunks starting at `chunk_no`.
    fn read_chunks(&self, pid: PartitionId, chunk_no: u32, max_count: u32)
        -> SyncResult<ChunkBatch>;
}

/// Checkpoint service: asked to begin a snapshot for a long-term sync.
/// Completion is signalled back via
/// `SyncManager::set_sync_checkpoint_completed`.
pub trait CheckpointService: Send + Sync {
    fn request_checkpoint(&self, pid: PartitionId, ssn: SequentialNumber);
}

/// Storage-side execution of received payloads.
pub trait RedoApplier: Send + Sync {
    /// Apply a log slice; returns the partition's LSN afterwards.
    fn apply_log(&self, pid: PartitionId, data: &[u8], end_lsn: Lsn) -> SyncResult<Lsn>;

    /// Install a chunk batch; returns the LSN the snapshot restores to.
    fn install_chunks(
        &self,
        pid: PartitionId,
        base_size: usize,
        count: u32,
        data: &[u8],
    ) -> SyncResult<Lsn>;
}

/// Outbound edge. `post` enqueues; `queue_size` reports the pending
/// outbound depth per protocol so the manager can pace emissions.
pub trait SyncTransport: Send + Sync {
    fn post(&self, event: SyncEvent, delay: Duration);

    fn queue_size(&self, mode: SyncMode) -> usize;
}

/// Cluster manager notifications: sync outcomes feed role promotion.
pub trait ClusterNotifier: Send + Sync {
    fn on_shortterm_completed(&self, pid: PartitionId, pt_rev: PartitionRevision);

    fn on_longterm_completed(&self, pid: PartitionId, pt_rev: PartitionRevision);

    fn on_sync_failed(&self, pid: PartitionId, pt_rev: PartitionRevision);
}

/// The immutable collaborator record handed to the manager at
/// construction. No back-patching after this point.
#[derive(Clone)]
pub struct Collaborators {
    pub log_reader: Arc<dyn LogReader>,
    pub chunk_provider: Arc<dyn ChunkProvider>,
    pub checkpoint: Arc<dyn CheckpointService>,
    pub redo: Arc<dyn RedoApplier>,
    pub transport: Arc<dyn SyncTransport>,
    pub cluster: Arc<dyn ClusterNotifier>,
}
