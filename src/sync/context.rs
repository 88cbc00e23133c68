//! Per-episode synchronization context
//!
//! One `SyncContext` holds everything a single in-flight sync episode
//! needs on this node: identity, peer ack tracking, the owned log/chunk
//! buffers, progress counters and timers. Contexts live in slots of a
//! `SyncContextTable` and are recycled through its free list.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::SyncResult;
use crate::partition::{
    Lsn, NodeId, PartitionId, PartitionRevision, SequentialNumber, StatementId, SyncId, SyncMode,
    SyncRole, UNDEF_LSN,
};
use crate::sync::allocator::{PooledBuffer, SyncAllocator};

/// Progress of a sync episode.
///
/// Short-term owners walk `Idle → Requested → Started → LogStreaming →
/// Ended`; long-term episodes walk `Idle → Prepared → ChunkStreaming →
/// LogCatchup → Done`. Backup/catchup sides only use the subset they
/// observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Requested,
    Started,
    LogStreaming,
    Ended,
    Prepared,
    ChunkStreaming,
    LogCatchup,
    Done,
}

/// Which of the two owned buffers an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Log,
    Chunk,
}

/// Ack bookkeeping for one downstream peer.
#[derive(Debug, Clone)]
pub struct SendBackup {
    pub node_id: NodeId,
    pub acked: bool,
    pub lsn: Lsn,
    pub backup_sync_id: SyncId,
}

impl SendBackup {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            acked: false,
            lsn: UNDEF_LSN,
            backup_sync_id: SyncId::UNDEF,
        }
    }
}

pub struct SyncContext {
    id: i32,
    version: u64,
    pid: PartitionId,
    ssn: SequentialNumber,
    pt_rev: PartitionRevision,
    mode: SyncMode,
    role: SyncRole,
    state: SyncState,
    used: bool,

    send_backups: Vec<SendBackup>,
    num_send_backup: u32,
    next_stmt_id: StatementId,
    recv_node_id: Option<NodeId>,

    cp_completed: bool,
    cp_pending: bool,
    start_completed: bool,
    send_ready: bool,

    log_buffer: Option<PooledBuffer>,
    chunk_buffer: Option<PooledBuffer>,
    chunk_base_size: usize,
    chunk_num: u32,
    chunk_no: u32,

    processed_chunk_num: u32,
    processed_log_num: u64,
    processed_log_bytes: u64,
    start_lsn: Lsn,
    end_lsn: Lsn,

    watch_started: Option<Instant>,
    batch_started: Option<Instant>,
    actual_log_time: Duration,
    actual_chunk_time: Duration,
    chunk_lead_time: Duration,
    total_time: Duration,

    /// Free-list linkage, an index into the owning table's slot vector.
    pub(crate) next_free: Option<usize>,
}

impl SyncContext {
    pub(crate) fn new(id: i32) -> Self {
        Self {
            id,
            version: SyncId::INITIAL_CONTEXT_VERSION,
            pid: 0,
            ssn: -1,
            pt_rev: PartitionRevision(0),
            mode: SyncMode::ShortTerm,
            role: SyncRole::Owner,
            state: SyncState::Idle,
            used: false,
            send_backups: Vec::new(),
            num_send_backup: 0,
            next_stmt_id: 0,
            recv_node_id: None,
            cp_completed: false,
            cp_pending: false,
            start_completed: false,
            send_ready: false,
            log_buffer: None,
            chunk_buffer: None,
            chunk_base_size: 0,
            chunk_num: 0,
            chunk_no: 0,
            processed_chunk_num: 0,
            processed_log_num: 0,
            processed_log_bytes: 0,
            start_lsn: 0,
            end_lsn: 0,
            watch_started: None,
            batch_started: None,
            actual_log_time: Duration::ZERO,
            actual_chunk_time: Duration::ZERO,
            chunk_lead_time: Duration::ZERO,
            total_time: Duration::ZERO,
            next_free: None,
        }
    }

    /// Bring a slot to life for a new episode. The version has already
    /// been bumped by the table when the slot is a recycled one.
    pub(crate) fn activate(
        &mut self,
        pid: PartitionId,
        pt_rev: PartitionRevision,
        mode: SyncMode,
        role: SyncRole,
        ssn: SequentialNumber,
    ) {
        self.pid = pid;
        self.pt_rev = pt_rev;
        self.mode = mode;
        self.role = role;
        self.ssn = ssn;
        self.state = SyncState::Idle;
        self.used = true;
        self.next_free = None;
        self.watch_started = Some(Instant::now());
    }

    // --- identity ---

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn sync_id(&self) -> SyncId {
        SyncId::new(self.id, self.version)
    }

    pub fn partition_id(&self) -> PartitionId {
        self.pid
    }

    pub fn sequential_number(&self) -> SequentialNumber {
        self.ssn
    }

    pub fn partition_revision(&self) -> PartitionRevision {
        self.pt_rev
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn role(&self) -> SyncRole {
        self.role
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub(crate) fn set_unused(&mut self) {
        self.used = false;
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn set_state(&mut self, state: SyncState) {
        self.state = state;
    }

    // --- statement tags ---

    /// Mint the tag for the next outbound statement. Strictly monotonic
    /// over the context lifetime.
    pub fn create_statement_id(&mut self) -> StatementId {
        self.next_stmt_id += 1;
        self.next_stmt_id
    }

    pub fn statement_id(&self) -> StatementId {
        self.next_stmt_id
    }

    /// Replies carrying any other tag are stale and must be discarded.
    pub fn expects_statement(&self, stmt_id: StatementId) -> bool {
        self.next_stmt_id == stmt_id
    }

    // --- peer tracking ---

    pub fn set_recv_node_id(&mut self, node_id: NodeId) {
        self.recv_node_id = Some(node_id);
    }

    pub fn recv_node_id(&self) -> Option<NodeId> {
        self.recv_node_id
    }

    pub fn add_send_backup(&mut self, node_id: NodeId) {
        self.send_backups.push(SendBackup::new(node_id));
    }

    pub fn send_backup_nodes(&self) -> Vec<NodeId> {
        self.send_backups.iter().map(|b| b.node_id).collect()
    }

    pub fn send_backups(&self) -> &[SendBackup] {
        &self.send_backups
    }

    pub fn set_sync_target_lsn(&mut self, node_id: NodeId, lsn: Lsn) {
        if let Some(backup) = self.send_backups.iter_mut().find(|b| b.node_id == node_id) {
            backup.lsn = lsn;
        }
    }

    pub fn set_sync_target_lsn_with_sync_id(
        &mut self,
        node_id: NodeId,
        lsn: Lsn,
        backup_sync_id: SyncId,
    ) {
        if let Some(backup) = self.send_backups.iter_mut().find(|b| b.node_id == node_id) {
            backup.lsn = lsn;
            backup.backup_sync_id = backup_sync_id;
        }
    }

    pub fn sync_target_lsn(&self, node_id: NodeId) -> Option<Lsn> {
        self.send_backups
            .iter()
            .find(|b| b.node_id == node_id)
            .map(|b| b.lsn)
    }

    /// Remote context identity of the single downstream peer (catchup
    /// side of a long-term sync, or the first backup).
    pub fn catchup_sync_id(&self) -> SyncId {
        self.send_backups
            .first()
            .map(|b| b.backup_sync_id)
            .unwrap_or(SyncId::UNDEF)
    }

    // --- ack counter discipline ---

    /// Begin a fresh barrier: every peer owes an ack.
    pub fn reset_counter(&mut self) {
        for backup in &mut self.send_backups {
            backup.acked = false;
        }
        self.num_send_backup = self.send_backups.len() as u32;
    }

    /// Begin a barrier over a subset of peers; the rest are treated as
    /// already acked.
    pub fn arm_barrier(&mut self, targets: &[NodeId]) {
        let mut armed = 0u32;
        for backup in &mut self.send_backups {
            if targets.contains(&backup.node_id) {
                backup.acked = false;
                armed += 1;
            } else {
                backup.acked = true;
            }
        }
        self.num_send_backup = armed;
    }

    /// Credit an ack from `node_id`. Returns true when this ack crossed
    /// the barrier (pending count reached zero). Duplicate or unexpected
    /// acks leave the counter untouched.
    ///
    /// Duplicate node ids are legal during topology changes; the earliest
    /// unacked entry is the one credited.
    pub fn decrement_counter(&mut self, node_id: NodeId) -> bool {
        let Some(backup) = self
            .send_backups
            .iter_mut()
            .find(|b| b.node_id == node_id && !b.acked)
        else {
            trace!(
                "Duplicate or unexpected ack from node {} on context {}",
                node_id,
                self.sync_id()
            );
            return false;
        };
        backup.acked = true;
        self.num_send_backup = self.num_send_backup.saturating_sub(1);
        self.num_send_backup == 0
    }

    /// Authoritative pending-ack count for the current barrier.
    pub fn pending_acks(&self) -> u32 {
        self.num_send_backup
    }

    // --- progress flags ---

    pub fn set_checkpoint_completed(&mut self) {
        self.cp_completed = true;
        self.cp_pending = false;
    }

    pub fn is_checkpoint_completed(&self) -> bool {
        self.cp_completed
    }

    /// Pending and completed are mutually exclusive; arming the pending
    /// flag after completion is ignored.
    pub fn set_checkpoint_pending(&mut self, flag: bool) {
        if flag && self.cp_completed {
            debug!(
                "Ignoring checkpoint-pending on already completed context {}",
                self.sync_id()
            );
            return;
        }
        self.cp_pending = flag;
    }

    pub fn is_checkpoint_pending(&self) -> bool {
        self.cp_pending
    }

    pub fn set_sync_start_completed(&mut self, flag: bool) {
        self.start_completed = flag;
    }

    pub fn is_sync_start_completed(&self) -> bool {
        self.start_completed
    }

    pub fn set_send_ready(&mut self) {
        self.send_ready = true;
    }

    pub fn is_send_ready(&self) -> bool {
        self.send_ready
    }

    // --- buffers ---

    /// Replace the owned log buffer with a copy of `src`.
    ///
    /// The new buffer is allocated before the old one is released: on
    /// allocation failure the previous buffer (and its accounting) is
    /// preserved and the error is propagated.
    pub fn copy_log_buffer(&mut self, alloc: &SyncAllocator, src: &[u8]) -> SyncResult<()> {
        let fresh = alloc.copy_from(self.pid, src)?;
        if let Some(old) = self.log_buffer.replace(fresh) {
            alloc.release(old);
        }
        Ok(())
    }

    /// Replace the owned chunk buffer with `count` chunks of `chunk_size`
    /// bytes each, copied from `src`.
    pub fn copy_chunk_buffer(
        &mut self,
        alloc: &SyncAllocator,
        src: &[u8],
        chunk_size: usize,
        count: u32,
    ) -> SyncResult<()> {
        let fresh = alloc.copy_from(self.pid, src)?;
        if let Some(old) = self.chunk_buffer.replace(fresh) {
            alloc.release(old);
        }
        self.chunk_base_size = chunk_size;
        self.chunk_num = count;
        self.chunk_no = 0;
        Ok(())
    }

    pub fn log_buffer(&self) -> Option<&[u8]> {
        self.log_buffer.as_ref().map(|b| b.as_slice())
    }

    pub fn log_buffer_size(&self) -> usize {
        self.log_buffer.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Borrow one chunk out of the owned chunk buffer.
    pub fn chunk(&self, chunk_no: u32) -> Option<&[u8]> {
        let buffer = self.chunk_buffer.as_ref()?;
        if chunk_no >= self.chunk_num || self.chunk_base_size == 0 {
            return None;
        }
        let start = chunk_no as usize * self.chunk_base_size;
        let end = (start + self.chunk_base_size).min(buffer.len());
        buffer.as_slice().get(start..end)
    }

    pub fn chunk_buffer(&self) -> Option<&[u8]> {
        self.chunk_buffer.as_ref().map(|b| b.as_slice())
    }

    /// `(chunk_num, chunk_base_size)` of the buffered batch.
    pub fn chunk_info(&self) -> (u32, usize) {
        (self.chunk_num, self.chunk_base_size)
    }

    pub fn chunk_num(&self) -> u32 {
        self.chunk_num
    }

    /// Cursor of the next chunk to hand out of the buffered batch.
    pub fn chunk_no(&self) -> u32 {
        self.chunk_no
    }

    /// Release one owned buffer; safe when the buffer is absent.
    pub fn free_buffer(&mut self, alloc: &SyncAllocator, kind: BufferKind) {
        let slot = match kind {
            BufferKind::Log => &mut self.log_buffer,
            BufferKind::Chunk => &mut self.chunk_buffer,
        };
        if let Some(buffer) = slot.take() {
            alloc.release(buffer);
        }
    }

    /// Release both buffers and reset every per-episode field, readying
    /// the slot for the free list. Identity (id, version) survives.
    pub fn clear(&mut self, alloc: &SyncAllocator) {
        self.free_buffer(alloc, BufferKind::Log);
        self.free_buffer(alloc, BufferKind::Chunk);
        self.send_backups.clear();
        self.num_send_backup = 0;
        self.next_stmt_id = 0;
        self.recv_node_id = None;
        self.cp_completed = false;
        self.cp_pending = false;
        self.start_completed = false;
        self.send_ready = false;
        self.chunk_base_size = 0;
        self.chunk_num = 0;
        self.chunk_no = 0;
        self.processed_chunk_num = 0;
        self.processed_log_num = 0;
        self.processed_log_bytes = 0;
        self.start_lsn = 0;
        self.end_lsn = 0;
        self.watch_started = None;
        self.batch_started = None;
        self.actual_log_time = Duration::ZERO;
        self.actual_chunk_time = Duration::ZERO;
        self.chunk_lead_time = Duration::ZERO;
        self.total_time = Duration::ZERO;
        self.state = SyncState::Idle;
    }

    // --- metrics ---

    pub fn inc_processed_chunk_num(&mut self, count: u32) {
        self.processed_chunk_num += count;
    }

    pub fn processed_chunk_num(&self) -> u32 {
        self.processed_chunk_num
    }

    pub fn inc_processed_log(&mut self, bytes: u64) {
        self.processed_log_bytes += bytes;
        self.processed_log_num += 1;
    }

    pub fn processed_log_num(&self) -> u64 {
        self.processed_log_num
    }

    pub fn processed_log_bytes(&self) -> u64 {
        self.processed_log_bytes
    }

    /// Record the LSN range of a processed slice; the first slice pins the
    /// start of the episode's range.
    pub fn set_processed_lsn(&mut self, start_lsn: Lsn, end_lsn: Lsn) {
        if self.processed_log_num == 0 {
            self.start_lsn = start_lsn;
        }
        self.end_lsn = end_lsn;
    }

    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    pub fn end_lsn(&self) -> Lsn {
        self.end_lsn
    }

    // --- timers ---

    pub fn record_log_time(&mut self, started: Instant) {
        self.actual_log_time += started.elapsed();
    }

    pub fn record_chunk_time(&mut self, started: Instant) {
        self.actual_chunk_time += started.elapsed();
    }

    /// Mark the start of one in-flight batch (a log slice or chunk batch
    /// awaiting its ack).
    pub fn start_batch_timer(&mut self) {
        self.batch_started = Some(Instant::now());
    }

    pub fn take_batch_timer(&mut self) -> Option<Instant> {
        self.batch_started.take()
    }

    /// Stamp the lead time from episode start to the last chunk.
    pub fn end_chunk_all(&mut self) {
        if let Some(started) = self.watch_started {
            self.chunk_lead_time = started.elapsed();
        }
    }

    pub fn end_all(&mut self) {
        if let Some(started) = self.watch_started {
            self.total_time += started.elapsed();
            self.watch_started = Some(Instant::now());
        }
    }

    /// Whether the episode has run long enough to be worth reporting.
    /// Long-term syncs always are.
    pub fn check_total_time(&self, threshold: Duration) -> bool {
        match self.mode {
            SyncMode::LongTerm => true,
            SyncMode::ShortTerm => self.total_time >= threshold,
        }
    }

    pub fn actual_log_time(&self) -> Duration {
        self.actual_log_time
    }

    pub fn actual_chunk_time(&self) -> Duration {
        self.actual_chunk_time
    }

    pub fn chunk_lead_time(&self) -> Duration {
        self.chunk_lead_time
    }

    pub fn dump(&self) -> String {
        format!(
            "{{mode:{}, role:{}, pId:{}, syncId:{}, ssn:{}, state:{:?}, pending:{}, \
             processedLog:{}/{}B, processedChunk:{}/{}, lsn:[{},{}]}}",
            self.mode.label(),
            self.role.label(),
            self.pid,
            self.sync_id(),
            self.ssn,
            self.state,
            self.num_send_backup,
            self.processed_log_num,
            self.processed_log_bytes,
            self.processed_chunk_num,
            self.chunk_num,
            self.start_lsn,
            self.end_lsn,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::stats::SyncStats;
    use std::sync::Arc;

    fn context() -> SyncContext {
        let mut ctx = SyncContext::new(0);
        ctx.activate(
            0,
            PartitionRevision(1),
            SyncMode::ShortTerm,
            SyncRole::Owner,
            7,
        );
        ctx
    }

    fn pool() -> SyncAllocator {
        SyncAllocator::new(Arc::new(SyncStats::new(1)))
    }

    #[test]
    fn test_ack_barrier_counts_down() {
        let mut ctx = context();
        for node in [1, 2, 3] {
            ctx.add_send_backup(node);
        }
        ctx.reset_counter();
        assert_eq!(ctx.pending_acks(), 3);

        assert!(!ctx.decrement_counter(2));
        assert_eq!(ctx.pending_acks(), 2);
        assert!(!ctx.decrement_counter(1));
        assert_eq!(ctx.pending_acks(), 1);
        assert!(ctx.decrement_counter(3));
        assert_eq!(ctx.pending_acks(), 0);

        let acked = ctx.send_backups().iter().filter(|b| b.acked).count();
        assert_eq!(acked, 3);
    }

    #[test]
    fn test_duplicate_ack_does_not_underflow() {
        let mut ctx = context();
        ctx.add_send_backup(1);
        ctx.add_send_backup(2);
        ctx.reset_counter();

        assert!(!ctx.decrement_counter(1));
        assert!(!ctx.decrement_counter(1));
        assert_eq!(ctx.pending_acks(), 1);
        // Ack from a node never registered is ignored too.
        assert!(!ctx.decrement_counter(9));
        assert_eq!(ctx.pending_acks(), 1);
    }

    #[test]
    fn test_duplicate_node_entries_credit_earliest() {
        let mut ctx = context();
        ctx.add_send_backup(5);
        ctx.add_send_backup(5);
        ctx.reset_counter();
        assert_eq!(ctx.pending_acks(), 2);

        assert!(!ctx.decrement_counter(5));
        assert!(ctx.send_backups()[0].acked);
        assert!(!ctx.send_backups()[1].acked);
        assert!(ctx.decrement_counter(5));
    }

    #[test]
    fn test_arm_barrier_subset() {
        let mut ctx = context();
        for node in [1, 2, 3] {
            ctx.add_send_backup(node);
        }
        ctx.arm_barrier(&[2]);
        assert_eq!(ctx.pending_acks(), 1);
        assert!(!ctx.decrement_counter(1));
        assert_eq!(ctx.pending_acks(), 1);
        assert!(ctx.decrement_counter(2));
    }

    #[test]
    fn test_peer_tracking_accessors() {
        let mut ctx = context();
        ctx.add_send_backup(4);
        ctx.add_send_backup(6);
        ctx.set_sync_target_lsn(4, 77);
        ctx.set_sync_target_lsn_with_sync_id(6, 88, SyncId::new(2, 5));

        assert_eq!(ctx.send_backup_nodes(), vec![4, 6]);
        assert_eq!(ctx.sync_target_lsn(4), Some(77));
        assert_eq!(ctx.sync_target_lsn(9), None);
        // The first peer's remote identity is the catchup handle.
        assert_eq!(ctx.catchup_sync_id(), SyncId::UNDEF);
        ctx.set_sync_target_lsn_with_sync_id(4, 77, SyncId::new(1, 3));
        assert_eq!(ctx.catchup_sync_id(), SyncId::new(1, 3));

        ctx.set_recv_node_id(12);
        assert_eq!(ctx.recv_node_id(), Some(12));

        assert!(!ctx.is_send_ready());
        ctx.set_send_ready();
        assert!(ctx.is_send_ready());
        assert!(!ctx.is_sync_start_completed());
        ctx.set_sync_start_completed(true);
        assert!(ctx.is_sync_start_completed());
    }

    #[test]
    fn test_checkpoint_pending_excludes_completed() {
        let mut ctx = context();
        ctx.set_checkpoint_pending(true);
        assert!(ctx.is_checkpoint_pending());
        assert!(!ctx.is_checkpoint_completed());

        ctx.set_checkpoint_completed();
        assert!(ctx.is_checkpoint_completed());
        assert!(!ctx.is_checkpoint_pending());

        // Re-arming pending after completion is ignored.
        ctx.set_checkpoint_pending(true);
        assert!(!ctx.is_checkpoint_pending());
    }

    #[test]
    fn test_statement_ids_strictly_increase() {
        let mut ctx = context();
        let first = ctx.create_statement_id();
        let second = ctx.create_statement_id();
        assert!(second > first);
        assert!(ctx.expects_statement(second));
        assert!(!ctx.expects_statement(first));
    }

    #[test]
    fn test_log_buffer_handoff_charges_back() {
        let alloc = pool();
        let mut ctx = context();

        ctx.copy_log_buffer(&alloc, &[1u8; 300]).unwrap();
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 300);

        // Replacing frees the previous buffer.
        ctx.copy_log_buffer(&alloc, &[2u8; 700]).unwrap();
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 700);
        assert_eq!(ctx.log_buffer_size(), 700);

        assert_eq!(ctx.log_buffer().unwrap()[0], 2);
        ctx.free_buffer(&alloc, BufferKind::Log);
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 0);
        assert!(ctx.log_buffer().is_none());
        // Freeing an absent buffer is safe.
        ctx.free_buffer(&alloc, BufferKind::Log);
    }

    #[test]
    fn test_chunk_buffer_slicing() {
        let alloc = pool();
        let mut ctx = context();

        let mut payload = vec![0u8; 1024];
        payload[0] = 0xA0;
        payload[512] = 0xB0;
        ctx.copy_chunk_buffer(&alloc, &payload, 512, 2).unwrap();

        assert_eq!(ctx.chunk_info(), (2, 512));
        assert_eq!(ctx.chunk_num(), 2);
        assert_eq!(ctx.chunk_no(), 0);
        assert_eq!(ctx.chunk_buffer().unwrap().len(), 1024);
        assert_eq!(ctx.chunk(0).unwrap()[0], 0xA0);
        assert_eq!(ctx.chunk(1).unwrap()[0], 0xB0);
        assert!(ctx.chunk(2).is_none());

        ctx.clear(&alloc);
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 0);
        assert!(ctx.chunk(0).is_none());
    }

    #[test]
    fn test_processed_lsn_pins_start() {
        let mut ctx = context();
        ctx.set_processed_lsn(10, 20);
        ctx.inc_processed_log(100);
        ctx.set_processed_lsn(20, 35);
        ctx.inc_processed_log(150);

        assert_eq!(ctx.start_lsn(), 10);
        assert_eq!(ctx.end_lsn(), 35);
        assert_eq!(ctx.processed_log_num(), 2);
        assert_eq!(ctx.processed_log_bytes(), 250);
    }

    #[test]
    fn test_check_total_time_by_mode() {
        let ctx = context();
        assert!(!ctx.check_total_time(Duration::from_millis(1)));

        let mut ls = SyncContext::new(1);
        ls.activate(
            0,
            PartitionRevision(1),
            SyncMode::LongTerm,
            SyncRole::Owner,
            8,
        );
        assert!(ls.check_total_time(Duration::from_secs(3600)));
    }
}
