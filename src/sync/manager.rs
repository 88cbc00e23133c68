//! Synchronization manager
//!
//! The facade over the whole fabric: owns the per-partition context
//! tables, the shared buffer pool and statistics, and the long-term sync
//! registry. Inbound operations enter through `dispatch`, which gates them
//! against the partition role, applies the state-machine transition and
//! posts the outbound operations through the transport collaborator.
//!
//! Lock discipline: at most one lock is held at a time. Handlers lock the
//! partition's table, mutate the context, collect outbound events, release
//! the lock, then touch the registry / transport / notifiers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::{ConfigRegistry, SyncConfig, SyncExtraConfig, DEFAULT_DETECT_SYNC_ERROR_COUNT};
use crate::error::{SyncError, SyncResult};
use crate::partition::{
    Lsn, NodeId, PartitionId, PartitionRevision, PartitionTable, SequentialNumber, SyncId,
    SyncMode, SyncRole, UNDEF_LSN,
};
use crate::sync::allocator::SyncAllocator;
use crate::sync::context::{SyncContext, SyncState};
use crate::sync::protocol::{SyncEvent, SyncOperationType, SyncPayload};
use crate::sync::registry::{LongSyncEntry, LongSyncRegistry, LongSyncSide};
use crate::sync::services::Collaborators;
use crate::sync::stats::SyncStats;
use crate::sync::table::SyncContextTable;
use crate::sync::watchdog::{SyncObservation, SyncStatus};

/// Read-only view of a live context, for observers and tests.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub sync_id: SyncId,
    pub pid: PartitionId,
    pub mode: SyncMode,
    pub role: SyncRole,
    pub state: SyncState,
    pub ssn: SequentialNumber,
    pub pt_rev: PartitionRevision,
    pub pending_acks: u32,
    pub processed_chunk_num: u32,
    pub processed_log_num: u64,
    pub processed_log_bytes: u64,
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
}

impl ContextInfo {
    fn of(context: &SyncContext) -> Self {
        Self {
            sync_id: context.sync_id(),
            pid: context.partition_id(),
            mode: context.mode(),
            role: context.role(),
            state: context.state(),
            ssn: context.sequential_number(),
            pt_rev: context.partition_revision(),
            pending_acks: context.pending_acks(),
            processed_chunk_num: context.processed_chunk_num(),
            processed_log_num: context.processed_log_num(),
            processed_log_bytes: context.processed_log_bytes(),
            start_lsn: context.start_lsn(),
            end_lsn: context.end_lsn(),
        }
    }
}

pub struct SyncManager {
    node_id: NodeId,
    partition_num: u32,
    config: SyncConfig,
    extra_config: SyncExtraConfig,
    partition_table: Arc<PartitionTable>,
    collaborators: Collaborators,
    tables: Vec<Mutex<SyncContextTable>>,
    stats: Arc<SyncStats>,
    allocator: Arc<SyncAllocator>,
    registry: RwLock<LongSyncRegistry>,
    next_ssn: AtomicI64,
    current_status: Mutex<SyncStatus>,
}

impl SyncManager {
    pub fn new(
        node_id: NodeId,
        partition_table: Arc<PartitionTable>,
        collaborators: Collaborators,
        registry: &ConfigRegistry,
    ) -> Self {
        let partition_num = partition_table.partition_num();
        let stats = Arc::new(SyncStats::new(partition_num));
        let allocator = Arc::new(SyncAllocator::new(stats.clone()));
        Self {
            node_id,
            partition_num,
            config: SyncConfig::new(registry),
            extra_config: SyncExtraConfig::new(registry),
            partition_table,
            collaborators,
            tables: (0..partition_num)
                .map(|pid| Mutex::new(SyncContextTable::new(pid)))
                .collect(),
            stats,
            allocator,
            registry: RwLock::new(LongSyncRegistry::new(partition_num)),
            next_ssn: AtomicI64::new(0),
            current_status: Mutex::new(SyncStatus::new()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn extra_config(&self) -> &SyncExtraConfig {
        &self.extra_config
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    pub fn partition_table(&self) -> &Arc<PartitionTable> {
        &self.partition_table
    }

    fn table(&self, pid: PartitionId) -> SyncResult<&Mutex<SyncContextTable>> {
        self.tables
            .get(pid as usize)
            .ok_or(SyncError::InvalidPartition(pid))
    }

    fn next_ssn(&self) -> SequentialNumber {
        self.next_ssn.fetch_add(1, Ordering::Relaxed)
    }

    // --- facade operations ---

    /// Allocate a context for a new sync episode. Long-term episodes are
    /// registered as their partition's unique in-flight sync.
    pub fn create_sync_context(
        &self,
        pid: PartitionId,
        pt_rev: PartitionRevision,
        mode: SyncMode,
        role: SyncRole,
    ) -> SyncResult<SyncId> {
        let legal = matches!(
            (mode, role),
            (SyncMode::ShortTerm, SyncRole::Owner)
                | (SyncMode::ShortTerm, SyncRole::Backup)
                | (SyncMode::LongTerm, SyncRole::Owner)
                | (SyncMode::LongTerm, SyncRole::Catchup)
        );
        if !legal {
            return Err(SyncError::IllegalOperation {
                op: "CREATE_SYNC_CONTEXT",
                role: role.label(),
                pid,
            });
        }

        let ssn = self.next_ssn();
        let sync_id = {
            let mut table = self.table(pid)?.lock().unwrap();
            table.create(pt_rev, mode, role, ssn)?.sync_id()
        };
        self.stats.on_context_created(pid);

        if mode == SyncMode::LongTerm {
            let side = match role {
                SyncRole::Owner => LongSyncSide::Owner,
                _ => LongSyncSide::Catchup,
            };
            let entry = LongSyncEntry {
                sync_id,
                pt_rev,
                ssn,
            };
            let registered = {
                let mut registry = self.registry.write().unwrap();
                registry.register(pid, side, entry)
            };
            if let Err(err) = registered {
                let mut table = self.table(pid)?.lock().unwrap();
                if table.remove(sync_id.context_id, &self.allocator) {
                    drop(table);
                    self.stats.on_context_removed(pid);
                }
                return Err(err);
            }
        }

        debug!(
            "Created {} context {} for pId {} as {}",
            mode.label(),
            sync_id,
            pid,
            role.label()
        );
        Ok(sync_id)
    }

    /// Resolve a context; absent on stale version or removed slot.
    pub fn get_sync_context(
        &self,
        pid: PartitionId,
        sync_id: SyncId,
    ) -> SyncResult<Option<ContextInfo>> {
        let table = self.table(pid)?.lock().unwrap();
        Ok(table
            .get(sync_id.context_id, sync_id.context_version)
            .map(ContextInfo::of))
    }

    /// Remove a context, freeing its buffers and deregistering any
    /// long-term entry. A failed removal notifies the cluster and cascades
    /// a drop to the peers of the episode. Idempotent.
    pub fn remove_sync_context(
        &self,
        pid: PartitionId,
        sync_id: SyncId,
        failed: bool,
    ) -> SyncResult<bool> {
        struct Removed {
            mode: SyncMode,
            role: SyncRole,
            pt_rev: PartitionRevision,
            ssn: SequentialNumber,
            peers: Vec<(NodeId, SyncId)>,
        }

        let removed = {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) = table.get(sync_id.context_id, sync_id.context_version) else {
                return Ok(false);
            };
            let mut peers: Vec<(NodeId, SyncId)> = context
                .send_backups()
                .iter()
                .map(|b| (b.node_id, b.backup_sync_id))
                .collect();
            if let Some(recv) = context.recv_node_id() {
                peers.push((recv, SyncId::UNDEF));
            }
            let removed = Removed {
                mode: context.mode(),
                role: context.role(),
                pt_rev: context.partition_revision(),
                ssn: context.sequential_number(),
                peers,
            };
            table.remove(sync_id.context_id, &self.allocator);
            removed
        };
        self.stats.on_context_removed(pid);

        if removed.mode == SyncMode::LongTerm {
            let side = match removed.role {
                SyncRole::Owner => LongSyncSide::Owner,
                _ => LongSyncSide::Catchup,
            };
            self.registry.write().unwrap().unregister(pid, side);
        }

        if failed {
            warn!(
                "Removed failed {} context {} for pId {} ({})",
                removed.mode.label(),
                sync_id,
                pid,
                removed.role.label()
            );
            self.collaborators.cluster.on_sync_failed(pid, removed.pt_rev);
            for (peer, peer_sync_id) in removed.peers {
                self.collaborators.transport.post(
                    SyncEvent {
                        op: SyncOperationType::DropPartition,
                        pid,
                        source: self.node_id,
                        target: peer,
                        sync_id: peer_sync_id,
                        sender_sync_id: sync_id,
                        pt_rev: removed.pt_rev,
                        stmt_id: 0,
                        ssn: removed.ssn,
                        payload: SyncPayload::None,
                    },
                    Duration::ZERO,
                );
            }
        } else {
            debug!("Removed context {} for pId {}", sync_id, pid);
        }
        Ok(true)
    }

    /// Cancel every context of a partition without emitting replies.
    pub fn sync_timeout(&self, pid: PartitionId) -> SyncResult<()> {
        let removed = {
            let mut table = self.table(pid)?.lock().unwrap();
            table.remove_all(&self.allocator)
        };
        for _ in 0..removed {
            self.stats.on_context_removed(pid);
        }
        let mut registry = self.registry.write().unwrap();
        registry.unregister(pid, LongSyncSide::Owner);
        registry.unregister(pid, LongSyncSide::Catchup);
        drop(registry);
        if removed > 0 {
            warn!("Sync timeout cancelled {} context(s) for pId {}", removed, pid);
        }
        Ok(())
    }

    /// Drop every context and slot of a partition. Future messages
    /// addressed to any of its former SyncIds fail to resolve and are
    /// silently discarded. Idempotent.
    pub fn remove_partition(&self, pid: PartitionId) -> SyncResult<()> {
        let removed = {
            let mut table = self.table(pid)?.lock().unwrap();
            table.drop_all(&self.allocator)
        };
        for _ in 0..removed {
            self.stats.on_context_removed(pid);
        }
        let mut registry = self.registry.write().unwrap();
        registry.unregister(pid, LongSyncSide::Owner);
        registry.unregister(pid, LongSyncSide::Catchup);
        drop(registry);
        debug!("Dropped partition {} ({} context(s))", pid, removed);
        Ok(())
    }

    /// Live contexts across all partitions.
    pub fn context_count(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| t.lock().unwrap().used_num() as u64)
            .sum()
    }

    pub fn dump(&self, pid: PartitionId) -> SyncResult<String> {
        let table = self.table(pid)?.lock().unwrap();
        let contexts: Vec<String> = table
            .live_sync_ids()
            .iter()
            .filter_map(|id| table.get(id.context_id, id.context_version))
            .map(|c| c.dump())
            .collect();
        Ok(format!("pId:{} contexts:[{}]", pid, contexts.join(", ")))
    }

    pub fn dump_all(&self) -> String {
        (0..self.partition_num)
            .filter_map(|pid| self.dump(pid).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    // --- long-term sync registry access ---

    pub fn set_current_sync_id(&self, pid: PartitionId, side: LongSyncSide) -> SyncResult<()> {
        self.registry.write().unwrap().set_current(pid, side)
    }

    pub fn get_current_sync_id(
        &self,
        side: LongSyncSide,
    ) -> Option<(PartitionId, SyncId, PartitionRevision)> {
        self.registry
            .read()
            .unwrap()
            .current(side)
            .map(|(pid, entry)| (pid, entry.sync_id, entry.pt_rev))
    }

    // --- operation gate ---

    /// Reject operations whose partition role does not permit them.
    pub fn check_executable(
        &self,
        op: SyncOperationType,
        pid: PartitionId,
        role: SyncRole,
    ) -> SyncResult<()> {
        if pid >= self.partition_num {
            return Err(SyncError::InvalidPartition(pid));
        }
        use SyncOperationType::*;
        let allowed = match op {
            ShorttermSyncRequest | LongtermSyncRequest => role == SyncRole::Owner,
            ShorttermSyncStart | ShorttermSyncLog | ShorttermSyncEnd => role == SyncRole::Backup,
            ShorttermSyncStartAck | ShorttermSyncLogAck | ShorttermSyncEndAck => {
                role == SyncRole::Owner
            }
            LongtermSyncStart | LongtermSyncChunk | LongtermSyncLog => role == SyncRole::Catchup,
            LongtermSyncStartAck | LongtermSyncPrepareAck | LongtermSyncChunkAck
            | LongtermSyncLogAck => role == SyncRole::Owner,
            SyncTimeout | DropPartition => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(SyncError::IllegalOperation {
                op: op.name(),
                role: role.label(),
                pid,
            })
        }
    }

    // --- inbound edge ---

    /// Validate and apply one inbound operation, posting any outbound
    /// operations it produces.
    pub fn dispatch(&self, event: SyncEvent) -> SyncResult<()> {
        let role = self.partition_table.role(event.pid)?;
        self.check_executable(event.op, event.pid, role)?;
        trace!("Dispatch {} for pId {} from node {}", event.op.name(), event.pid, event.source);

        use SyncOperationType::*;
        match event.op {
            ShorttermSyncRequest => self.handle_shortterm_request(event),
            ShorttermSyncStart => self.handle_shortterm_start(event),
            ShorttermSyncStartAck => self.handle_shortterm_start_ack(event),
            ShorttermSyncLog => self.handle_shortterm_log(event),
            ShorttermSyncLogAck => self.handle_shortterm_log_ack(event),
            ShorttermSyncEnd => self.handle_shortterm_end(event),
            ShorttermSyncEndAck => self.handle_shortterm_end_ack(event),
            LongtermSyncRequest => self.handle_longterm_request(event),
            LongtermSyncStart => self.handle_longterm_start(event),
            LongtermSyncStartAck => self.handle_longterm_start_ack(event),
            LongtermSyncPrepareAck => self.handle_longterm_prepare_ack(event),
            LongtermSyncChunk => self.handle_longterm_chunk(event),
            LongtermSyncChunkAck => self.handle_longterm_chunk_ack(event),
            LongtermSyncLog => self.handle_longterm_log(event),
            LongtermSyncLogAck => self.handle_longterm_log_ack(event),
            SyncTimeout => self.sync_timeout(event.pid),
            DropPartition => self.remove_partition(event.pid),
        }
    }

    /// Checkpoint service callback: the snapshot for the partition's
    /// owner-side long-term sync is ready, start streaming chunks.
    pub fn set_sync_checkpoint_completed(&self, pid: PartitionId) -> SyncResult<()> {
        let Some(entry) = self
            .registry
            .read()
            .unwrap()
            .entry(pid, LongSyncSide::Owner)
        else {
            trace!("Checkpoint completion for pId {} without a long-term sync", pid);
            return Ok(());
        };

        let mut posts = Vec::new();
        let finished = {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(entry.sync_id.context_id, entry.sync_id.context_version)
            else {
                return Ok(());
            };
            context.set_checkpoint_completed();
            context.set_state(SyncState::ChunkStreaming);
            self.stream_longterm_chunks(context, &mut posts)?
        };
        self.post_all(posts);
        if finished {
            self.finish_longterm(pid, entry.sync_id)?;
        }
        Ok(())
    }

    /// Transport callback: a peer died. Treat as a failed ack and remove
    /// the episodes that were waiting on it.
    pub fn on_peer_failure(&self, pid: PartitionId, node_id: NodeId) -> SyncResult<()> {
        let affected: Vec<SyncId> = {
            let table = self.table(pid)?.lock().unwrap();
            table
                .live_sync_ids()
                .into_iter()
                .filter(|id| {
                    table
                        .get(id.context_id, id.context_version)
                        .map(|c| {
                            c.recv_node_id() == Some(node_id)
                                || c.send_backups().iter().any(|b| b.node_id == node_id)
                        })
                        .unwrap_or(false)
                })
                .collect()
        };
        for sync_id in affected {
            warn!(
                "Peer {} failed; removing context {} for pId {}",
                node_id, sync_id, pid
            );
            self.remove_sync_context(pid, sync_id, true)?;
        }
        Ok(())
    }

    // --- watchdog ---

    /// One watchdog poll over the owner-side focus long-term sync.
    /// Returns the partition to abort once the episode has made no
    /// progress for `DEFAULT_DETECT_SYNC_ERROR_COUNT` consecutive polls.
    pub fn check_current_sync_status(&self) -> Option<PartitionId> {
        let current = self.registry.read().unwrap().current(LongSyncSide::Owner);
        let Some((pid, entry)) = current else {
            self.current_status.lock().unwrap().clear();
            return None;
        };
        let Ok(Some(info)) = self.get_sync_context(pid, entry.sync_id) else {
            self.current_status.lock().unwrap().clear();
            return None;
        };

        let observed = SyncObservation {
            pid,
            ssn: info.ssn,
            chunk_num: info.processed_chunk_num,
            start_lsn: info.start_lsn,
            end_lsn: info.end_lsn,
        };
        let errors = self
            .current_status
            .lock()
            .unwrap()
            .check_and_update(&observed);
        if errors >= DEFAULT_DETECT_SYNC_ERROR_COUNT {
            warn!(
                "Long-term sync for pId {} made no progress over {} polls",
                pid, errors
            );
            Some(pid)
        } else {
            None
        }
    }

    // --- emission pacing ---

    fn log_delay(&self, mode: SyncMode) -> Duration {
        let queued = self.collaborators.transport.queue_size(mode);
        let high_load = queued > self.extra_config.limit_queue_size(mode);
        self.extra_config.log_wait_interval(mode, high_load)
    }

    fn chunk_delay(&self) -> Duration {
        let queued = self.collaborators.transport.queue_size(SyncMode::LongTerm);
        let high_load = queued > self.extra_config.limit_queue_size(SyncMode::LongTerm);
        self.extra_config.chunk_wait_interval(high_load)
    }

    fn post_all(&self, posts: Vec<(SyncEvent, Duration)>) {
        for (event, delay) in posts {
            self.collaborators.transport.post(event, delay);
        }
    }

    // --- short-term sync, owner side ---

    fn handle_shortterm_request(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let backups = match &event.payload {
            SyncPayload::Request { nodes } if !nodes.is_empty() => nodes.clone(),
            _ => self.partition_table.peers(pid),
        };
        if backups.is_empty() {
            return Err(SyncError::Internal(format!(
                "short-term sync request for pId {} with no backups",
                pid
            )));
        }

        let sync_id =
            self.create_sync_context(pid, event.pt_rev, SyncMode::ShortTerm, SyncRole::Owner)?;
        let owner_lsn = self.partition_table.lsn(pid);

        let mut posts = Vec::new();
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let context = table
                .get_mut(sync_id.context_id, sync_id.context_version)
                .ok_or_else(|| SyncError::Internal("fresh context vanished".to_string()))?;
            for node in &backups {
                context.add_send_backup(*node);
            }
            context.reset_counter();
            context.set_state(SyncState::Requested);
            let stmt_id = context.create_statement_id();
            let ssn = context.sequential_number();
            for node in &backups {
                posts.push((
                    SyncEvent {
                        op: SyncOperationType::ShorttermSyncStart,
                        pid,
                        source: self.node_id,
                        target: *node,
                        sync_id: SyncId::UNDEF,
                        sender_sync_id: sync_id,
                        pt_rev: event.pt_rev,
                        stmt_id,
                        ssn,
                        payload: SyncPayload::Start { owner_lsn },
                    },
                    Duration::ZERO,
                ));
            }
        }
        info!(
            "Short-term sync for pId {} started toward {} backup(s)",
            pid,
            backups.len()
        );
        self.post_all(posts);
        Ok(())
    }

    fn handle_shortterm_start_ack(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let mut posts = Vec::new();
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale start ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                trace!("Stale statement {} on start ack for pId {}", event.stmt_id, pid);
                return Ok(());
            }
            let SyncPayload::Ack { lsn } = event.payload else {
                return Err(SyncError::Internal("start ack without ack payload".to_string()));
            };
            context.set_sync_target_lsn_with_sync_id(event.source, lsn, event.sender_sync_id);
            if context.decrement_counter(event.source) {
                context.set_sync_start_completed(true);
                context.set_state(SyncState::Started);
                self.stream_shortterm_log(context, &mut posts)?;
            }
        }
        self.post_all(posts);
        Ok(())
    }

    /// Emit the next log slice to every backup still behind the owner
    /// tail, or the end-of-sync barrier once all have caught up.
    fn stream_shortterm_log(
        &self,
        context: &mut SyncContext,
        posts: &mut Vec<(SyncEvent, Duration)>,
    ) -> SyncResult<()> {
        let pid = context.partition_id();
        let owner_lsn = self.partition_table.lsn(pid);
        let behind: Vec<NodeId> = context
            .send_backups()
            .iter()
            .filter(|b| b.lsn == UNDEF_LSN || b.lsn < owner_lsn)
            .map(|b| b.node_id)
            .collect();

        if behind.is_empty() {
            context.reset_counter();
            let stmt_id = context.create_statement_id();
            for backup in context.send_backups().to_vec() {
                posts.push((
                    SyncEvent {
                        op: SyncOperationType::ShorttermSyncEnd,
                        pid,
                        source: self.node_id,
                        target: backup.node_id,
                        sync_id: backup.backup_sync_id,
                        sender_sync_id: context.sync_id(),
                        pt_rev: context.partition_revision(),
                        stmt_id,
                        ssn: context.sequential_number(),
                        payload: SyncPayload::None,
                    },
                    Duration::ZERO,
                ));
            }
            return Ok(());
        }

        let from_lsn = context
            .send_backups()
            .iter()
            .filter(|b| behind.contains(&b.node_id) && b.lsn != UNDEF_LSN)
            .map(|b| b.lsn)
            .min()
            .unwrap_or(0);
        let slice = self.collaborators.log_reader.read_log(
            pid,
            from_lsn,
            self.config.max_message_size(SyncMode::ShortTerm),
        )?;
        context.copy_log_buffer(&self.allocator, &slice.data)?;
        context.arm_barrier(&behind);
        context.set_state(SyncState::LogStreaming);
        context.start_batch_timer();
        let stmt_id = context.create_statement_id();
        let delay = self.log_delay(SyncMode::ShortTerm);

        for backup in context.send_backups().to_vec() {
            if !behind.contains(&backup.node_id) {
                continue;
            }
            posts.push((
                SyncEvent {
                    op: SyncOperationType::ShorttermSyncLog,
                    pid,
                    source: self.node_id,
                    target: backup.node_id,
                    sync_id: backup.backup_sync_id,
                    sender_sync_id: context.sync_id(),
                    pt_rev: context.partition_revision(),
                    stmt_id,
                    ssn: context.sequential_number(),
                    payload: SyncPayload::Log {
                        start_lsn: slice.start_lsn,
                        end_lsn: slice.end_lsn,
                        data: slice.data.clone(),
                    },
                },
                delay,
            ));
        }
        Ok(())
    }

    fn handle_shortterm_log_ack(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let mut posts = Vec::new();
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale log ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                trace!("Stale statement {} on log ack for pId {}", event.stmt_id, pid);
                return Ok(());
            }
            let SyncPayload::Ack { lsn } = event.payload else {
                return Err(SyncError::Internal("log ack without ack payload".to_string()));
            };
            context.set_sync_target_lsn(event.source, lsn);
            if context.decrement_counter(event.source) {
                if let Some(started) = context.take_batch_timer() {
                    context.record_log_time(started);
                }
                let size = context.log_buffer_size() as u64;
                context.inc_processed_log(size);
                self.stream_shortterm_log(context, &mut posts)?;
            }
        }
        self.post_all(posts);
        Ok(())
    }

    fn handle_shortterm_end_ack(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let mut done = false;
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale end ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                return Ok(());
            }
            if context.decrement_counter(event.source) {
                context.set_state(SyncState::Ended);
                context.end_all();
                done = true;
            }
        }
        if done {
            let pt_rev = self.partition_table.revision(pid);
            self.remove_sync_context(pid, event.sync_id, false)?;
            self.collaborators.cluster.on_shortterm_completed(pid, pt_rev);
            info!("Short-term sync for pId {} completed", pid);
        }
        Ok(())
    }

    // --- short-term sync, backup side ---

    fn handle_shortterm_start(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let sync_id =
            self.create_sync_context(pid, event.pt_rev, SyncMode::ShortTerm, SyncRole::Backup)?;
        let own_lsn = self.partition_table.lsn(pid);
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let context = table
                .get_mut(sync_id.context_id, sync_id.context_version)
                .ok_or_else(|| SyncError::Internal("fresh context vanished".to_string()))?;
            context.set_recv_node_id(event.source);
            context.set_state(SyncState::Started);
        }
        self.collaborators.transport.post(
            SyncEvent {
                op: SyncOperationType::ShorttermSyncStartAck,
                pid,
                source: self.node_id,
                target: event.source,
                sync_id: event.sender_sync_id,
                sender_sync_id: sync_id,
                pt_rev: event.pt_rev,
                stmt_id: event.stmt_id,
                ssn: event.ssn,
                payload: SyncPayload::Ack { lsn: own_lsn },
            },
            Duration::ZERO,
        );
        Ok(())
    }

    fn handle_shortterm_log(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let SyncPayload::Log {
            start_lsn,
            end_lsn,
            data,
        } = event.payload
        else {
            return Err(SyncError::Internal("log without log payload".to_string()));
        };

        let resolved = {
            let mut table = self.table(pid)?.lock().unwrap();
            match table.get_mut(event.sync_id.context_id, event.sync_id.context_version) {
                Some(context) => {
                    context.set_state(SyncState::LogStreaming);
                    context.set_processed_lsn(start_lsn, end_lsn);
                    context.inc_processed_log(data.len() as u64);
                    true
                }
                None => false,
            }
        };
        if !resolved {
            trace!("Stale log for pId {}: {}", pid, event.sync_id);
            return Ok(());
        }

        let applied = self.collaborators.redo.apply_log(pid, &data, end_lsn)?;
        self.partition_table.set_lsn(pid, applied);
        self.collaborators.transport.post(
            SyncEvent {
                op: SyncOperationType::ShorttermSyncLogAck,
                pid,
                source: self.node_id,
                target: event.source,
                sync_id: event.sender_sync_id,
                sender_sync_id: event.sync_id,
                pt_rev: event.pt_rev,
                stmt_id: event.stmt_id,
                ssn: event.ssn,
                payload: SyncPayload::Ack { lsn: applied },
            },
            Duration::ZERO,
        );
        Ok(())
    }

    fn handle_shortterm_end(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let resolved = {
            let table = self.table(pid)?.lock().unwrap();
            table
                .get(event.sync_id.context_id, event.sync_id.context_version)
                .is_some()
        };
        if !resolved {
            trace!("Stale end for pId {}: {}", pid, event.sync_id);
            return Ok(());
        }

        self.collaborators.transport.post(
            SyncEvent {
                op: SyncOperationType::ShorttermSyncEndAck,
                pid,
                source: self.node_id,
                target: event.source,
                sync_id: event.sender_sync_id,
                sender_sync_id: event.sync_id,
                pt_rev: event.pt_rev,
                stmt_id: event.stmt_id,
                ssn: event.ssn,
                payload: SyncPayload::Ack {
                    lsn: self.partition_table.lsn(pid),
                },
            },
            Duration::ZERO,
        );
        self.remove_sync_context(pid, event.sync_id, false)?;
        // The backup is now in lockstep with the owner; membership flips
        // it to an active backup on this notification.
        self.collaborators
            .cluster
            .on_shortterm_completed(pid, event.pt_rev);
        Ok(())
    }

    // --- long-term sync, owner side ---

    fn handle_longterm_request(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let catchup = match &event.payload {
            SyncPayload::Request { nodes } if !nodes.is_empty() => nodes[0],
            _ => *self
                .partition_table
                .peers(pid)
                .first()
                .ok_or_else(|| {
                    SyncError::Internal(format!(
                        "long-term sync request for pId {} with no catchup node",
                        pid
                    ))
                })?,
        };

        let sync_id =
            self.create_sync_context(pid, event.pt_rev, SyncMode::LongTerm, SyncRole::Owner)?;
        let owner_lsn = self.partition_table.lsn(pid);
        let mut posts = Vec::new();
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let context = table
                .get_mut(sync_id.context_id, sync_id.context_version)
                .ok_or_else(|| SyncError::Internal("fresh context vanished".to_string()))?;
            context.add_send_backup(catchup);
            context.reset_counter();
            let stmt_id = context.create_statement_id();
            posts.push((
                SyncEvent {
                    op: SyncOperationType::LongtermSyncStart,
                    pid,
                    source: self.node_id,
                    target: catchup,
                    sync_id: SyncId::UNDEF,
                    sender_sync_id: sync_id,
                    pt_rev: event.pt_rev,
                    stmt_id,
                    ssn: context.sequential_number(),
                    payload: SyncPayload::Start { owner_lsn },
                },
                Duration::ZERO,
            ));
        }
        info!(
            "Long-term sync for pId {} started toward catchup node {}",
            pid, catchup
        );
        self.post_all(posts);
        Ok(())
    }

    fn handle_longterm_start_ack(&self, event: SyncEvent) -> SyncResult<()> {
        // Near-caught-up short circuit: the catchup is within the
        // approximate gap, skip checkpoint and chunks entirely.
        let pid = event.pid;
        let mut posts = Vec::new();
        let finished = {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale start ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                return Ok(());
            }
            let SyncPayload::Ack { lsn } = event.payload else {
                return Err(SyncError::Internal("start ack without ack payload".to_string()));
            };
            context.set_sync_target_lsn_with_sync_id(event.source, lsn, event.sender_sync_id);
            if !context.decrement_counter(event.source) {
                return Ok(());
            }
            context.set_sync_start_completed(true);
            context.set_state(SyncState::LogCatchup);
            self.stream_longterm_log(context, &mut posts)?
        };
        self.post_all(posts);
        if finished {
            self.finish_longterm(pid, event.sync_id)?;
        }
        Ok(())
    }

    fn handle_longterm_prepare_ack(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let ssn = {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale prepare ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                return Ok(());
            }
            let SyncPayload::Ack { lsn } = event.payload else {
                return Err(SyncError::Internal(
                    "prepare ack without ack payload".to_string(),
                ));
            };
            context.set_sync_target_lsn_with_sync_id(event.source, lsn, event.sender_sync_id);
            if !context.decrement_counter(event.source) {
                return Ok(());
            }
            context.set_sync_start_completed(true);
            context.set_checkpoint_pending(true);
            context.set_state(SyncState::Prepared);
            context.sequential_number()
        };
        self.collaborators.checkpoint.request_checkpoint(pid, ssn);
        Ok(())
    }

    /// Emit the next chunk batch toward the catchup, or transition to log
    /// catch-up when the snapshot has been fully streamed. Returns true
    /// when the whole episode just finished.
    fn stream_longterm_chunks(
        &self,
        context: &mut SyncContext,
        posts: &mut Vec<(SyncEvent, Duration)>,
    ) -> SyncResult<bool> {
        let pid = context.partition_id();
        let total = self.collaborators.chunk_provider.total_chunks(pid);
        let processed = context.processed_chunk_num();

        if processed >= total {
            context.end_chunk_all();
            context.set_state(SyncState::LogCatchup);
            return self.stream_longterm_log(context, posts);
        }

        let batch = self.collaborators.chunk_provider.read_chunks(
            pid,
            processed,
            self.config.send_chunk_num(),
        )?;
        context.copy_chunk_buffer(&self.allocator, &batch.data, batch.base_size, batch.count)?;
        context.reset_counter();
        context.start_batch_timer();
        let stmt_id = context.create_statement_id();

        let dump_interval = self.extra_config.longterm_dump_chunk_interval();
        if dump_interval > 0 && processed / dump_interval != (processed + batch.count) / dump_interval
        {
            info!(
                "Long-term sync for pId {}: {}/{} chunks streamed",
                pid,
                processed + batch.count,
                total
            );
        }

        let target = context
            .send_backups()
            .first()
            .map(|b| (b.node_id, b.backup_sync_id))
            .ok_or_else(|| SyncError::Internal("long-term owner without catchup".to_string()))?;
        posts.push((
            SyncEvent {
                op: SyncOperationType::LongtermSyncChunk,
                pid,
                source: self.node_id,
                target: target.0,
                sync_id: target.1,
                sender_sync_id: context.sync_id(),
                pt_rev: context.partition_revision(),
                stmt_id,
                ssn: context.sequential_number(),
                payload: SyncPayload::Chunk {
                    chunk_no: processed,
                    count: batch.count,
                    total,
                    base_size: batch.base_size as u32,
                    data: batch.data,
                },
            },
            self.chunk_delay(),
        ));
        Ok(false)
    }

    fn handle_longterm_chunk_ack(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let mut posts = Vec::new();
        let finished = {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale chunk ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                trace!("Stale statement {} on chunk ack for pId {}", event.stmt_id, pid);
                return Ok(());
            }
            if !context.decrement_counter(event.source) {
                return Ok(());
            }
            if let Some(started) = context.take_batch_timer() {
                context.record_chunk_time(started);
            }
            let (count, _) = context.chunk_info();
            context.inc_processed_chunk_num(count);
            if let SyncPayload::Ack { lsn } = event.payload {
                context.set_sync_target_lsn(event.source, lsn);
            }
            self.stream_longterm_chunks(context, &mut posts)?
        };
        self.post_all(posts);
        if finished {
            self.finish_longterm(pid, event.sync_id)?;
        }
        Ok(())
    }

    /// Emit the next long-term log slice, dwelling once the catchup is
    /// within the approximate gap. Returns true when the catchup has fully
    /// caught up and the episode is complete.
    fn stream_longterm_log(
        &self,
        context: &mut SyncContext,
        posts: &mut Vec<(SyncEvent, Duration)>,
    ) -> SyncResult<bool> {
        let pid = context.partition_id();
        let owner_lsn = self.partition_table.lsn(pid);
        let target = context
            .send_backups()
            .first()
            .map(|b| (b.node_id, b.backup_sync_id, b.lsn))
            .ok_or_else(|| SyncError::Internal("long-term owner without catchup".to_string()))?;
        let catchup_lsn = if target.2 == UNDEF_LSN { 0 } else { target.2 };

        if catchup_lsn >= owner_lsn {
            context.set_state(SyncState::Done);
            context.end_all();
            return Ok(true);
        }

        let slice = self.collaborators.log_reader.read_log(
            pid,
            catchup_lsn,
            self.config.max_message_size(SyncMode::LongTerm),
        )?;
        context.copy_log_buffer(&self.allocator, &slice.data)?;
        context.arm_barrier(&[target.0]);
        context.set_processed_lsn(slice.start_lsn, slice.end_lsn);
        context.start_batch_timer();
        let stmt_id = context.create_statement_id();

        let mut delay = self.log_delay(SyncMode::LongTerm);
        if owner_lsn - catchup_lsn <= self.extra_config.approximate_gap_lsn() {
            delay = delay.max(self.extra_config.approximate_wait_interval());
        }

        posts.push((
            SyncEvent {
                op: SyncOperationType::LongtermSyncLog,
                pid,
                source: self.node_id,
                target: target.0,
                sync_id: target.1,
                sender_sync_id: context.sync_id(),
                pt_rev: context.partition_revision(),
                stmt_id,
                ssn: context.sequential_number(),
                payload: SyncPayload::Log {
                    start_lsn: slice.start_lsn,
                    end_lsn: slice.end_lsn,
                    data: slice.data,
                },
            },
            delay,
        ));
        Ok(false)
    }

    fn handle_longterm_log_ack(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let mut posts = Vec::new();
        let finished = {
            let mut table = self.table(pid)?.lock().unwrap();
            let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            else {
                trace!("Stale log ack for pId {}: {}", pid, event.sync_id);
                return Ok(());
            };
            if !context.expects_statement(event.stmt_id) {
                return Ok(());
            }
            let SyncPayload::Ack { lsn } = event.payload else {
                return Err(SyncError::Internal("log ack without ack payload".to_string()));
            };
            context.set_sync_target_lsn(event.source, lsn);
            if !context.decrement_counter(event.source) {
                return Ok(());
            }
            if let Some(started) = context.take_batch_timer() {
                context.record_log_time(started);
            }
            let size = context.log_buffer_size() as u64;
            context.inc_processed_log(size);
            self.stream_longterm_log(context, &mut posts)?
        };
        self.post_all(posts);
        if finished {
            self.finish_longterm(pid, event.sync_id)?;
        }
        Ok(())
    }

    fn finish_longterm(&self, pid: PartitionId, sync_id: SyncId) -> SyncResult<()> {
        let pt_rev = self.partition_table.revision(pid);
        self.remove_sync_context(pid, sync_id, false)?;
        self.collaborators.cluster.on_longterm_completed(pid, pt_rev);
        info!("Long-term sync for pId {} completed", pid);
        Ok(())
    }

    // --- long-term sync, catchup side ---

    fn handle_longterm_start(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let SyncPayload::Start { owner_lsn } = event.payload else {
            return Err(SyncError::Internal("start without start payload".to_string()));
        };
        let sync_id =
            self.create_sync_context(pid, event.pt_rev, SyncMode::LongTerm, SyncRole::Catchup)?;
        let own_lsn = self.partition_table.lsn(pid);
        {
            let mut table = self.table(pid)?.lock().unwrap();
            let context = table
                .get_mut(sync_id.context_id, sync_id.context_version)
                .ok_or_else(|| SyncError::Internal("fresh context vanished".to_string()))?;
            context.set_recv_node_id(event.source);
            context.set_state(SyncState::Prepared);
        }

        // Within the approximate gap the snapshot path is skipped and the
        // owner goes straight to log catch-up.
        let near = owner_lsn.saturating_sub(own_lsn) <= self.extra_config.approximate_gap_lsn();
        let op = if near {
            SyncOperationType::LongtermSyncStartAck
        } else {
            SyncOperationType::LongtermSyncPrepareAck
        };
        self.collaborators.transport.post(
            SyncEvent {
                op,
                pid,
                source: self.node_id,
                target: event.source,
                sync_id: event.sender_sync_id,
                sender_sync_id: sync_id,
                pt_rev: event.pt_rev,
                stmt_id: event.stmt_id,
                ssn: event.ssn,
                payload: SyncPayload::Ack { lsn: own_lsn },
            },
            Duration::ZERO,
        );
        Ok(())
    }

    fn handle_longterm_chunk(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let SyncPayload::Chunk {
            count,
            total,
            base_size,
            data,
            ..
        } = event.payload
        else {
            return Err(SyncError::Internal("chunk without chunk payload".to_string()));
        };

        let resolved = {
            let table = self.table(pid)?.lock().unwrap();
            table
                .get(event.sync_id.context_id, event.sync_id.context_version)
                .is_some()
        };
        if !resolved {
            trace!("Stale chunk for pId {}: {}", pid, event.sync_id);
            return Ok(());
        }

        let restored_lsn =
            self.collaborators
                .redo
                .install_chunks(pid, base_size as usize, count, &data)?;
        self.partition_table.set_lsn(pid, restored_lsn);
        {
            let mut table = self.table(pid)?.lock().unwrap();
            if let Some(context) =
                table.get_mut(event.sync_id.context_id, event.sync_id.context_version)
            {
                context.set_state(SyncState::ChunkStreaming);
                let before = context.processed_chunk_num();
                context.inc_processed_chunk_num(count);
                let dump_interval = self.extra_config.longterm_dump_chunk_interval();
                if dump_interval > 0
                    && before / dump_interval != context.processed_chunk_num() / dump_interval
                {
                    info!(
                        "Catchup for pId {}: {}/{} chunks installed",
                        pid,
                        context.processed_chunk_num(),
                        total
                    );
                }
            }
        }

        self.collaborators.transport.post(
            SyncEvent {
                op: SyncOperationType::LongtermSyncChunkAck,
                pid,
                source: self.node_id,
                target: event.source,
                sync_id: event.sender_sync_id,
                sender_sync_id: event.sync_id,
                pt_rev: event.pt_rev,
                stmt_id: event.stmt_id,
                ssn: event.ssn,
                payload: SyncPayload::Ack { lsn: restored_lsn },
            },
            Duration::ZERO,
        );
        Ok(())
    }

    fn handle_longterm_log(&self, event: SyncEvent) -> SyncResult<()> {
        let pid = event.pid;
        let SyncPayload::Log {
            start_lsn,
            end_lsn,
            data,
        } = event.payload
        else {
            return Err(SyncError::Internal("log without log payload".to_string()));
        };

        let resolved = {
            let mut table = self.table(pid)?.lock().unwrap();
            match table.get_mut(event.sync_id.context_id, event.sync_id.context_version) {
                Some(context) => {
                    context.set_state(SyncState::LogCatchup);
                    context.set_processed_lsn(start_lsn, end_lsn);
                    context.inc_processed_log(data.len() as u64);
                    true
                }
                None => false,
            }
        };
        if !resolved {
            trace!("Stale log for pId {}: {}", pid, event.sync_id);
            return Ok(());
        }

        let applied = self.collaborators.redo.apply_log(pid, &data, end_lsn)?;
        self.partition_table.set_lsn(pid, applied);
        self.collaborators.transport.post(
            SyncEvent {
                op: SyncOperationType::LongtermSyncLogAck,
                pid,
                source: self.node_id,
                target: event.source,
                sync_id: event.sender_sync_id,
                sender_sync_id: event.sync_id,
                pt_rev: event.pt_rev,
                stmt_id: event.stmt_id,
                ssn: event.ssn,
                payload: SyncPayload::Ack { lsn: applied },
            },
            Duration::ZERO,
        );
        Ok(())
    }
}
