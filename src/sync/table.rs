//! Per-partition context slot pool
//!
//! A slot arena with a generational index: contexts are addressed by
//! `(id, version)` and a lookup resolves only while the slot is live and
//! the stored version matches. Recycled slots bump their version so stale
//! `SyncId`s can never alias a newer episode, and a partition-wide version
//! floor keeps that guarantee across full slot deletion.

use tracing::trace;

use crate::error::{SyncError, SyncResult};
use crate::partition::{
    PartitionId, PartitionRevision, SequentialNumber, SyncId, SyncMode, SyncRole,
};
use crate::sync::allocator::SyncAllocator;
use crate::sync::context::SyncContext;

/// Slot vector growth unit.
const SLOT_BLOCK: usize = 128;

pub struct SyncContextTable {
    pid: PartitionId,
    slots: Vec<SyncContext>,
    free_head: Option<usize>,
    num_used: u32,
    /// Lowest version a newly created slot may carry. Raised when slots
    /// are deleted wholesale so previously issued ids never resolve again.
    version_floor: u64,
}

impl SyncContextTable {
    pub fn new(pid: PartitionId) -> Self {
        Self {
            pid,
            slots: Vec::new(),
            free_head: None,
            num_used: 0,
            version_floor: SyncId::INITIAL_CONTEXT_VERSION,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.pid
    }

    pub fn used_num(&self) -> u32 {
        self.num_used
    }

    /// Allocate a context for a new episode, recycling the free list when
    /// possible. Recycled slots come back with a bumped version.
    pub fn create(
        &mut self,
        pt_rev: PartitionRevision,
        mode: SyncMode,
        role: SyncRole,
        ssn: SequentialNumber,
    ) -> SyncResult<&mut SyncContext> {
        let idx = match self.free_head {
            Some(idx) => {
                self.free_head = self.slots[idx].next_free;
                let version = (self.slots[idx].version() + 1).max(self.version_floor);
                self.slots[idx].set_version(version);
                idx
            }
            None => {
                if self.slots.len() >= i32::MAX as usize {
                    return Err(SyncError::ContextLimit(format!(
                        "slot pool exhausted for partition {}",
                        self.pid
                    )));
                }
                if self.slots.len() == self.slots.capacity() {
                    self.slots.reserve(SLOT_BLOCK);
                }
                let mut context = SyncContext::new(self.slots.len() as i32);
                context.set_version(self.version_floor);
                self.slots.push(context);
                self.slots.len() - 1
            }
        };

        self.num_used += 1;
        let context = &mut self.slots[idx];
        context.activate(self.pid, pt_rev, mode, role, ssn);
        Ok(context)
    }

    /// Resolve `(id, version)` to a live context. Stale versions and dead
    /// slots resolve to nothing.
    pub fn get(&self, id: i32, version: u64) -> Option<&SyncContext> {
        let context = self.slots.get(usize::try_from(id).ok()?)?;
        (context.is_used() && context.version() == version).then_some(context)
    }

    pub fn get_mut(&mut self, id: i32, version: u64) -> Option<&mut SyncContext> {
        let context = self.slots.get_mut(usize::try_from(id).ok()?)?;
        (context.is_used() && context.version() == version).then_some(context)
    }

    /// Release a context: buffers are returned to the pool, the slot goes
    /// back on the free list. Idempotent on already-removed slots.
    pub fn remove(&mut self, id: i32, alloc: &SyncAllocator) -> bool {
        let Ok(idx) = usize::try_from(id) else {
            return false;
        };
        let Some(context) = self.slots.get_mut(idx) else {
            return false;
        };
        if !context.is_used() {
            trace!("Remove on already-removed context slot {} of pId {}", id, self.pid);
            return false;
        }
        context.clear(alloc);
        context.set_unused();
        context.next_free = self.free_head;
        self.free_head = Some(idx);
        self.num_used = self.num_used.saturating_sub(1);
        true
    }

    /// Identities of every live context.
    pub fn live_sync_ids(&self) -> Vec<SyncId> {
        self.slots
            .iter()
            .filter(|c| c.is_used())
            .map(|c| c.sync_id())
            .collect()
    }

    /// Remove every live context, keeping the slots for reuse. Returns the
    /// number removed.
    pub fn remove_all(&mut self, alloc: &SyncAllocator) -> u32 {
        let ids: Vec<i32> = self
            .slots
            .iter()
            .filter(|c| c.is_used())
            .map(|c| c.id())
            .collect();
        let mut removed = 0;
        for id in ids {
            if self.remove(id, alloc) {
                removed += 1;
            }
        }
        removed
    }

    /// Delete every slot outright (partition drop). Future lookups for any
    /// id ever issued fail, and recreated slots start above every version
    /// this table has handed out.
    pub fn drop_all(&mut self, alloc: &SyncAllocator) -> u32 {
        let removed = self.remove_all(alloc);
        let max_version = self.slots.iter().map(|c| c.version()).max().unwrap_or(0);
        self.version_floor = self.version_floor.max(max_version + 1);
        self.slots.clear();
        self.free_head = None;
        self.num_used = 0;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::stats::SyncStats;
    use std::sync::Arc;

    fn table() -> SyncContextTable {
        SyncContextTable::new(0)
    }

    fn pool() -> SyncAllocator {
        SyncAllocator::new(Arc::new(SyncStats::new(1)))
    }

    fn create(table: &mut SyncContextTable, ssn: SequentialNumber) -> SyncId {
        table
            .create(
                PartitionRevision(1),
                SyncMode::ShortTerm,
                SyncRole::Owner,
                ssn,
            )
            .unwrap()
            .sync_id()
    }

    #[test]
    fn test_live_lookup_resolves_identity() {
        let mut table = table();
        let id = create(&mut table, 1);
        let found = table.get(id.context_id, id.context_version).unwrap();
        assert_eq!(found.sync_id(), id);
        assert_eq!(table.used_num(), 1);
    }

    #[test]
    fn test_stale_version_never_resolves() {
        let alloc = pool();
        let mut table = table();
        let first = create(&mut table, 1);
        assert!(table.remove(first.context_id, &alloc));

        // Removed: the old identity is gone.
        assert!(table.get(first.context_id, first.context_version).is_none());

        // The slot is recycled with a bumped version.
        let second = create(&mut table, 2);
        assert_eq!(second.context_id, first.context_id);
        assert!(second.context_version > first.context_version);
        assert!(table.get(first.context_id, first.context_version).is_none());
        assert!(table.get(second.context_id, second.context_version).is_some());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let alloc = pool();
        let mut table = table();
        let id = create(&mut table, 1);
        assert!(table.remove(id.context_id, &alloc));
        assert!(!table.remove(id.context_id, &alloc));
        assert_eq!(table.used_num(), 0);
        // Out-of-range ids are rejected quietly.
        assert!(!table.remove(500, &alloc));
        assert!(!table.remove(-1, &alloc));
    }

    #[test]
    fn test_free_list_reuses_most_recent_slot() {
        let alloc = pool();
        let mut table = table();
        let a = create(&mut table, 1);
        let b = create(&mut table, 2);
        assert_ne!(a.context_id, b.context_id);

        table.remove(a.context_id, &alloc);
        table.remove(b.context_id, &alloc);
        // LIFO free list: b's slot comes back first.
        let c = create(&mut table, 3);
        assert_eq!(c.context_id, b.context_id);
        assert_eq!(table.used_num(), 1);
    }

    #[test]
    fn test_drop_all_raises_version_floor() {
        let alloc = pool();
        let mut table = table();
        let old = create(&mut table, 1);
        assert_eq!(table.drop_all(&alloc), 1);
        assert_eq!(table.used_num(), 0);
        assert!(table.get(old.context_id, old.context_version).is_none());

        // A recreated slot reuses index 0 but can never collide with the
        // identity issued before the drop.
        let fresh = create(&mut table, 2);
        assert_eq!(fresh.context_id, old.context_id);
        assert!(fresh.context_version > old.context_version);
    }

    #[test]
    fn test_remove_all_keeps_slots() {
        let alloc = pool();
        let mut table = table();
        for ssn in 0..5 {
            create(&mut table, ssn);
        }
        assert_eq!(table.used_num(), 5);
        assert_eq!(table.remove_all(&alloc), 5);
        assert_eq!(table.used_num(), 0);
        assert!(table.live_sync_ids().is_empty());
    }

    #[test]
    fn test_buffers_released_on_remove() {
        let alloc = pool();
        let mut table = table();
        let id = create(&mut table, 1);
        table
            .get_mut(id.context_id, id.context_version)
            .unwrap()
            .copy_log_buffer(&alloc, &[7u8; 4096])
            .unwrap();
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 4096);

        table.remove(id.context_id, &alloc);
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 0);
        assert_eq!(alloc.stats().snapshot(0).reference_count, 0);
    }
}
