//! Aggregate synchronization statistics
//!
//! Per-partition accounting of buffer allocations and live contexts.
//! Advisory from the manager's point of view, but kept exact: every
//! allocate/free pair reported by the buffer pool balances out here.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::partition::PartitionId;

/// Snapshot of one partition's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSyncStats {
    /// Bytes currently outstanding.
    pub allocated_bytes: u64,
    /// Number of outstanding allocations.
    pub reference_count: u64,
    /// Cumulative bytes handed out since the last reset.
    pub total_allocated_bytes: u64,
    /// Live sync contexts.
    pub context_count: u64,
}

pub struct SyncStats {
    allocated: Vec<AtomicU64>,
    references: Vec<AtomicU64>,
    total_allocated: Vec<AtomicU64>,
    contexts: Vec<AtomicU64>,
}

impl SyncStats {
    pub fn new(partition_num: u32) -> Self {
        let make = || (0..partition_num).map(|_| AtomicU64::new(0)).collect();
        Self {
            allocated: make(),
            references: make(),
            total_allocated: make(),
            contexts: make(),
        }
    }

    pub fn partition_num(&self) -> u32 {
        self.allocated.len() as u32
    }

    pub fn on_allocate(&self, pid: PartitionId, size: usize) {
        let pid = pid as usize;
        self.allocated[pid].fetch_add(size as u64, Ordering::Relaxed);
        self.references[pid].fetch_add(1, Ordering::Relaxed);
        self.total_allocated[pid].fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn on_free(&self, pid: PartitionId, size: usize) {
        let pid = pid as usize;
        self.allocated[pid].fetch_sub(size as u64, Ordering::Relaxed);
        self.references[pid].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn on_context_created(&self, pid: PartitionId) {
        self.contexts[pid as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_context_removed(&self, pid: PartitionId) {
        self.contexts[pid as usize].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pid: PartitionId) -> PartitionSyncStats {
        let pid = pid as usize;
        PartitionSyncStats {
            allocated_bytes: self.allocated[pid].load(Ordering::Relaxed),
            reference_count: self.references[pid].load(Ordering::Relaxed),
            total_allocated_bytes: self.total_allocated[pid].load(Ordering::Relaxed),
            context_count: self.contexts[pid].load(Ordering::Relaxed),
        }
    }

    pub fn total_allocated_bytes(&self) -> u64 {
        self.allocated.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn total_reference_count(&self) -> u64 {
        self.references.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn total_context_count(&self) -> u64 {
        self.contexts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn clear(&self) {
        for pid in 0..self.allocated.len() {
            self.allocated[pid].store(0, Ordering::Relaxed);
            self.references[pid].store(0, Ordering::Relaxed);
            self.total_allocated[pid].store(0, Ordering::Relaxed);
            self.contexts[pid].store(0, Ordering::Relaxed);
        }
    }

    /// Human-readable allocation summary, partitions with activity only.
    pub fn dump(&self) -> String {
        let entries: Vec<serde_json::Value> = (0..self.partition_num())
            .filter_map(|pid| {
                let snap = self.snapshot(pid);
                if snap == PartitionSyncStats::default() {
                    None
                } else {
                    Some(serde_json::json!({
                        "pId": pid,
                        "allocate": snap.allocated_bytes,
                        "ref": snap.reference_count,
                        "contexts": snap.context_count,
                    }))
                }
            })
            .collect();
        serde_json::json!({ "allocateInfo": entries }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_balance() {
        let stats = SyncStats::new(4);
        stats.on_allocate(1, 4096);
        stats.on_allocate(1, 512);
        stats.on_allocate(2, 100);

        let snap = stats.snapshot(1);
        assert_eq!(snap.allocated_bytes, 4608);
        assert_eq!(snap.reference_count, 2);
        assert_eq!(snap.total_allocated_bytes, 4608);

        stats.on_free(1, 4096);
        stats.on_free(1, 512);
        let snap = stats.snapshot(1);
        assert_eq!(snap.allocated_bytes, 0);
        assert_eq!(snap.reference_count, 0);
        // Cumulative counter is not decremented on free.
        assert_eq!(snap.total_allocated_bytes, 4608);

        assert_eq!(stats.total_allocated_bytes(), 100);
        assert_eq!(stats.total_reference_count(), 1);
    }

    #[test]
    fn test_context_counters() {
        let stats = SyncStats::new(2);
        stats.on_context_created(0);
        stats.on_context_created(0);
        stats.on_context_created(1);
        assert_eq!(stats.snapshot(0).context_count, 2);
        assert_eq!(stats.total_context_count(), 3);

        stats.on_context_removed(0);
        assert_eq!(stats.snapshot(0).context_count, 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let stats = SyncStats::new(2);
        stats.on_allocate(0, 1000);
        stats.on_context_created(0);
        stats.clear();
        assert_eq!(stats.snapshot(0), PartitionSyncStats::default());
        assert_eq!(stats.total_allocated_bytes(), 0);
    }

    #[test]
    fn test_dump_skips_idle_partitions() {
        let stats = SyncStats::new(8);
        stats.on_allocate(3, 256);
        let dump = stats.dump();
        assert!(dump.contains("\"pId\":3"));
        assert!(!dump.contains("\"pId\":0"));
    }
}
