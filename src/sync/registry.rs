//! Long-term sync registry
//!
//! At most one owner-side and one catchup-side long-term sync may be in
//! flight per partition on a node. The registry records those unique
//! entries and the single "focus" partition per side: the long-term sync
//! the engine currently spends memory and CPU on, and the one the
//! watchdog observes.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::partition::{PartitionId, PartitionRevision, SequentialNumber, SyncId};

/// Which end of a long-term sync an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LongSyncSide {
    Owner,
    Catchup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongSyncEntry {
    pub sync_id: SyncId,
    pub pt_rev: PartitionRevision,
    pub ssn: SequentialNumber,
}

pub struct LongSyncRegistry {
    owner_entries: Vec<Option<LongSyncEntry>>,
    catchup_entries: Vec<Option<LongSyncEntry>>,
    current_owner: Option<PartitionId>,
    current_catchup: Option<PartitionId>,
}

impl LongSyncRegistry {
    pub fn new(partition_num: u32) -> Self {
        Self {
            owner_entries: vec![None; partition_num as usize],
            catchup_entries: vec![None; partition_num as usize],
            current_owner: None,
            current_catchup: None,
        }
    }

    fn entries(&self, side: LongSyncSide) -> &Vec<Option<LongSyncEntry>> {
        match side {
            LongSyncSide::Owner => &self.owner_entries,
            LongSyncSide::Catchup => &self.catchup_entries,
        }
    }

    fn entries_mut(&mut self, side: LongSyncSide) -> &mut Vec<Option<LongSyncEntry>> {
        match side {
            LongSyncSide::Owner => &mut self.owner_entries,
            LongSyncSide::Catchup => &mut self.catchup_entries,
        }
    }

    /// Register the unique in-flight long-term sync for `pid` on one side
    /// and make it the side's focus. Registering over a live entry is
    /// rejected: a partition never runs two long-term syncs on the same
    /// side.
    pub fn register(
        &mut self,
        pid: PartitionId,
        side: LongSyncSide,
        entry: LongSyncEntry,
    ) -> SyncResult<()> {
        let slot = self
            .entries_mut(side)
            .get_mut(pid as usize)
            .ok_or(SyncError::InvalidPartition(pid))?;
        if slot.is_some() {
            return Err(SyncError::IllegalOperation {
                op: "LONGTERM_SYNC_REQUEST",
                role: match side {
                    LongSyncSide::Owner => "OWNER",
                    LongSyncSide::Catchup => "CATCHUP",
                },
                pid,
            });
        }
        *slot = Some(entry);
        match side {
            LongSyncSide::Owner => self.current_owner = Some(pid),
            LongSyncSide::Catchup => self.current_catchup = Some(pid),
        }
        Ok(())
    }

    /// Drop the entry for `pid`; clears the focus when it pointed here.
    /// Idempotent.
    pub fn unregister(&mut self, pid: PartitionId, side: LongSyncSide) {
        if let Some(slot) = self.entries_mut(side).get_mut(pid as usize) {
            *slot = None;
        }
        match side {
            LongSyncSide::Owner if self.current_owner == Some(pid) => {
                self.current_owner = None;
            }
            LongSyncSide::Catchup if self.current_catchup == Some(pid) => {
                self.current_catchup = None;
            }
            _ => {}
        }
    }

    pub fn entry(&self, pid: PartitionId, side: LongSyncSide) -> Option<LongSyncEntry> {
        self.entries(side).get(pid as usize).copied().flatten()
    }

    /// The focus partition and its entry for one side.
    pub fn current(&self, side: LongSyncSide) -> Option<(PartitionId, LongSyncEntry)> {
        let pid = match side {
            LongSyncSide::Owner => self.current_owner?,
            LongSyncSide::Catchup => self.current_catchup?,
        };
        self.entry(pid, side).map(|entry| (pid, entry))
    }

    /// Move the focus to an already registered partition.
    pub fn set_current(&mut self, pid: PartitionId, side: LongSyncSide) -> SyncResult<()> {
        if self.entry(pid, side).is_none() {
            return Err(SyncError::InvalidPartition(pid));
        }
        match side {
            LongSyncSide::Owner => self.current_owner = Some(pid),
            LongSyncSide::Catchup => self.current_catchup = Some(pid),
        }
        Ok(())
    }

    /// Live long-term entries on either side for `pid`.
    pub fn is_registered(&self, pid: PartitionId) -> bool {
        self.entry(pid, LongSyncSide::Owner).is_some()
            || self.entry(pid, LongSyncSide::Catchup).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ssn: SequentialNumber) -> LongSyncEntry {
        LongSyncEntry {
            sync_id: SyncId::new(0, 1),
            pt_rev: PartitionRevision(4),
            ssn,
        }
    }

    #[test]
    fn test_register_sets_focus() {
        let mut registry = LongSyncRegistry::new(8);
        registry.register(3, LongSyncSide::Owner, entry(10)).unwrap();

        let (pid, found) = registry.current(LongSyncSide::Owner).unwrap();
        assert_eq!(pid, 3);
        assert_eq!(found.ssn, 10);
        assert!(registry.current(LongSyncSide::Catchup).is_none());
    }

    #[test]
    fn test_at_most_one_per_side() {
        let mut registry = LongSyncRegistry::new(4);
        registry.register(1, LongSyncSide::Owner, entry(1)).unwrap();
        assert!(registry.register(1, LongSyncSide::Owner, entry(2)).is_err());

        // The other side of the same partition is independent.
        registry.register(1, LongSyncSide::Catchup, entry(3)).unwrap();
        assert!(registry
            .register(1, LongSyncSide::Catchup, entry(4))
            .is_err());
    }

    #[test]
    fn test_unregister_clears_focus() {
        let mut registry = LongSyncRegistry::new(4);
        registry.register(2, LongSyncSide::Owner, entry(1)).unwrap();
        assert!(registry.is_registered(2));
        registry.unregister(2, LongSyncSide::Owner);
        assert!(!registry.is_registered(2));
        assert!(registry.current(LongSyncSide::Owner).is_none());
        assert!(registry.entry(2, LongSyncSide::Owner).is_none());
        // Idempotent.
        registry.unregister(2, LongSyncSide::Owner);
    }

    #[test]
    fn test_focus_follows_latest_registration() {
        let mut registry = LongSyncRegistry::new(4);
        registry.register(0, LongSyncSide::Owner, entry(1)).unwrap();
        registry.register(2, LongSyncSide::Owner, entry(2)).unwrap();
        assert_eq!(registry.current(LongSyncSide::Owner).unwrap().0, 2);

        // Unregistering the focus leaves the older entry addressable via
        // set_current.
        registry.unregister(2, LongSyncSide::Owner);
        assert!(registry.current(LongSyncSide::Owner).is_none());
        registry.set_current(0, LongSyncSide::Owner).unwrap();
        assert_eq!(registry.current(LongSyncSide::Owner).unwrap().0, 0);
        assert!(registry.set_current(3, LongSyncSide::Owner).is_err());
    }

    #[test]
    fn test_out_of_range_partition_rejected() {
        let mut registry = LongSyncRegistry::new(2);
        assert!(registry.register(5, LongSyncSide::Owner, entry(1)).is_err());
    }
}
