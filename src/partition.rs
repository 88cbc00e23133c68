//! Partition identity and role tracking
//!
//! Shared identifier types for the synchronization fabric plus the
//! in-memory partition table that records, per partition, the role this
//! node currently plays, its log position and the membership revision that
//! assigned the role.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Index of a partition, `[0, partition_num)`.
pub type PartitionId = u32;

/// Small integer identifying a cluster member.
pub type NodeId = u32;

/// Log sequence number, monotonically non-decreasing per partition.
pub type Lsn = u64;

/// Per-context statement tag, strictly increasing.
pub type StatementId = u64;

/// Process-wide sync sequential number (SSN), assigned at context creation.
pub type SequentialNumber = i64;

pub const UNDEF_LSN: Lsn = u64::MAX;

/// Identity of one in-flight synchronization episode.
///
/// The version discriminates reused slots: a `SyncId` carrying a stale
/// version never resolves to the context now occupying the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncId {
    pub context_id: i32,
    pub context_version: u64,
}

impl SyncId {
    pub const UNDEF_CONTEXT_ID: i32 = -1;
    pub const INITIAL_CONTEXT_VERSION: u64 = 0;

    pub const UNDEF: SyncId = SyncId {
        context_id: Self::UNDEF_CONTEXT_ID,
        context_version: Self::INITIAL_CONTEXT_VERSION,
    };

    pub fn new(context_id: i32, context_version: u64) -> Self {
        Self {
            context_id,
            context_version,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.context_id != Self::UNDEF_CONTEXT_ID
    }

    pub fn reset(&mut self) {
        *self = Self::UNDEF;
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::UNDEF
    }
}

impl std::fmt::Display for SyncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{contextId:{}, version:{}}}",
            self.context_id, self.context_version
        )
    }
}

/// Opaque, monotonically increasing revision stamp attached by the
/// membership layer to the role assignment that triggered a sync.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PartitionRevision(pub u64);

impl std::fmt::Display for PartitionRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

/// Which protocol a sync episode runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    ShortTerm,
    LongTerm,
}

impl SyncMode {
    /// Label used in log lines and dumps.
    pub fn label(&self) -> &'static str {
        match self {
            SyncMode::ShortTerm => "SHORT_TERM_SYNC",
            SyncMode::LongTerm => "LONG_TERM_SYNC",
        }
    }
}

/// Role a replica plays for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRole {
    /// Accepts writes; drives syncs.
    Owner,
    /// Kept in sync via short-term log streaming.
    Backup,
    /// Being seeded via snapshot + log (long-term sync).
    Catchup,
}

impl SyncRole {
    pub fn label(&self) -> &'static str {
        match self {
            SyncRole::Owner => "OWNER",
            SyncRole::Backup => "BACKUP",
            SyncRole::Catchup => "CATCHUP",
        }
    }
}

#[derive(Debug, Clone)]
struct PartitionEntry {
    role: SyncRole,
    lsn: Lsn,
    revision: PartitionRevision,
    /// Peers relevant to the current role: backups when owner, the
    /// upstream owner when backup/catchup.
    peers: Vec<NodeId>,
}

impl Default for PartitionEntry {
    fn default() -> Self {
        Self {
            role: SyncRole::Backup,
            lsn: 0,
            revision: PartitionRevision(0),
            peers: Vec::new(),
        }
    }
}

/// In-memory view of this node's partition assignments.
///
/// The membership layer owns role changes; the sync manager only reads
/// roles (for the operation gate) and advances LSNs as log is produced or
/// applied.
pub struct PartitionTable {
    partition_num: u32,
    entries: RwLock<HashMap<PartitionId, PartitionEntry>>,
}

impl PartitionTable {
    pub fn new(partition_num: u32) -> Self {
        Self {
            partition_num,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn partition_num(&self) -> u32 {
        self.partition_num
    }

    pub fn check_partition(&self, pid: PartitionId) -> SyncResult<()> {
        if pid < self.partition_num {
            Ok(())
        } else {
            Err(SyncError::InvalidPartition(pid))
        }
    }

    /// Install a role assignment with its revision stamp.
    pub fn set_role(
        &self,
        pid: PartitionId,
        role: SyncRole,
        revision: PartitionRevision,
        peers: Vec<NodeId>,
    ) -> SyncResult<()> {
        self.check_partition(pid)?;
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(pid).or_default();
        entry.role = role;
        entry.revision = revision;
        entry.peers = peers;
        Ok(())
    }

    pub fn role(&self, pid: PartitionId) -> SyncResult<SyncRole> {
        self.check_partition(pid)?;
        let entries = self.entries.read().unwrap();
        Ok(entries.get(&pid).map(|e| e.role).unwrap_or(SyncRole::Backup))
    }

    pub fn revision(&self, pid: PartitionId) -> PartitionRevision {
        let entries = self.entries.read().unwrap();
        entries.get(&pid).map(|e| e.revision).unwrap_or_default()
    }

    pub fn peers(&self, pid: PartitionId) -> Vec<NodeId> {
        let entries = self.entries.read().unwrap();
        entries.get(&pid).map(|e| e.peers.clone()).unwrap_or_default()
    }

    pub fn lsn(&self, pid: PartitionId) -> Lsn {
        let entries = self.entries.read().unwrap();
        entries.get(&pid).map(|e| e.lsn).unwrap_or(0)
    }

    /// Advance the recorded log position. LSNs never move backwards.
    pub fn set_lsn(&self, pid: PartitionId, lsn: Lsn) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(pid).or_default();
        if lsn > entry.lsn {
            entry.lsn = lsn;
        }
    }

    pub fn remove(&self, pid: PartitionId) {
        self.entries.write().unwrap().remove(&pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_id_equality() {
        let a = SyncId::new(3, 7);
        let b = SyncId::new(3, 7);
        let c = SyncId::new(3, 8);
        let d = SyncId::new(4, 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_sync_id_undef() {
        let mut id = SyncId::new(5, 2);
        assert!(id.is_valid());
        id.reset();
        assert!(!id.is_valid());
        assert_eq!(id, SyncId::UNDEF);
        assert_eq!(SyncId::default(), SyncId::UNDEF);
    }

    #[test]
    fn test_partition_table_roles() {
        let pt = PartitionTable::new(4);
        assert!(pt.check_partition(3).is_ok());
        assert!(pt.check_partition(4).is_err());

        pt.set_role(1, SyncRole::Owner, PartitionRevision(9), vec![2, 3])
            .unwrap();
        assert_eq!(pt.role(1).unwrap(), SyncRole::Owner);
        assert_eq!(pt.revision(1), PartitionRevision(9));
        assert_eq!(pt.peers(1), vec![2, 3]);

        // Unassigned partitions default to backup with revision zero.
        assert_eq!(pt.role(0).unwrap(), SyncRole::Backup);
        assert_eq!(pt.revision(0), PartitionRevision(0));

        pt.remove(1);
        assert_eq!(pt.role(1).unwrap(), SyncRole::Backup);
        assert_eq!(pt.peers(1), Vec::<NodeId>::new());
    }

    #[test]
    fn test_lsn_never_regresses() {
        let pt = PartitionTable::new(2);
        pt.set_lsn(0, 100);
        assert_eq!(pt.lsn(0), 100);
        pt.set_lsn(0, 50);
        assert_eq!(pt.lsn(0), 100);
        pt.set_lsn(0, 150);
        assert_eq!(pt.lsn(0), 150);
    }
}
