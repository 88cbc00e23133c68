//! Wire-visible synchronization protocol
//!
//! Operation tags cross the network and must match across cluster
//! versions: values are assigned sequentially from zero in declaration
//! order and pinned by test. Payloads use bincode with a u32 length
//! prefix, the same framing the rest of the node speaks.

use serde::{Deserialize, Serialize};

use crate::partition::{
    Lsn, NodeId, PartitionId, PartitionRevision, SequentialNumber, StatementId, SyncId,
};

/// Every operation the synchronization fabric sends or receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncOperationType {
    ShorttermSyncRequest = 0,
    ShorttermSyncStart = 1,
    ShorttermSyncStartAck = 2,
    ShorttermSyncLog = 3,
    ShorttermSyncLogAck = 4,
    ShorttermSyncEnd = 5,
    ShorttermSyncEndAck = 6,
    LongtermSyncRequest = 7,
    LongtermSyncStart = 8,
    LongtermSyncStartAck = 9,
    LongtermSyncChunk = 10,
    LongtermSyncChunkAck = 11,
    LongtermSyncLog = 12,
    LongtermSyncLogAck = 13,
    SyncTimeout = 14,
    DropPartition = 15,
    LongtermSyncPrepareAck = 16,
}

impl SyncOperationType {
    /// Number of wire tags; doubles as the terminal sentinel value.
    pub const COUNT: u8 = 17;

    pub const ALL: [SyncOperationType; Self::COUNT as usize] = [
        SyncOperationType::ShorttermSyncRequest,
        SyncOperationType::ShorttermSyncStart,
        SyncOperationType::ShorttermSyncStartAck,
        SyncOperationType::ShorttermSyncLog,
        SyncOperationType::ShorttermSyncLogAck,
        SyncOperationType::ShorttermSyncEnd,
        SyncOperationType::ShorttermSyncEndAck,
        SyncOperationType::LongtermSyncRequest,
        SyncOperationType::LongtermSyncStart,
        SyncOperationType::LongtermSyncStartAck,
        SyncOperationType::LongtermSyncChunk,
        SyncOperationType::LongtermSyncChunkAck,
        SyncOperationType::LongtermSyncLog,
        SyncOperationType::LongtermSyncLogAck,
        SyncOperationType::SyncTimeout,
        SyncOperationType::DropPartition,
        SyncOperationType::LongtermSyncPrepareAck,
    ];

    pub fn wire_tag(self) -> u8 {
        self as u8
    }

    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SyncOperationType::ShorttermSyncRequest => "SHORTTERM_SYNC_REQUEST",
            SyncOperationType::ShorttermSyncStart => "SHORTTERM_SYNC_START",
            SyncOperationType::ShorttermSyncStartAck => "SHORTTERM_SYNC_START_ACK",
            SyncOperationType::ShorttermSyncLog => "SHORTTERM_SYNC_LOG",
            SyncOperationType::ShorttermSyncLogAck => "SHORTTERM_SYNC_LOG_ACK",
            SyncOperationType::ShorttermSyncEnd => "SHORTTERM_SYNC_END",
            SyncOperationType::ShorttermSyncEndAck => "SHORTTERM_SYNC_END_ACK",
            SyncOperationType::LongtermSyncRequest => "LONGTERM_SYNC_REQUEST",
            SyncOperationType::LongtermSyncStart => "LONGTERM_SYNC_START",
            SyncOperationType::LongtermSyncStartAck => "LONGTERM_SYNC_START_ACK",
            SyncOperationType::LongtermSyncChunk => "LONGTERM_SYNC_CHUNK",
            SyncOperationType::LongtermSyncChunkAck => "LONGTERM_SYNC_CHUNK_ACK",
            SyncOperationType::LongtermSyncLog => "LONGTERM_SYNC_LOG",
            SyncOperationType::LongtermSyncLogAck => "LONGTERM_SYNC_LOG_ACK",
            SyncOperationType::SyncTimeout => "SYNC_TIMEOUT",
            SyncOperationType::DropPartition => "DROP_PARTITION",
            SyncOperationType::LongtermSyncPrepareAck => "LONGTERM_SYNC_PREPARE_ACK",
        }
    }
}

/// Operation-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPayload {
    None,
    /// Sync request from the cluster manager: the downstream peers (the
    /// backups in role for SS, the single catchup for LS).
    Request { nodes: Vec<NodeId> },
    /// Stream opener carrying the owner's tail position.
    Start { owner_lsn: Lsn },
    /// Acknowledgement carrying the replier's current position.
    Ack { lsn: Lsn },
    /// One log slice.
    Log {
        start_lsn: Lsn,
        end_lsn: Lsn,
        data: Vec<u8>,
    },
    /// One chunk batch.
    Chunk {
        chunk_no: u32,
        count: u32,
        total: u32,
        base_size: u32,
        data: Vec<u8>,
    },
}

/// One typed operation flowing through the event service.
///
/// `sync_id` addresses the destination context (`SyncId::UNDEF` when the
/// receiver is expected to create one); `sender_sync_id` is the sender's
/// own context so replies can be routed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub op: SyncOperationType,
    pub pid: PartitionId,
    pub source: NodeId,
    pub target: NodeId,
    pub sync_id: SyncId,
    pub sender_sync_id: SyncId,
    pub pt_rev: PartitionRevision,
    pub stmt_id: StatementId,
    pub ssn: SequentialNumber,
    pub payload: SyncPayload,
}

impl SyncEvent {
    /// Encode to bincode bytes with a u32 length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let payload = bincode::serialize(self).expect("SyncEvent is always serializable");
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        framed.extend(payload);
        framed
    }

    /// Decode from bincode bytes (without the length prefix).
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// The long-term identity triple carried by LS operations.
    pub fn longterm_info(&self) -> LongtermSyncInfo {
        LongtermSyncInfo::new(
            self.sender_sync_id.context_id,
            self.sender_sync_id.context_version,
            self.ssn,
        )
    }
}

/// Long-term sync identity payload: three fields, positional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongtermSyncInfo {
    pub context_id: i32,
    pub context_version: u64,
    pub sync_sequential_number: i64,
}

impl LongtermSyncInfo {
    pub fn new(context_id: i32, context_version: u64, sync_sequential_number: i64) -> Self {
        Self {
            context_id,
            context_version,
            sync_sequential_number,
        }
    }

    pub fn sync_id(&self) -> SyncId {
        SyncId::new(self.context_id, self.context_version)
    }

    /// Positional encoding with a u32 length prefix, per the surrounding
    /// RPC framing.
    pub fn encode(&self) -> Vec<u8> {
        let payload =
            bincode::serialize(self).expect("LongtermSyncInfo is always serializable");
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        framed.extend(payload);
        framed
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        if bytes.len() < 4 {
            return bincode::deserialize(bytes);
        }
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        bincode::deserialize(&bytes[4..4 + len.min(bytes.len() - 4)])
    }
}

impl Default for LongtermSyncInfo {
    fn default() -> Self {
        Self {
            context_id: SyncId::UNDEF_CONTEXT_ID,
            context_version: SyncId::INITIAL_CONTEXT_VERSION,
            sync_sequential_number: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_sequential_from_zero() {
        for (expected, op) in SyncOperationType::ALL.iter().enumerate() {
            assert_eq!(op.wire_tag() as usize, expected);
            assert_eq!(SyncOperationType::from_wire_tag(expected as u8), Some(*op));
        }
        assert_eq!(SyncOperationType::COUNT, 17);
        assert!(SyncOperationType::from_wire_tag(SyncOperationType::COUNT).is_none());
    }

    #[test]
    fn test_event_encode_decode() {
        let event = SyncEvent {
            op: SyncOperationType::ShorttermSyncStartAck,
            pid: 5,
            source: 2,
            target: 1,
            sync_id: SyncId::new(0, 3),
            sender_sync_id: SyncId::new(4, 1),
            pt_rev: PartitionRevision(12),
            stmt_id: 2,
            ssn: 9,
            payload: SyncPayload::Ack { lsn: 4242 },
        };

        let encoded = event.encode();
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(len, encoded.len() - 4);

        let decoded = SyncEvent::decode(&encoded[4..]).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_longterm_info_round_trip() {
        let info = LongtermSyncInfo::new(7, 3, 101);
        let encoded = info.encode();
        let decoded = LongtermSyncInfo::decode(&encoded).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(decoded.sync_id(), SyncId::new(7, 3));

        let unset = LongtermSyncInfo::default();
        assert!(!unset.sync_id().is_valid());
    }

    #[test]
    fn test_longterm_info_from_event() {
        let event = SyncEvent {
            op: SyncOperationType::LongtermSyncChunk,
            pid: 0,
            source: 1,
            target: 3,
            sync_id: SyncId::new(2, 1),
            sender_sync_id: SyncId::new(0, 5),
            pt_rev: PartitionRevision(1),
            stmt_id: 4,
            ssn: 77,
            payload: SyncPayload::None,
        };
        let info = event.longterm_info();
        assert_eq!(info.context_id, 0);
        assert_eq!(info.context_version, 5);
        assert_eq!(info.sync_sequential_number, 77);
    }
}
