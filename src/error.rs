use thiserror::Error;

use crate::partition::{NodeId, PartitionId};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Partition {0} is out of range or not created")]
    InvalidPartition(PartitionId),

    #[error("Context limit reached: {0}")]
    ContextLimit(String),

    #[error("Operation {op} is not legal for role {role} on partition {pid}")]
    IllegalOperation {
        op: &'static str,
        role: &'static str,
        pid: PartitionId,
    },

    #[error("Stale message: {0}")]
    StaleMessage(String),

    #[error("Peer failure on node {0}")]
    PeerFailure(NodeId),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SyncError::InvalidPartition(17);
        assert_eq!(err.to_string(), "Partition 17 is out of range or not created");

        let err = SyncError::ContextLimit("slot pool exhausted".to_string());
        assert_eq!(err.to_string(), "Context limit reached: slot pool exhausted");

        let err = SyncError::IllegalOperation {
            op: "SHORTTERM_SYNC_REQUEST",
            role: "BACKUP",
            pid: 3,
        };
        assert_eq!(
            err.to_string(),
            "Operation SHORTTERM_SYNC_REQUEST is not legal for role BACKUP on partition 3"
        );

        let err = SyncError::StaleMessage("version mismatch".to_string());
        assert_eq!(err.to_string(), "Stale message: version mismatch");

        let err = SyncError::Internal("allocator invariant violated".to_string());
        assert_eq!(err.to_string(), "Internal error: allocator invariant violated");
    }

    #[test]
    fn test_sync_result_type() {
        let ok: SyncResult<u64> = Ok(42);
        assert_eq!(ok.unwrap(), 42);

        let err: SyncResult<u64> = Err(SyncError::PeerFailure(2));
        assert!(err.is_err());
    }
}
