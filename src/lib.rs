pub mod config;
pub mod error;
pub mod partition;
pub mod sync;

pub use config::{default_registry, ConfigRegistry, SyncConfig, SyncExtraConfig};
pub use error::{SyncError, SyncResult};
pub use partition::{
    Lsn, NodeId, PartitionId, PartitionRevision, PartitionTable, SequentialNumber, StatementId,
    SyncId, SyncMode, SyncRole,
};
pub use sync::{
    Collaborators, ContextInfo, LongSyncSide, LongtermSyncInfo, SyncEvent, SyncManager,
    SyncOperationType, SyncPayload, SyncWatchdog,
};
