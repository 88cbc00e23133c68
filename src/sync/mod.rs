//! Partition synchronization fabric
//!
//! This module coordinates replica reconciliation after membership or
//! role changes:
//! - Short-term sync: stream missing log to freshly-assigned backups;
//!   the partition is write-unavailable while it runs, so it finishes in
//!   seconds
//! - Long-term sync: seed a catchup replica from a snapshot (chunks)
//!   followed by redo log; rate limited, runs alongside normal traffic
//!
//! Architecture:
//! - One `SyncContext` per in-flight episode, pooled per partition in a
//!   `SyncContextTable` and addressed by generational `SyncId`
//! - The `SyncManager` facade gates, transitions and emits; collaborators
//!   (transport, WAL, chunks, checkpoint, storage, cluster) are injected
//!   trait objects
//! - A watchdog aborts long-term syncs that stop making progress

pub mod allocator;
pub mod context;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod stats;
pub mod table;
pub mod watchdog;

// Re-export key types
pub use allocator::{PooledBuffer, SyncAllocator};
pub use context::{BufferKind, SendBackup, SyncContext, SyncState};
pub use manager::{ContextInfo, SyncManager};
pub use protocol::{LongtermSyncInfo, SyncEvent, SyncOperationType, SyncPayload};
pub use registry::{LongSyncEntry, LongSyncRegistry, LongSyncSide};
pub use services::{
    ChunkBatch, ChunkProvider, CheckpointService, ClusterNotifier, Collaborators, LogReader,
    LogSlice, RedoApplier, SyncTransport,
};
pub use stats::{PartitionSyncStats, SyncStats};
pub use table::SyncContextTable;
pub use watchdog::{SyncObservation, SyncStatus, SyncWatchdog};
