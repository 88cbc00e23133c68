//! Stall detection for long-term syncs
//!
//! The watchdog observes the owner-side focus long-term sync on a cluster
//! tick. Progress is any advance in installed chunks or in the processed
//! LSN range; an episode that shows none for several consecutive polls is
//! aborted and its partition rejoins membership with a fresh revision.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::partition::{Lsn, PartitionId, SequentialNumber};
use crate::sync::manager::SyncManager;
use crate::sync::registry::LongSyncSide;

/// What one poll sees of the focus episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncObservation {
    pub pid: PartitionId,
    pub ssn: SequentialNumber,
    pub chunk_num: u32,
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
}

/// Scratch state carried between polls.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pid: Option<PartitionId>,
    ssn: SequentialNumber,
    chunk_num: u32,
    start_lsn: Lsn,
    end_lsn: Lsn,
    error_count: u32,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self {
            pid: None,
            ssn: -1,
            chunk_num: 0,
            start_lsn: 0,
            end_lsn: 0,
            error_count: 0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Fold one observation in and return the consecutive no-progress
    /// count. A new episode or any advance resets the count.
    pub fn check_and_update(&mut self, observed: &SyncObservation) -> u32 {
        if self.pid != Some(observed.pid) || self.ssn != observed.ssn {
            self.pid = Some(observed.pid);
            self.ssn = observed.ssn;
            self.chunk_num = observed.chunk_num;
            self.start_lsn = observed.start_lsn;
            self.end_lsn = observed.end_lsn;
            self.error_count = 0;
            return 0;
        }
        let advanced = observed.chunk_num > self.chunk_num
            || observed.start_lsn > self.start_lsn
            || observed.end_lsn > self.end_lsn;
        if advanced {
            self.chunk_num = observed.chunk_num;
            self.start_lsn = observed.start_lsn;
            self.end_lsn = observed.end_lsn;
            self.error_count = 0;
        } else {
            self.error_count += 1;
        }
        self.error_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task polling the manager on the cluster tick.
pub struct SyncWatchdog {
    manager: Arc<SyncManager>,
    interval: Duration,
}

impl SyncWatchdog {
    pub fn new(manager: Arc<SyncManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run forever; the embedder owns the task handle and aborts it on
    /// shutdown.
    pub async fn run(self) {
        info!(
            "Starting sync watchdog with a {:?} poll interval",
            self.interval
        );
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tick.tick().await;
            self.poll_once();
        }
    }

    /// One poll: abort the focus long-term sync when it has stalled.
    pub fn poll_once(&self) -> Option<PartitionId> {
        let pid = self.manager.check_current_sync_status()?;
        let Some((current_pid, sync_id, _)) =
            self.manager.get_current_sync_id(LongSyncSide::Owner)
        else {
            return None;
        };
        if current_pid != pid {
            return None;
        }
        warn!("Aborting stalled long-term sync for pId {}", pid);
        if let Err(err) = self.manager.remove_sync_context(pid, sync_id, true) {
            warn!("Failed to abort stalled sync for pId {}: {}", pid, err);
        }
        Some(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(pid: PartitionId, ssn: SequentialNumber, chunks: u32, end: Lsn) -> SyncObservation {
        SyncObservation {
            pid,
            ssn,
            chunk_num: chunks,
            start_lsn: 0,
            end_lsn: end,
        }
    }

    #[test]
    fn test_new_episode_resets_count() {
        let mut status = SyncStatus::new();
        assert_eq!(status.check_and_update(&observation(1, 10, 0, 0)), 0);
        assert_eq!(status.check_and_update(&observation(1, 10, 0, 0)), 1);
        // A different ssn on the same partition is a new episode.
        assert_eq!(status.check_and_update(&observation(1, 11, 0, 0)), 0);
        // A different partition too.
        assert_eq!(status.check_and_update(&observation(2, 11, 0, 0)), 0);
    }

    #[test]
    fn test_progress_resets_count() {
        let mut status = SyncStatus::new();
        status.check_and_update(&observation(1, 10, 0, 0));
        assert_eq!(status.check_and_update(&observation(1, 10, 0, 0)), 1);
        assert_eq!(status.check_and_update(&observation(1, 10, 0, 0)), 2);
        // Chunk advance.
        assert_eq!(status.check_and_update(&observation(1, 10, 5, 0)), 0);
        assert_eq!(status.check_and_update(&observation(1, 10, 5, 0)), 1);
        // LSN advance.
        assert_eq!(status.check_and_update(&observation(1, 10, 5, 100)), 0);
    }

    #[test]
    fn test_stall_reaches_threshold() {
        let mut status = SyncStatus::new();
        status.check_and_update(&observation(3, 7, 2, 50));
        let mut errors = 0;
        for _ in 0..3 {
            errors = status.check_and_update(&observation(3, 7, 2, 50));
        }
        assert_eq!(errors, 3);
        assert_eq!(status.error_count(), 3);
    }

    #[test]
    fn test_clear() {
        let mut status = SyncStatus::new();
        status.check_and_update(&observation(1, 1, 0, 0));
        status.check_and_update(&observation(1, 1, 0, 0));
        status.clear();
        assert_eq!(status.error_count(), 0);
        assert_eq!(status.check_and_update(&observation(1, 1, 0, 0)), 0);
    }
}
