//! Synchronization configuration
//!
//! Two layers in the same shape the rest of the node uses:
//! - `ConfigRegistry`: the recognised `sync.*` / `store.*` parameters with
//!   defaults and range validation, populated by an explicit
//!   `register_parameters` call at construction
//! - `SyncConfig` / `SyncExtraConfig`: the typed views the manager reads

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Watchdog polls without progress before a long-term sync is aborted.
pub const DEFAULT_DETECT_SYNC_ERROR_COUNT: u32 = 3;

// Recognised parameter keys.
pub const PARAM_SYNC_TIMEOUT_INTERVAL: &str = "sync.timeout_interval";
pub const PARAM_LONG_SYNC_MAX_MESSAGE_SIZE: &str = "sync.long_sync_max_message_size";
pub const PARAM_CHUNK_MAX_MESSAGE_SIZE: &str = "sync.chunk_max_message_size";
pub const PARAM_LOG_MAX_MESSAGE_SIZE: &str = "sync.log_max_message_size";
pub const PARAM_STORE_BLOCK_SIZE: &str = "store.block_size";
pub const PARAM_APPROXIMATE_GAP_LSN: &str = "sync.approximate_gap_lsn";
pub const PARAM_APPROXIMATE_WAIT_INTERVAL: &str = "sync.approximate_wait_interval";
pub const PARAM_LOCKCONFLICT_INTERVAL: &str = "sync.lockconflict_interval";
pub const PARAM_SHORTTERM_LIMIT_QUEUE_SIZE: &str = "sync.shortterm_limit_queue_size";
pub const PARAM_SHORTTERM_LOWLOAD_LOG_INTERVAL: &str = "sync.shortterm_lowload_log_interval";
pub const PARAM_SHORTTERM_HIGHLOAD_LOG_INTERVAL: &str = "sync.shortterm_highload_log_interval";
pub const PARAM_LONGTERM_LIMIT_QUEUE_SIZE: &str = "sync.longterm_limit_queue_size";
pub const PARAM_LONGTERM_LOWLOAD_LOG_INTERVAL: &str = "sync.longterm_lowload_log_interval";
pub const PARAM_LONGTERM_HIGHLOAD_LOG_INTERVAL: &str = "sync.longterm_highload_log_interval";
pub const PARAM_LONGTERM_LOWLOAD_CHUNK_INTERVAL: &str = "sync.longterm_lowload_chunk_interval";
pub const PARAM_LONGTERM_HIGHLOAD_CHUNK_INTERVAL: &str = "sync.longterm_highload_chunk_interval";
pub const PARAM_LONGTERM_DUMP_CHUNK_INTERVAL: &str = "sync.longterm_dump_chunk_interval";

/// Registry of recognised numeric parameters.
///
/// Every value is validated on `set`: negatives are rejected and anything
/// above the positive 32-bit range is rejected as well, matching the wire
/// and persistence width of these settings.
#[derive(Debug, Default, Clone)]
pub struct ConfigRegistry {
    values: HashMap<&'static str, i64>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with its default. Called from
    /// `register_parameters`; re-registering keeps the existing value.
    pub fn register(&mut self, key: &'static str, default: i64) {
        self.values.entry(key).or_insert(default);
    }

    /// Set a parameter, returning false (and leaving the value unchanged)
    /// when the key is unknown or the value is out of range.
    pub fn set(&mut self, key: &str, value: i64) -> bool {
        if !(0..=i32::MAX as i64).contains(&value) {
            warn!("Rejected out-of-range value {} for {}", value, key);
            return false;
        }
        match self.values.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => {
                warn!("Rejected unknown sync parameter {}", key);
                false
            }
        }
    }

    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

fn mb_to_bytes(mb: i64) -> usize {
    (mb as usize) * 1024 * 1024
}

/// Message sizing for both sync protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Stall threshold for in-flight syncs.
    sync_timeout_interval: Duration,
    /// Cap on one long-term log slice, bytes.
    long_sync_max_message_size: usize,
    /// Cap on one short-term log slice, bytes.
    log_max_message_size: usize,
    /// Cap on one chunk batch, bytes.
    send_chunk_size_limit: usize,
    /// Storage block size; unit for chunk count computation.
    block_size: usize,
    /// Chunks per long-term batch, derived from the two fields above.
    send_chunk_num: u32,
}

impl SyncConfig {
    /// Declare the parameters this config reads.
    pub fn register_parameters(registry: &mut ConfigRegistry) {
        registry.register(PARAM_SYNC_TIMEOUT_INTERVAL, 30);
        registry.register(PARAM_LONG_SYNC_MAX_MESSAGE_SIZE, 2 * 1024 * 1024);
        registry.register(PARAM_CHUNK_MAX_MESSAGE_SIZE, 2);
        registry.register(PARAM_LOG_MAX_MESSAGE_SIZE, 2);
        registry.register(PARAM_STORE_BLOCK_SIZE, 64 * 1024);
    }

    pub fn new(registry: &ConfigRegistry) -> Self {
        let block_size = registry.get(PARAM_STORE_BLOCK_SIZE).max(1) as usize;
        let send_chunk_size_limit = mb_to_bytes(registry.get(PARAM_CHUNK_MAX_MESSAGE_SIZE));
        Self {
            sync_timeout_interval: Duration::from_secs(
                registry.get(PARAM_SYNC_TIMEOUT_INTERVAL) as u64
            ),
            long_sync_max_message_size: registry.get(PARAM_LONG_SYNC_MAX_MESSAGE_SIZE) as usize,
            log_max_message_size: mb_to_bytes(registry.get(PARAM_LOG_MAX_MESSAGE_SIZE)),
            send_chunk_size_limit,
            block_size,
            send_chunk_num: (send_chunk_size_limit / block_size + 1) as u32,
        }
    }

    pub fn sync_timeout_interval(&self) -> Duration {
        self.sync_timeout_interval
    }

    /// Log slice cap for the given protocol.
    pub fn max_message_size(&self, mode: crate::partition::SyncMode) -> usize {
        match mode {
            crate::partition::SyncMode::ShortTerm => self.log_max_message_size,
            crate::partition::SyncMode::LongTerm => self.long_sync_max_message_size,
        }
    }

    pub fn send_chunk_num(&self) -> u32 {
        self.send_chunk_num
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn set_max_message_size(&mut self, size: i64) -> bool {
        if !(0..=i32::MAX as i64).contains(&size) {
            return false;
        }
        self.long_sync_max_message_size = size as usize;
        self.log_max_message_size = size as usize;
        true
    }

    /// Re-derives the chunk batch count.
    pub fn set_max_chunk_message_size(&mut self, size: i64) -> bool {
        if !(0..=i32::MAX as i64).contains(&size) {
            return false;
        }
        self.send_chunk_size_limit = size as usize;
        self.send_chunk_num = (self.send_chunk_size_limit / self.block_size + 1) as u32;
        true
    }
}

/// Pacing, backpressure and progress-reporting knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncExtraConfig {
    /// LSN gap at which a catchup counts as nearly caught up.
    approximate_gap_lsn: u64,
    /// Dwell between log slices once within the gap.
    approximate_wait_interval: Duration,
    /// Retry delay when the storage layer reports a lock conflict.
    lock_conflict_interval: Duration,
    shortterm_limit_queue_size: usize,
    shortterm_lowload_log_interval: Duration,
    shortterm_highload_log_interval: Duration,
    longterm_limit_queue_size: usize,
    longterm_lowload_log_interval: Duration,
    longterm_highload_log_interval: Duration,
    longterm_lowload_chunk_interval: Duration,
    longterm_highload_chunk_interval: Duration,
    /// Progress log frequency, in chunks.
    longterm_dump_chunk_interval: u32,
}

impl SyncExtraConfig {
    pub fn register_parameters(registry: &mut ConfigRegistry) {
        registry.register(PARAM_APPROXIMATE_GAP_LSN, 100);
        registry.register(PARAM_APPROXIMATE_WAIT_INTERVAL, 10);
        registry.register(PARAM_LOCKCONFLICT_INTERVAL, 30);
        registry.register(PARAM_SHORTTERM_LIMIT_QUEUE_SIZE, 10_000);
        registry.register(PARAM_SHORTTERM_LOWLOAD_LOG_INTERVAL, 0);
        registry.register(PARAM_SHORTTERM_HIGHLOAD_LOG_INTERVAL, 0);
        registry.register(PARAM_LONGTERM_LIMIT_QUEUE_SIZE, 40);
        registry.register(PARAM_LONGTERM_LOWLOAD_LOG_INTERVAL, 0);
        registry.register(PARAM_LONGTERM_HIGHLOAD_LOG_INTERVAL, 100);
        registry.register(PARAM_LONGTERM_LOWLOAD_CHUNK_INTERVAL, 0);
        registry.register(PARAM_LONGTERM_HIGHLOAD_CHUNK_INTERVAL, 100);
        registry.register(PARAM_LONGTERM_DUMP_CHUNK_INTERVAL, 5_000);
    }

    pub fn new(registry: &ConfigRegistry) -> Self {
        let ms = |key: &str| Duration::from_millis(registry.get(key) as u64);
        Self {
            approximate_gap_lsn: registry.get(PARAM_APPROXIMATE_GAP_LSN) as u64,
            approximate_wait_interval: Duration::from_secs(
                registry.get(PARAM_APPROXIMATE_WAIT_INTERVAL) as u64,
            ),
            lock_conflict_interval: Duration::from_secs(
                registry.get(PARAM_LOCKCONFLICT_INTERVAL) as u64,
            ),
            shortterm_limit_queue_size: registry.get(PARAM_SHORTTERM_LIMIT_QUEUE_SIZE) as usize,
            shortterm_lowload_log_interval: ms(PARAM_SHORTTERM_LOWLOAD_LOG_INTERVAL),
            shortterm_highload_log_interval: ms(PARAM_SHORTTERM_HIGHLOAD_LOG_INTERVAL),
            longterm_limit_queue_size: registry.get(PARAM_LONGTERM_LIMIT_QUEUE_SIZE) as usize,
            longterm_lowload_log_interval: ms(PARAM_LONGTERM_LOWLOAD_LOG_INTERVAL),
            longterm_highload_log_interval: ms(PARAM_LONGTERM_HIGHLOAD_LOG_INTERVAL),
            longterm_lowload_chunk_interval: ms(PARAM_LONGTERM_LOWLOAD_CHUNK_INTERVAL),
            longterm_highload_chunk_interval: ms(PARAM_LONGTERM_HIGHLOAD_CHUNK_INTERVAL),
            longterm_dump_chunk_interval: registry.get(PARAM_LONGTERM_DUMP_CHUNK_INTERVAL) as u32,
        }
    }

    pub fn approximate_gap_lsn(&self) -> u64 {
        self.approximate_gap_lsn
    }

    pub fn approximate_wait_interval(&self) -> Duration {
        self.approximate_wait_interval
    }

    pub fn lock_conflict_interval(&self) -> Duration {
        self.lock_conflict_interval
    }

    pub fn limit_queue_size(&self, mode: crate::partition::SyncMode) -> usize {
        match mode {
            crate::partition::SyncMode::ShortTerm => self.shortterm_limit_queue_size,
            crate::partition::SyncMode::LongTerm => self.longterm_limit_queue_size,
        }
    }

    /// Pacing for log emissions: low-load interval while the transport
    /// queue is within the limit, high-load interval beyond it.
    pub fn log_wait_interval(&self, mode: crate::partition::SyncMode, high_load: bool) -> Duration {
        match (mode, high_load) {
            (crate::partition::SyncMode::ShortTerm, false) => self.shortterm_lowload_log_interval,
            (crate::partition::SyncMode::ShortTerm, true) => self.shortterm_highload_log_interval,
            (crate::partition::SyncMode::LongTerm, false) => self.longterm_lowload_log_interval,
            (crate::partition::SyncMode::LongTerm, true) => self.longterm_highload_log_interval,
        }
    }

    /// Pacing for chunk emissions (long-term only).
    pub fn chunk_wait_interval(&self, high_load: bool) -> Duration {
        if high_load {
            self.longterm_highload_chunk_interval
        } else {
            self.longterm_lowload_chunk_interval
        }
    }

    pub fn longterm_dump_chunk_interval(&self) -> u32 {
        self.longterm_dump_chunk_interval
    }

    pub fn set_approximate_gap_lsn(&mut self, gap: i64) -> bool {
        if !(0..=i32::MAX as i64).contains(&gap) {
            return false;
        }
        self.approximate_gap_lsn = gap as u64;
        true
    }

    pub fn set_approximate_wait_interval(&mut self, secs: i64) -> bool {
        if !(0..=i32::MAX as i64).contains(&secs) {
            return false;
        }
        self.approximate_wait_interval = Duration::from_secs(secs as u64);
        true
    }

    pub fn set_limit_queue_size(
        &mut self,
        mode: crate::partition::SyncMode,
        size: i64,
    ) -> bool {
        if !(0..=i32::MAX as i64).contains(&size) {
            return false;
        }
        match mode {
            crate::partition::SyncMode::ShortTerm => {
                self.shortterm_limit_queue_size = size as usize
            }
            crate::partition::SyncMode::LongTerm => self.longterm_limit_queue_size = size as usize,
        }
        true
    }

    pub fn set_longterm_dump_chunk_interval(&mut self, chunks: i64) -> bool {
        if !(0..=i32::MAX as i64).contains(&chunks) {
            return false;
        }
        self.longterm_dump_chunk_interval = chunks as u32;
        true
    }
}

/// Registry pre-populated with every recognised parameter.
pub fn default_registry() -> ConfigRegistry {
    let mut registry = ConfigRegistry::new();
    SyncConfig::register_parameters(&mut registry);
    SyncExtraConfig::register_parameters(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::SyncMode;

    #[test]
    fn test_registry_defaults() {
        let registry = default_registry();
        assert!(registry.contains(PARAM_SYNC_TIMEOUT_INTERVAL));
        assert!(!registry.contains("sync.unknown_parameter"));
        assert_eq!(registry.get(PARAM_APPROXIMATE_GAP_LSN), 100);
        assert_eq!(registry.get(PARAM_SHORTTERM_LIMIT_QUEUE_SIZE), 10_000);
        assert_eq!(registry.get(PARAM_LONGTERM_LIMIT_QUEUE_SIZE), 40);
        assert_eq!(registry.get(PARAM_LONGTERM_DUMP_CHUNK_INTERVAL), 5_000);
    }

    #[test]
    fn test_registry_rejects_bad_values() {
        let mut registry = default_registry();
        assert!(!registry.set(PARAM_APPROXIMATE_GAP_LSN, -1));
        assert_eq!(registry.get(PARAM_APPROXIMATE_GAP_LSN), 100);
        assert!(!registry.set(PARAM_APPROXIMATE_GAP_LSN, i32::MAX as i64 + 1));
        assert!(!registry.set("sync.unknown_parameter", 5));
        assert!(registry.set(PARAM_APPROXIMATE_GAP_LSN, 250));
        assert_eq!(registry.get(PARAM_APPROXIMATE_GAP_LSN), 250);
    }

    #[test]
    fn test_send_chunk_num_derivation() {
        let mut registry = default_registry();
        registry.set(PARAM_CHUNK_MAX_MESSAGE_SIZE, 2);
        registry.set(PARAM_STORE_BLOCK_SIZE, 64 * 1024);
        let config = SyncConfig::new(&registry);
        // 2 MiB / 64 KiB + 1
        assert_eq!(config.send_chunk_num(), 33);
    }

    #[test]
    fn test_chunk_message_size_setter_rederives() {
        let registry = default_registry();
        let mut config = SyncConfig::new(&registry);
        assert!(config.set_max_chunk_message_size(128 * 1024));
        assert_eq!(config.send_chunk_num(), 3);
        assert!(!config.set_max_chunk_message_size(-1));
        assert_eq!(config.send_chunk_num(), 3);
    }

    #[test]
    fn test_message_size_setter_applies_to_both_modes() {
        let registry = default_registry();
        let mut config = SyncConfig::new(&registry);
        assert!(config.set_max_message_size(512 * 1024));
        assert_eq!(config.max_message_size(SyncMode::ShortTerm), 512 * 1024);
        assert_eq!(config.max_message_size(SyncMode::LongTerm), 512 * 1024);
        assert!(!config.set_max_message_size(-7));
        assert_eq!(config.sync_timeout_interval(), Duration::from_secs(30));
        assert_eq!(config.block_size(), 64 * 1024);
    }

    #[test]
    fn test_wait_interval_selection() {
        let registry = default_registry();
        let extra = SyncExtraConfig::new(&registry);
        assert_eq!(
            extra.log_wait_interval(SyncMode::LongTerm, true),
            Duration::from_millis(100)
        );
        assert_eq!(
            extra.log_wait_interval(SyncMode::LongTerm, false),
            Duration::ZERO
        );
        assert_eq!(extra.chunk_wait_interval(true), Duration::from_millis(100));
        assert_eq!(extra.limit_queue_size(SyncMode::LongTerm), 40);
        assert_eq!(extra.limit_queue_size(SyncMode::ShortTerm), 10_000);
    }

    #[test]
    fn test_extra_setters_clamp() {
        let registry = default_registry();
        let mut extra = SyncExtraConfig::new(&registry);
        assert!(extra.set_limit_queue_size(SyncMode::LongTerm, 80));
        assert_eq!(extra.limit_queue_size(SyncMode::LongTerm), 80);
        assert!(!extra.set_limit_queue_size(SyncMode::LongTerm, -5));
        assert_eq!(extra.limit_queue_size(SyncMode::LongTerm), 80);
        assert!(!extra.set_longterm_dump_chunk_interval(i64::MAX));
        assert!(extra.set_approximate_gap_lsn(0));
        assert_eq!(extra.approximate_gap_lsn(), 0);
        assert!(extra.set_approximate_wait_interval(4));
        assert_eq!(extra.approximate_wait_interval(), Duration::from_secs(4));
        assert_eq!(extra.lock_conflict_interval(), Duration::from_secs(30));
        assert_eq!(extra.longterm_dump_chunk_interval(), 5_000);
    }
}
