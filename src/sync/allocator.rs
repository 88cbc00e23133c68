//! Sized-buffer pool for log and chunk payloads
//!
//! Variable-size allocation with power-of-two classes (256 B element
//! boundary, 1 MiB class refill, 2 MiB per-class reserve). Every allocate
//! and free is tagged with the owning partition and reported to the
//! statistics component, so partition accounting stays exact.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{SyncError, SyncResult};
use crate::partition::PartitionId;
use crate::sync::stats::SyncStats;

/// Smallest size class.
const ELEMENT_BOUNDARY: usize = 256;
/// Bytes brought in per refill of an exhausted class.
const CLASS_CHUNK_BYTES: usize = 1024 * 1024;
/// Free bytes retained per class before giving memory back to the OS.
const CLASS_RESERVE_BYTES: usize = 2 * 1024 * 1024;

fn class_size(size: usize) -> usize {
    size.max(ELEMENT_BOUNDARY).next_power_of_two()
}

fn class_index(size: usize) -> usize {
    (class_size(size).trailing_zeros() - ELEMENT_BOUNDARY.trailing_zeros()) as usize
}

/// A byte buffer owned exclusively by one sync context.
///
/// The exact requested length is what the statistics component was charged
/// with; dropping the buffer without returning it to the pool still
/// balances the accounting, it only forgoes recycling the storage.
#[must_use]
pub struct PooledBuffer {
    data: Vec<u8>,
    len: usize,
    pid: PartitionId,
    stats: Arc<SyncStats>,
    charged: bool,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn partition_id(&self) -> PartitionId {
        self.pid
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if self.charged {
            self.stats.on_free(self.pid, self.len);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("pid", &self.pid)
            .finish()
    }
}

struct ClassPool {
    free: Vec<Vec<u8>>,
}

/// Thread-safe pool shared by every partition's sync contexts.
pub struct SyncAllocator {
    classes: Mutex<Vec<ClassPool>>,
    stats: Arc<SyncStats>,
    /// Cap on outstanding bytes across all partitions; zero means unlimited.
    limit_bytes: u64,
}

impl SyncAllocator {
    pub fn new(stats: Arc<SyncStats>) -> Self {
        Self {
            classes: Mutex::new(Vec::new()),
            stats,
            limit_bytes: 0,
        }
    }

    pub fn with_limit(stats: Arc<SyncStats>, limit_bytes: u64) -> Self {
        Self {
            classes: Mutex::new(Vec::new()),
            stats,
            limit_bytes,
        }
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    /// Allocate a zero-filled buffer of exactly `size` bytes.
    pub fn allocate(&self, pid: PartitionId, size: usize) -> SyncResult<PooledBuffer> {
        if self.limit_bytes > 0
            && self.stats.total_allocated_bytes() + size as u64 > self.limit_bytes
        {
            warn!(
                "Sync buffer pool limit reached: {} outstanding, {} requested for pId {}",
                self.stats.total_allocated_bytes(),
                size,
                pid
            );
            return Err(SyncError::ContextLimit(format!(
                "buffer pool limit of {} bytes reached",
                self.limit_bytes
            )));
        }

        let capacity = class_size(size);
        let mut data = self.pop_or_refill(capacity);
        data.clear();
        data.resize(size, 0);

        self.stats.on_allocate(pid, size);
        Ok(PooledBuffer {
            data,
            len: size,
            pid,
            stats: self.stats.clone(),
            charged: true,
        })
    }

    /// Allocate and fill from `src` in one step.
    pub fn copy_from(&self, pid: PartitionId, src: &[u8]) -> SyncResult<PooledBuffer> {
        let mut buffer = self.allocate(pid, src.len())?;
        buffer.as_mut_slice().copy_from_slice(src);
        Ok(buffer)
    }

    /// Return a buffer to the pool, recycling its storage for the class.
    pub fn release(&self, mut buffer: PooledBuffer) {
        self.stats.on_free(buffer.pid, buffer.len);
        buffer.charged = false;

        let data = std::mem::take(&mut buffer.data);
        let capacity = data.capacity();
        if capacity < ELEMENT_BOUNDARY || !capacity.is_power_of_two() {
            return;
        }
        let idx = class_index(capacity);
        let mut classes = self.classes.lock().unwrap();
        if idx >= classes.len() {
            classes.resize_with(idx + 1, || ClassPool { free: Vec::new() });
        }
        let pool = &mut classes[idx];
        if (pool.free.len() + 1) * capacity <= CLASS_RESERVE_BYTES {
            pool.free.push(data);
        }
    }

    fn pop_or_refill(&self, capacity: usize) -> Vec<u8> {
        let idx = class_index(capacity);
        let mut classes = self.classes.lock().unwrap();
        if idx >= classes.len() {
            classes.resize_with(idx + 1, || ClassPool { free: Vec::new() });
        }
        let pool = &mut classes[idx];
        if let Some(data) = pool.free.pop() {
            return data;
        }
        // Refill the class a chunk at a time; spares go on the free list.
        let spare_count = (CLASS_CHUNK_BYTES / capacity).saturating_sub(1);
        let retained = CLASS_RESERVE_BYTES / capacity;
        for _ in 0..spare_count.min(retained) {
            pool.free.push(Vec::with_capacity(capacity));
        }
        Vec::with_capacity(capacity)
    }

    /// Free bytes currently parked on class free lists.
    #[cfg(test)]
    fn reserved_bytes(&self) -> usize {
        let classes = self.classes.lock().unwrap();
        classes
            .iter()
            .enumerate()
            .map(|(idx, pool)| pool.free.len() * (ELEMENT_BOUNDARY << idx))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(partitions: u32) -> SyncAllocator {
        SyncAllocator::new(Arc::new(SyncStats::new(partitions)))
    }

    #[test]
    fn test_class_rounding() {
        assert_eq!(class_size(1), 256);
        assert_eq!(class_size(256), 256);
        assert_eq!(class_size(257), 512);
        assert_eq!(class_size(70_000), 131_072);
        assert_eq!(class_index(256), 0);
        assert_eq!(class_index(512), 1);
    }

    #[test]
    fn test_allocation_is_exact_in_stats() {
        let alloc = allocator(4);
        let buf = alloc.allocate(2, 1000).unwrap();
        assert_eq!(buf.len(), 1000);
        assert_eq!(alloc.stats().snapshot(2).allocated_bytes, 1000);
        assert_eq!(alloc.stats().snapshot(2).reference_count, 1);

        alloc.release(buf);
        assert_eq!(alloc.stats().snapshot(2).allocated_bytes, 0);
        assert_eq!(alloc.stats().snapshot(2).reference_count, 0);
    }

    #[test]
    fn test_copy_from_round_trip() {
        let alloc = allocator(1);
        let payload: Vec<u8> = (0..500u32).map(|v| v as u8).collect();
        let buf = alloc.copy_from(0, &payload).unwrap();
        assert_eq!(buf.as_slice(), payload.as_slice());
        alloc.release(buf);
    }

    #[test]
    fn test_storage_is_recycled() {
        let alloc = allocator(1);
        let buf = alloc.allocate(0, 300).unwrap();
        alloc.release(buf);
        assert!(alloc.reserved_bytes() >= 512);

        // The next same-class allocation reuses pooled storage and the
        // reserve never exceeds the per-class cap.
        let buf = alloc.allocate(0, 400).unwrap();
        alloc.release(buf);
        assert!(alloc.reserved_bytes() <= 2 * CLASS_RESERVE_BYTES);
    }

    #[test]
    fn test_limit_rejects_with_context_limit() {
        let stats = Arc::new(SyncStats::new(1));
        let alloc = SyncAllocator::with_limit(stats, 1024);
        let kept = alloc.allocate(0, 800).unwrap();
        let err = alloc.allocate(0, 512).unwrap_err();
        assert!(matches!(err, SyncError::ContextLimit(_)));
        // Accounting for the successful allocation is untouched.
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 800);
        alloc.release(kept);
        assert!(alloc.allocate(0, 512).is_ok());
    }

    #[test]
    fn test_drop_without_release_balances_stats() {
        let alloc = allocator(1);
        {
            let _buf = alloc.allocate(0, 2048).unwrap();
            assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 2048);
        }
        assert_eq!(alloc.stats().snapshot(0).allocated_bytes, 0);
        assert_eq!(alloc.stats().snapshot(0).reference_count, 0);
    }
}
