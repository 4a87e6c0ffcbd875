//! Cache memory accounting and epoch-based invalidation
//!
//! **Why**: The playback and general caches are bounded by entry count, but
//! decoded frames vary wildly in size. Both caches report into one
//! `CacheManager` so a memory ceiling applies across them.
//! The epoch counter invalidates every queued retrieval job at once when the
//! sequence is edited or the session ends.
//!
//! **Used by**: `EditSession` (one per session), `BoundedCache`, `Workers`

use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::System;

#[derive(Debug)]
pub struct CacheManager {
    /// Bytes currently held by all caches
    memory_usage: AtomicUsize,
    max_memory_bytes: AtomicUsize,
    /// Epoch counter shared with Workers
    current_epoch: Arc<AtomicU64>,
}

impl CacheManager {
    /// Create manager with a limit derived from available memory.
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0)
    /// * `reserve_gb` - Memory left to the system (GB)
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available = sys.available_memory() as usize;
        let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as usize;
        let usable = available.saturating_sub(reserve);
        let max_memory_bytes = (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize;

        info!(
            "CacheManager init: available={} MB, reserve={} MB, limit={} MB",
            available / 1024 / 1024,
            reserve / 1024 / 1024,
            max_memory_bytes / 1024 / 1024,
        );

        Self::with_limit(max_memory_bytes)
    }

    /// Create manager with an explicit byte limit.
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Increment epoch and return new value.
    ///
    /// Every job enqueued with an older epoch is skipped when a worker picks it up.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Shared epoch counter (for Workers)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }

    pub fn check_memory_limit(&self) -> bool {
        self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// (usage, limit) in bytes
    pub fn mem(&self) -> (usize, usize) {
        (
            self.memory_usage.load(Ordering::Relaxed),
            self.max_memory_bytes.load(Ordering::Relaxed),
        )
    }

    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        if new_usage > limit {
            debug!(
                "Memory limit exceeded: {} KB / {} KB",
                new_usage / 1024,
                limit / 1024
            );
        }
    }

    /// Saturating subtraction
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_increment() {
        let manager = CacheManager::with_limit(1024);
        assert_eq!(manager.current_epoch(), 0);
        assert_eq!(manager.increment_epoch(), 1);
        assert_eq!(manager.increment_epoch(), 2);
        assert_eq!(manager.epoch_ref().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_memory_tracking() {
        let manager = CacheManager::with_limit(1000);
        manager.add_memory(800);
        assert!(!manager.check_memory_limit());
        manager.add_memory(400);
        assert!(manager.check_memory_limit());
        manager.free_memory(5000);
        assert_eq!(manager.mem(), (0, 1000));
    }

    #[test]
    fn test_limit_from_system() {
        let manager = CacheManager::new(0.5, 0.0);
        let (usage, _limit) = manager.mem();
        assert_eq!(usage, 0);
    }
}
