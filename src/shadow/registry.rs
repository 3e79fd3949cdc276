//! Tile registry and scheduling state
//!
//! Shared between the orchestration thread, which starts tiles, and the
//! merger thread, which retires finished builders. The in-flight list is
//! guarded by a single mutex; a condition variable on the same mutex wakes
//! the merger whenever a builder finishes, a tile starts, or the registry
//! shuts down.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::worker::TileBuilder;

/// Counters and in-flight builders for one tiled build
pub struct TileRegistry {
    tile_count: usize,
    concurrent_builds: usize,
    /// Tiles handed to a builder (written by the orchestration thread only)
    started: AtomicUsize,
    /// Tiles merged into the shared store (written by the merger only)
    merged: AtomicUsize,
    in_flight: Mutex<Vec<TileBuilder>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    merge_order: Mutex<Vec<usize>>,
}

impl TileRegistry {
    /// Create a registry for `tile_count` tiles with at most `concurrent_builds` in flight
    pub fn new(tile_count: usize, concurrent_builds: usize) -> Self {
        Self {
            tile_count,
            concurrent_builds,
            started: AtomicUsize::new(0),
            merged: AtomicUsize::new(0),
            in_flight: Mutex::new(Vec::with_capacity(concurrent_builds)),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            merge_order: Mutex::new(Vec::with_capacity(tile_count)),
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Vec<TileBuilder>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of tiles
    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    /// Concurrency ceiling
    pub fn concurrent_builds(&self) -> usize {
        self.concurrent_builds
    }

    /// Number of tiles started
    pub fn started(&self) -> usize {
        self.started.load(Ordering::Acquire)
    }

    /// Number of tiles merged
    pub fn merged(&self) -> usize {
        self.merged.load(Ordering::Acquire)
    }

    /// Number of builders started but not yet merged
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    /// Whether every tile has been merged
    pub fn is_complete(&self) -> bool {
        self.merged() >= self.tile_count
    }

    /// Index of the next tile to start, if a builder slot is free and tiles remain.
    ///
    /// Tiles are started strictly in index order.
    pub fn next_tile(&self) -> Option<usize> {
        let started = self.started();
        if started >= self.tile_count {
            return None;
        }
        if self.lock_in_flight().len() >= self.concurrent_builds {
            return None;
        }
        Some(started)
    }

    /// Register a freshly started builder for the tile returned by [`Self::next_tile`]
    pub fn submit(&self, builder: TileBuilder) {
        debug_assert_eq!(builder.tile_index(), self.started());
        {
            let mut in_flight = self.lock_in_flight();
            in_flight.push(builder);
            self.started.fetch_add(1, Ordering::Release);
            self.work_ready.notify_all();
        }
    }

    /// Wake the merger after a builder finished
    pub fn notify_completion(&self) {
        // Taking the lock orders this after the merger's last scan
        let _in_flight = self.lock_in_flight();
        self.work_ready.notify_all();
    }

    /// Block until a finished builder is available and remove it from the
    /// in-flight list. Returns `None` once the registry is shut down.
    pub fn take_finished(&self) -> Option<TileBuilder> {
        let mut in_flight = self.lock_in_flight();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(index) = in_flight.iter().position(TileBuilder::is_done) {
                return Some(in_flight.swap_remove(index));
            }
            in_flight = self
                .work_ready
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Count a completed merge. Called by the merger after the tile's root is stored.
    pub fn record_merge(&self, tile_index: usize) {
        self.merge_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tile_index);
        self.merged.fetch_add(1, Ordering::Release);
    }

    /// Tile indices in the order they were merged
    pub fn merge_order(&self) -> Vec<usize> {
        self.merge_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the merger; builders still in flight are dropped
    pub fn shutdown(&self) {
        let abandoned = {
            let mut in_flight = self.lock_in_flight();
            self.shutdown.store(true, Ordering::Release);
            self.work_ready.notify_all();
            std::mem::take(&mut *in_flight)
        };
        // Dropped outside the lock: finished builders are joined, and their
        // threads may still be inside `notify_completion`
        drop(abandoned);
    }

    /// Whether [`Self::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
