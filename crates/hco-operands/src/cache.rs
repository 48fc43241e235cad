//! Per-cycle slot for the desired object
//!
//! Within one reconcile cycle every consumer must see the same desired
//! object. The slot is filled on first use and handed out as a shared
//! `Arc` until [`DesiredCache::reset`] is called; resetting between cycles
//! is the caller's job.

use std::sync::Arc;

/// Single-slot cache of a built desired object
#[derive(Debug)]
pub struct DesiredCache<T> {
    slot: Option<Arc<T>>,
    builds: u64,
}

impl<T> Default for DesiredCache<T> {
    fn default() -> Self {
        Self {
            slot: None,
            builds: 0,
        }
    }
}

impl<T> DesiredCache<T> {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value, building it with `build` when the slot is empty
    ///
    /// A failed build leaves the slot empty.
    pub fn get_or_try_build<E>(
        &mut self,
        build: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(value) = &self.slot {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(build()?);
        self.builds += 1;
        self.slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Drop the cached value
    pub fn reset(&mut self) {
        self.slot = None;
    }

    /// Cached value without building
    pub fn cached(&self) -> Option<Arc<T>> {
        self.slot.clone()
    }

    /// Number of successful builds so far
    pub fn build_count(&self) -> u64 {
        self.builds
    }
}
