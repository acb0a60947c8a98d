//! Per-key single-flight for cache misses.
//!
//! Concurrent requests that miss on the same (file, format) queue behind one
//! async mutex, so only the first generates and the rest find a hit.

use crate::format::CacheFormat;
use shelf_models::FileId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (FileId, CacheFormat);
type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    slots: Mutex<HashMap<Key, Slot>>,
}
impl InFlight {
    /// Wait until no one else holds `key`, then hold it until the guard drops.
    pub(crate) async fn acquire(&self, file_id: FileId, format: &CacheFormat) -> InFlightGuard<'_> {
        let key = (file_id, format.clone());
        let slot = Arc::clone(self.slots().entry(key.clone()).or_default());
        // Build the guard before waiting so a cancelled waiter still cleans up.
        let mut guard = InFlightGuard { registry: self, key, slot, held: None };
        guard.held = Some(Arc::clone(&guard.slot).lock_owned().await);
        guard
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Key, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots().len()
    }
}

pub(crate) struct InFlightGuard<'a> {
    registry: &'a InFlight,
    key: Key,
    slot: Slot,
    held: Option<OwnedMutexGuard<()>>,
}
impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        // Release first so the next waiter can proceed.
        self.held.take();
        let mut slots = self.registry.slots();
        // One reference in the map plus ours: nobody else is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
