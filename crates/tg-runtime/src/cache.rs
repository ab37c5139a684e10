//! Compile cache keyed by Function identity.
//!
//! A short global lock hands out one slot per Function; the slot's own lock
//! is held while compiling, so a Function is compiled at most once while
//! other Functions compile in parallel. Slots hold a weak reference to their
//! Function and are dropped once it is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tg_graph::{Function, FunctionId};
use tracing::debug;

use crate::error::Result;

#[derive(Debug)]
struct Slot<T> {
    owner: Weak<Function>,
    value: Mutex<Option<Arc<T>>>,
}

impl<T> Slot<T> {
    fn is_live(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

#[derive(Debug)]
pub struct CompileCache<T> {
    slots: Mutex<HashMap<FunctionId, Arc<Slot<T>>>>,
    compilations: AtomicU64,
}

impl<T> Default for CompileCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompileCache<T> {
    pub fn new() -> Self {
        CompileCache {
            slots: Mutex::new(HashMap::new()),
            compilations: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `function`, or run `compile` and cache its
    /// result.
    ///
    /// Concurrent callers with the same Function wait for the first
    /// compilation and then share its result. If `compile` fails the slot is
    /// released and the error is returned; the next caller tries again.
    pub fn get_or_compile<F>(&self, function: &Arc<Function>, compile: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let id = function.id();
        let slot = {
            let mut slots = self.slots.lock();
            if !slots.contains_key(&id) {
                let before = slots.len();
                slots.retain(|_, slot| slot.is_live());
                if slots.len() < before {
                    debug!(pruned = before - slots.len(), "dropped dead compile cache slots");
                }
            }
            Arc::clone(slots.entry(id).or_insert_with(|| {
                debug!(function = %id, "new compile cache slot");
                Arc::new(Slot {
                    owner: Arc::downgrade(function),
                    value: Mutex::new(None),
                })
            }))
        };

        let mut entry = slot.value.lock();
        if let Some(compiled) = entry.as_ref() {
            debug!(function = %id, "compile cache hit");
            return Ok(Arc::clone(compiled));
        }
        match compile() {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                self.compilations.fetch_add(1, Ordering::Relaxed);
                *entry = Some(Arc::clone(&compiled));
                Ok(compiled)
            }
            Err(e) => {
                drop(entry);
                self.release_empty(id, &slot);
                Err(e)
            }
        }
    }

    /// Drop the slot of a failed compile unless another caller holds it.
    fn release_empty(&self, id: FunctionId, slot: &Arc<Slot<T>>) {
        let mut slots = self.slots.lock();
        let ours = slots.get(&id).is_some_and(|s| Arc::ptr_eq(s, slot));
        // The map and `slot` are the only owners when no caller is waiting.
        if ours && Arc::strong_count(slot) == 2 {
            let empty = slot.value.try_lock().is_some_and(|v| v.is_none());
            if empty {
                slots.remove(&id);
            }
        }
    }

    pub fn get(&self, id: FunctionId) -> Option<Arc<T>> {
        let slot = self.slots.lock().get(&id).cloned()?;
        let entry = slot.value.lock();
        entry.clone()
    }

    /// Evict `id`. Returns true if a compiled value was cached.
    pub fn remove(&self, id: FunctionId) -> bool {
        let slot = self.slots.lock().remove(&id);
        slot.map(|s| s.value.lock().is_some()).unwrap_or(false)
    }

    /// Number of successful compilations over the cache's lifetime.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of live Functions currently holding a compiled value.
    pub fn len(&self) -> usize {
        let slots: Vec<Arc<Slot<T>>> = self.slots.lock().values().cloned().collect();
        slots
            .iter()
            .filter(|s| s.is_live() && s.value.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}
