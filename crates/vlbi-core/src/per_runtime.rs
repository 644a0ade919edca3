//! Generic per-runtime cache.
//!
//! Some commands need to remember state across invocations — `trackmask=`
//! spawns a background "compute the compression solution" task whose
//! handle must survive until a later `trackmask?` picks it up. Rather than
//! real module-level global state keyed by a runtime pointer (as the
//! source does), each [`crate::runtime::Runtime`] owns a type-erased
//! key-value store with per-entry destructors registered at insertion, so
//! runtime teardown forgets everything without any process-wide registry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

type Deleter = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

#[derive(Default)]
struct Slot {
    value: Option<Box<dyn Any + Send>>,
    deleter: Option<Deleter>,
}

/// A type-erased, per-runtime key-value store keyed by an arbitrary
/// `'static` key type (commands typically key by their own marker type or
/// by a `&'static str` keyword name).
#[derive(Default)]
pub struct PerRuntimeCache {
    slots: Mutex<HashMap<&'static str, Slot>>,
}

impl PerRuntimeCache {
    pub fn new() -> Self {
        PerRuntimeCache {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts `value` under `key`, registering `on_drop` to run when the
    /// cache (or the runtime owning it) is torn down, or when the key is
    /// overwritten/erased.
    pub fn insert<T>(&self, key: &'static str, value: T)
    where
        T: Any + Send + 'static,
    {
        self.insert_with_deleter(key, value, |_| {});
    }

    pub fn insert_with_deleter<T, F>(&self, key: &'static str, value: T, on_drop: F)
    where
        T: Any + Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let mut slots = self.slots.lock().unwrap();
        let boxed: Box<dyn Any + Send> = Box::new(value);
        let deleter: Deleter = Box::new(move |v| {
            if let Ok(v) = v.downcast::<T>() {
                on_drop(*v);
            }
        });
        if let Some(old) = slots.insert(
            key,
            Slot {
                value: Some(boxed),
                deleter: Some(deleter),
            },
        ) {
            run_deleter(old);
        }
    }

    pub fn get<T: Any + Send + 'static, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(key)
            .and_then(|slot| slot.value.as_ref())
            .and_then(|v| v.downcast_ref::<T>())
            .map(f)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().unwrap().contains_key(key)
    }

    pub fn erase(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.remove(key) {
            run_deleter(slot);
        }
    }

    /// Runs every registered deleter; called by the owning runtime on
    /// teardown.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        for (_, slot) in slots.drain() {
            run_deleter(slot);
        }
    }
}

fn run_deleter(mut slot: Slot) {
    if let (Some(value), Some(deleter)) = (slot.value.take(), slot.deleter.take()) {
        deleter(value);
    }
}

impl Drop for PerRuntimeCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn insert_then_get_roundtrips() {
        let cache = PerRuntimeCache::new();
        cache.insert("trackmask", 0xffffffff00000000u64);
        let got = cache.get::<u64, _>("trackmask", |v| *v).unwrap();
        assert_eq!(got, 0xffffffff00000000u64);
    }

    #[test]
    fn overwriting_a_key_runs_the_old_deleter() {
        let cache = PerRuntimeCache::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        let d = dropped.clone();
        cache.insert_with_deleter("trackmask", 1u32, move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        cache.insert("trackmask", 2u32);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clearing_the_cache_runs_every_deleter_exactly_once() {
        let cache = PerRuntimeCache::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b", "c"] {
            let d = dropped.clone();
            cache.insert_with_deleter(key, key, move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            });
        }
        cache.clear();
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn dropping_the_cache_itself_runs_deleters() {
        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let cache = PerRuntimeCache::new();
            let d = dropped.clone();
            cache.insert_with_deleter("x", 1u32, move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
