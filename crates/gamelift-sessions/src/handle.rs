//! Opaque handles for instances handed across an FFI or plugin boundary.

use crate::error::{GameLiftError, GameLiftResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Maps `u64` handles to shared instances. Handle 0 is never issued.
pub struct HandleRegistry<T> {
    next: AtomicU64,
    instances: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            instances: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance and return its handle.
    pub fn insert(&self, instance: T) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.instances.lock().insert(handle, Arc::new(instance));
        debug!(handle, "Registered instance");
        handle
    }

    pub fn get(&self, handle: u64) -> Option<Arc<T>> {
        self.instances.lock().get(&handle).cloned()
    }

    /// Like [`get`](Self::get), but an unknown handle is an error.
    pub fn require(&self, handle: u64) -> GameLiftResult<Arc<T>> {
        self.get(handle).ok_or(GameLiftError::InvalidHandle(handle))
    }

    /// Remove an instance. Unknown or already released handles return `None`.
    ///
    /// The instance itself lives on until the last outstanding `Arc` drops.
    pub fn release(&self, handle: u64) -> Option<Arc<T>> {
        let released = self.instances.lock().remove(&handle);
        debug!(handle, found = released.is_some(), "Released instance");
        released
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_release() {
        let registry = HandleRegistry::new();
        let first = registry.insert("first".to_string());
        let second = registry.insert("second".to_string());

        assert_ne!(first, 0);
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(first).unwrap().as_str(), "first");

        let released = registry.release(first).unwrap();
        assert_eq!(released.as_str(), "first");
        assert!(registry.get(first).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_double_release_is_none() {
        let registry = HandleRegistry::new();
        let handle = registry.insert(5u32);
        assert!(registry.release(handle).is_some());
        assert!(registry.release(handle).is_none());
        assert!(registry.release(12345).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_require_unknown_handle() {
        let registry: HandleRegistry<u32> = HandleRegistry::new();
        match registry.require(9) {
            Err(GameLiftError::InvalidHandle(9)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_handles_are_not_reused() {
        let registry = HandleRegistry::new();
        let handle = registry.insert(1u8);
        registry.release(handle);
        assert_ne!(registry.insert(2u8), handle);
    }
}
