//! Concurrent per-container property store.
//!
//! Each live handle owns a key-space of string properties. All access
//! goes through one reader/writer lock; reads hand out snapshot copies
//! so callers never observe a key-space mid-mutation.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Keyed store of per-handle properties.
#[derive(Default)]
pub struct PropertyManager {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl PropertyManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, creating the handle's key-space if needed.
    pub fn set(&self, handle: &str, key: &str, value: &str) {
        let mut entries = self.write_lock();
        entries
            .entry(handle.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Returns a property value.
    ///
    /// # Errors
    ///
    /// [`Error::PropertyNotFound`] when the handle has no key-space or
    /// the key is not set.
    pub fn get(&self, handle: &str, key: &str) -> Result<String> {
        self.read_lock()
            .get(handle)
            .and_then(|props| props.get(key))
            .cloned()
            .ok_or_else(|| Error::PropertyNotFound {
                handle: handle.to_string(),
                key: key.to_string(),
            })
    }

    /// Removes a property.
    ///
    /// # Errors
    ///
    /// [`Error::PropertyNotFound`] when the key was not set.
    pub fn remove(&self, handle: &str, key: &str) -> Result<()> {
        let mut entries = self.write_lock();
        entries
            .get_mut(handle)
            .and_then(|props| props.remove(key))
            .map(|_| ())
            .ok_or_else(|| Error::PropertyNotFound {
                handle: handle.to_string(),
                key: key.to_string(),
            })
    }

    /// Snapshot of the handle's key-space. Unknown handles yield an
    /// empty map.
    pub fn all(&self, handle: &str) -> Result<HashMap<String, String>> {
        Ok(self.read_lock().get(handle).cloned().unwrap_or_default())
    }

    /// Drops the handle's entire key-space.
    pub fn destroy_key_space(&self, handle: &str) {
        self.write_lock().remove(handle);
    }

    /// True iff every pair in `query` equals the stored value for the
    /// handle. The check is atomic with respect to concurrent mutation
    /// of the same handle.
    #[must_use]
    pub fn matches_all(&self, handle: &str, query: &HashMap<String, String>) -> bool {
        let entries = self.read_lock();
        let props = entries.get(handle);
        query.iter().all(|(key, value)| {
            props
                .and_then(|props| props.get(key))
                .is_some_and(|stored| stored == value)
        })
    }

    fn read_lock(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, HashMap<String, String>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HashMap<String, String>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
