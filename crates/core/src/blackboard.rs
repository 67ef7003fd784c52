//! Process-wide blackboard.
//!
//! A string-keyed bag of shared handles. The engine publishes its platform
//! manager, configuration set and version token under reserved keys;
//! external components may add keys under their own prefix.

use crate::error::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Reserved blackboard keys written by the engine.
pub mod keys {
    /// Handle of the active platform manager
    pub const PLATFORM_MANAGER: &str = "mixin.platform";
    /// The set of registered configuration names
    pub const CONFIGS: &str = "mixin.configs";
    /// Subsystem version token
    pub const INIT: &str = "mixin.initialised";
    /// Active transformer handle
    pub const TRANSFORMER: &str = "mixin.transformer";
}

/// A shared value stored on the blackboard.
pub type BlackboardValue = Arc<dyn Any + Send + Sync>;

static GLOBAL: Lazy<Blackboard> = Lazy::new(Blackboard::new);

/// String-keyed shared value store.
#[derive(Default)]
pub struct Blackboard {
    entries: RwLock<HashMap<String, BlackboardValue>>,
}

impl Blackboard {
    /// Creates an empty blackboard, for tests and embedded engines.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Gets the process-wide blackboard.
    pub fn global() -> &'static Blackboard {
        &GLOBAL
    }

    /// Stores a value under `key`, replacing any previous value.
    pub fn put<S: Into<String>, V: Any + Send + Sync>(&self, key: S, value: V) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.into(), Arc::new(value));
    }

    /// Gets the raw value under `key`.
    pub fn get_raw(&self, key: &str) -> Option<BlackboardValue> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Gets the value under `key` downcast to `V`.
    ///
    /// Returns `None` for a missing key and an error for a key holding a
    /// value of a different type.
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> CoreResult<Option<Arc<V>>> {
        match self.get_raw(key) {
            None => Ok(None),
            Some(value) => value
                .downcast::<V>()
                .map(Some)
                .map_err(|_| CoreError::blackboard_type(key, std::any::type_name::<V>())),
        }
    }

    /// Gets the string value under `key`.
    pub fn get_string(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.get::<String>(key)?.map(|s| (*s).clone()))
    }

    /// Removes the value under `key`, returning whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    /// Clears every entry. Teardown hook for tests.
    pub fn reset(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

impl std::fmt::Debug for Blackboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Blackboard")
            .field("keys", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let board = Blackboard::new();
        board.put(keys::INIT, "0.4.0".to_string());
        assert_eq!(board.get_string(keys::INIT).unwrap().as_deref(), Some("0.4.0"));
    }

    #[test]
    fn test_type_mismatch_reports_error() {
        let board = Blackboard::new();
        board.put("k", 42u32);
        assert!(board.get::<String>("k").is_err());
        assert_eq!(*board.get::<u32>("k").unwrap().unwrap(), 42);
    }

    #[test]
    fn test_missing_key_is_none() {
        let board = Blackboard::new();
        assert!(board.get::<String>("absent").unwrap().is_none());
    }

    #[test]
    fn test_reset_clears() {
        let board = Blackboard::new();
        board.put("a", 1i64);
        board.reset();
        assert!(board.get_raw("a").is_none());
    }
}
