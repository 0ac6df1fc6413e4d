//! Process-wide string configuration: a write-once key→value map, matching `SETENV`/`GETENV`
//! semantics (`skynet_env.c`'s "assert the global is nil before setting it", ported to a
//! `HashMap` instead of a Lua global table).

use std::collections::HashMap;
use std::sync::RwLock;

/// A write-once environment store. `set` fails (without mutating anything) if the key is
/// already bound; `get` returns an owned clone rather than a borrowed reference, since that's
/// the safe equivalent of "a transient pointer valid until the next write" once there's no
/// garbage collector backing it.
pub struct EnvironmentStore {
    entries: RwLock<HashMap<String, String>>,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        EnvironmentStore {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `key` to `value`. Returns `false` (without mutating) if `key` was already bound.
    pub fn set(&self, key: &str, value: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_owned(), value.to_owned());
        true
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }
}

impl Default for EnvironmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let env = EnvironmentStore::new();
        assert!(env.set("thread", "8"));
        assert_eq!(env.get("thread").as_deref(), Some("8"));
    }

    #[test]
    fn second_set_is_rejected_and_value_unchanged() {
        let env = EnvironmentStore::new();
        assert!(env.set("thread", "8"));
        assert!(!env.set("thread", "16"));
        assert_eq!(env.get("thread").as_deref(), Some("8"));
    }

    #[test]
    fn get_miss_is_none() {
        let env = EnvironmentStore::new();
        assert_eq!(env.get("missing"), None);
    }
}
