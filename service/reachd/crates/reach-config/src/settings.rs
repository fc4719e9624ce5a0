//! Persisted per-account settings store.
//!
//! The broker reads and writes user-facing accessibility state (the
//! enabled-ability list, feature toggles, shortcut targets) through the
//! [`SettingsStore`] trait and never touches a storage format directly.
//! [`JsonFileSettings`] is the shipping backend; [`MemorySettings`] backs
//! tests and ephemeral accounts.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Well-known setting keys.
pub mod keys {
    /// String list: uris of the abilities the user has enabled.
    pub const ENABLED_ABILITIES: &str = "enabled_abilities";
    /// Bool: accessibility globally enabled for the account.
    pub const ACCESSIBILITY_ENABLED: &str = "accessibility_enabled";
    /// Bool: screen magnification toggle.
    pub const SCREEN_MAGNIFICATION: &str = "screen_magnification";
    /// Bool: mouse-key navigation toggle.
    pub const MOUSE_KEY: &str = "mouse_key";
    /// Bool: caption overlay toggle.
    pub const CAPTION_STATE: &str = "caption_state";
    /// String: uri launched by the accessibility shortcut.
    pub const SHORTCUT_TARGET: &str = "shortcut_target";
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i32),
    Str(String),
    StrList(Vec<String>),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Int(_) => "int",
            SettingValue::Str(_) => "string",
            SettingValue::StrList(_) => "string list",
        }
    }
}

/// Handle for removing a change observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Callback invoked with the key and new value after a change lands.
pub type ObserverFn = Box<dyn Fn(&str, &SettingValue) + Send + Sync>;

/// Typed get/put of scalar and list values plus change observation.
///
/// Implementations must be cheap to call under the broker's registry locks;
/// persistence may be deferred but reads reflect the latest put.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<SettingValue>;
    fn put(&self, key: &str, value: SettingValue) -> ConfigResult<()>;

    /// Registers `observer` for changes to `key`. The observer runs on the
    /// writer's context after the value is visible to readers.
    fn observe(&self, key: &str, observer: ObserverFn) -> ObserverId;
    fn unobserve(&self, id: ObserverId);

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(SettingValue::Bool(value)) => value,
            Some(other) => {
                warn!(key, actual = other.type_name(), "setting has unexpected type");
                default
            }
            None => default,
        }
    }

    fn put_bool(&self, key: &str, value: bool) -> ConfigResult<()> {
        self.put(key, SettingValue::Bool(value))
    }

    fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.get(key) {
            Some(SettingValue::Int(value)) => value,
            _ => default,
        }
    }

    fn put_int(&self, key: &str, value: i32) -> ConfigResult<()> {
        self.put(key, SettingValue::Int(value))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(SettingValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    fn put_string(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.put(key, SettingValue::Str(value.to_string()))
    }

    fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(SettingValue::StrList(value)) => value,
            _ => Vec::new(),
        }
    }

    fn put_string_list(&self, key: &str, value: Vec<String>) -> ConfigResult<()> {
        self.put(key, SettingValue::StrList(value))
    }
}

type SharedObserver = Arc<dyn Fn(&str, &SettingValue) + Send + Sync>;

struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, String, SharedObserver)>,
}

impl Observers {
    fn new() -> Self {
        Observers { next_id: 1, entries: Vec::new() }
    }

    fn add(&mut self, key: &str, observer: ObserverFn) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, key.to_string(), Arc::from(observer)));
        id
    }

    fn remove(&mut self, id: ObserverId) {
        self.entries.retain(|(entry_id, _, _)| *entry_id != id);
    }
}

fn notify(observers: &Mutex<Observers>, key: &str, value: &SettingValue) {
    // Collect under the lock, invoke outside it: an observer may re-enter
    // the store.
    let matching: Vec<SharedObserver> = {
        let guard = observers.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entries
            .iter()
            .filter(|(_, observed, _)| observed == key)
            .map(|(_, _, observer)| observer.clone())
            .collect()
    };
    for observer in matching {
        observer(key, value);
    }
}

/// In-memory settings store.
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, SettingValue>>,
    observers: Mutex<Observers>,
}

impl MemorySettings {
    pub fn new() -> Arc<Self> {
        Arc::new(MemorySettings {
            values: Mutex::new(BTreeMap::new()),
            observers: Mutex::new(Observers::new()),
        })
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    fn put(&self, key: &str, value: SettingValue) -> ConfigResult<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.clone());
        notify(&self.observers, key, &value);
        Ok(())
    }

    fn observe(&self, key: &str, observer: ObserverFn) -> ObserverId {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).add(key, observer)
    }

    fn unobserve(&self, id: ObserverId) {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }
}

/// Settings store persisted as one JSON document per account, written with
/// write-then-rename so a crash never leaves a torn file.
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, SettingValue>>,
    observers: Mutex<Observers>,
}

impl JsonFileSettings {
    /// Opens (or creates) the settings document at `path`.
    pub fn open(path: impl Into<PathBuf>) -> ConfigResult<Arc<Self>> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Ok(Arc::new(JsonFileSettings {
            path,
            values: Mutex::new(values),
            observers: Mutex::new(Observers::new()),
        }))
    }

    fn persist(&self, snapshot: &BTreeMap<String, SettingValue>) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let raw = serde_json::to_string_pretty(snapshot).map_err(|err| ConfigError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|source| ConfigError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    fn put(&self, key: &str, value: SettingValue) -> ConfigResult<()> {
        let snapshot = {
            let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
            guard.insert(key.to_string(), value.clone());
            guard.clone()
        };
        self.persist(&snapshot)?;
        notify(&self.observers, key, &value);
        Ok(())
    }

    fn observe(&self, key: &str, observer: ObserverFn) -> ObserverId {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).add(key, observer)
    }

    fn unobserve(&self, id: ObserverId) {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_typed_accessors() {
        let store = MemorySettings::new();
        store.put_bool(keys::SCREEN_MAGNIFICATION, true).unwrap();
        store
            .put_string_list(keys::ENABLED_ABILITIES, vec!["a/b".to_string()])
            .unwrap();

        assert!(store.get_bool(keys::SCREEN_MAGNIFICATION, false));
        assert_eq!(store.get_string_list(keys::ENABLED_ABILITIES), vec!["a/b"]);
        // Missing keys yield the caller's default.
        assert!(!store.get_bool(keys::MOUSE_KEY, false));
    }

    #[test]
    fn test_type_confusion_yields_default() {
        let store = MemorySettings::new();
        store.put_int(keys::CAPTION_STATE, 3).unwrap();
        assert!(store.get_bool(keys::CAPTION_STATE, true));
    }

    #[test]
    fn test_observer_fires_on_put_and_stops_after_unobserve() {
        let store = MemorySettings::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let id = store.observe(
            keys::MOUSE_KEY,
            Box::new(move |_, _| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        store.put_bool(keys::MOUSE_KEY, true).unwrap();
        store.put_bool(keys::CAPTION_STATE, true).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        store.unobserve(id);
        store.put_bool(keys::MOUSE_KEY, false).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("100.json");
        {
            let store = JsonFileSettings::open(&path).unwrap();
            store
                .put_string_list(
                    keys::ENABLED_ABILITIES,
                    vec!["com.example/Reader".to_string()],
                )
                .unwrap();
            store.put_bool(keys::ACCESSIBILITY_ENABLED, true).unwrap();
        }
        let reopened = JsonFileSettings::open(&path).unwrap();
        assert_eq!(
            reopened.get_string_list(keys::ENABLED_ABILITIES),
            vec!["com.example/Reader"]
        );
        assert!(reopened.get_bool(keys::ACCESSIBILITY_ENABLED, false));
    }

    #[test]
    fn test_file_store_rejects_corrupt_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonFileSettings::open(&path).is_err());
    }
}
