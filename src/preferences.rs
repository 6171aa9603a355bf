//! Process-wide user preferences shared by every artifact and panel.
//!
//! Values are stored as JSON-encoded booleans under fixed keys. Writes go to
//! storage first and are then broadcast so every mounted panel converges.

use std::{collections::BTreeMap, fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::bus::{EventBus, PanelEvent};

pub const AUTO_SEND_KEY: &str = "code-artifact-auto-send";
pub const ALWAYS_EXECUTE_KEY: &str = "code-artifact-always-execute";

/// String key/value storage that survives restarts.
pub trait PreferenceStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// A single JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }
}

impl PreferenceStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock();
        match self.load() {
            Ok(map) => map.get(key).cloned(),
            Err(e) => {
                tracing::warn!("ignoring unreadable preferences: {e:#}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.load().unwrap_or_else(|e| {
            tracing::warn!("replacing unreadable preferences: {e:#}");
            BTreeMap::new()
        });
        map.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&map)?)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Preferences {
    storage: Arc<dyn PreferenceStorage>,
    bus: EventBus,
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("auto_send", &self.auto_send())
            .field("always_execute", &self.always_execute())
            .finish()
    }
}

impl Preferences {
    pub fn new(storage: Arc<dyn PreferenceStorage>, bus: EventBus) -> Self {
        Self { storage, bus }
    }

    /// Send completed run output to the chat automatically. Defaults to on.
    pub fn auto_send(&self) -> bool {
        self.read_flag(AUTO_SEND_KEY, true)
    }

    /// Run generated code without waiting for the prompt. Defaults to off.
    pub fn always_execute(&self) -> bool {
        self.read_flag(ALWAYS_EXECUTE_KEY, false)
    }

    /// Persist `enabled` and broadcast it to every panel.
    pub fn set_auto_send(&self, enabled: bool) -> Result<()> {
        self.write_flag(AUTO_SEND_KEY, enabled)?;
        tracing::info!(enabled, "auto-send toggled");
        self.bus.publish(PanelEvent::AutoSendToggled { enabled });
        Ok(())
    }

    pub fn toggle_auto_send(&self) -> Result<bool> {
        let enabled = !self.auto_send();
        self.set_auto_send(enabled)?;
        Ok(enabled)
    }

    pub fn set_always_execute(&self, enabled: bool) -> Result<()> {
        self.write_flag(ALWAYS_EXECUTE_KEY, enabled)?;
        tracing::info!(enabled, "always-execute toggled");
        Ok(())
    }

    fn read_flag(&self, key: &str, default: bool) -> bool {
        match self.storage.get(key) {
            None => default,
            Some(raw) => serde_json::from_str::<bool>(&raw).unwrap_or_else(|e| {
                tracing::warn!(key, "invalid stored preference {raw:?}: {e}");
                default
            }),
        }
    }

    fn write_flag(&self, key: &str, value: bool) -> Result<()> {
        self.storage
            .set(key, serde_json::to_string(&value)?)
            .with_context(|| format!("saving preference {key}"))
    }
}
