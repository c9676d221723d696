//! Persistent key-value storage for client state.
//!
//! Only three keys belong to the sync core: the auth token and the two
//! "remember me" fields. `FileStore` keeps them as JSON files in the
//! platform-appropriate config directory:
//!   - Linux: `~/.config/chatsync/`
//!   - macOS: `~/Library/Application Support/chatsync/`
//!   - Windows: `%APPDATA%\chatsync\`

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

pub const TOKEN_KEY: &str = "auth_token";
pub const REMEMBER_ME_KEY: &str = "remember_me";
pub const REMEMBERED_LOGIN_KEY: &str = "remembered_login";

/// Durable string storage.
pub trait KeyValueStore: Send + Sync {
    /// Returns `true` if the value was written.
    fn save_raw(&self, key: &str, value: &str) -> bool;
    fn load_raw(&self, key: &str) -> Option<String>;
    fn remove(&self, key: &str);
}

/// Save a value to persistent storage.
///
/// Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.save_raw(key, &json),
        Err(_) => false,
    }
}

/// Load a value from persistent storage.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = store.load_raw(key)?;
    serde_json::from_str(&json).ok()
}

// =========================================
// Credentials
// =========================================

pub fn load_token(store: &dyn KeyValueStore) -> Option<String> {
    load::<String>(store, TOKEN_KEY).filter(|t| !t.trim().is_empty())
}

pub fn save_token(store: &dyn KeyValueStore, token: &str) -> bool {
    save(store, TOKEN_KEY, &token)
}

pub fn clear_token(store: &dyn KeyValueStore) {
    store.remove(TOKEN_KEY);
}

/// The "remember me" pair shown on the login form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RememberMe {
    pub enabled: bool,
    pub login: Option<String>,
}

pub fn load_remember_me(store: &dyn KeyValueStore) -> RememberMe {
    RememberMe {
        enabled: load::<bool>(store, REMEMBER_ME_KEY).unwrap_or(false),
        login: load::<String>(store, REMEMBERED_LOGIN_KEY),
    }
}

/// Persist the pair. Disabling it forgets the remembered login.
pub fn save_remember_me(store: &dyn KeyValueStore, remember: &RememberMe) {
    save(store, REMEMBER_ME_KEY, &remember.enabled);
    match (&remember.login, remember.enabled) {
        (Some(login), true) => {
            save(store, REMEMBERED_LOGIN_KEY, login);
        }
        _ => store.remove(REMEMBERED_LOGIN_KEY),
    }
}

// =========================================
// Desktop (file) implementation
// =========================================

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: Option<PathBuf>,
}

impl FileStore {
    /// Store under `<config dir>/chatsync`.
    pub fn platform() -> Self {
        Self {
            dir: dirs::config_dir().map(|d| d.join("chatsync")),
        }
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn get_config_dir(&self) -> Option<PathBuf> {
        let app_dir = self.dir.clone()?;

        // Ensure the directory exists
        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir).ok()?;
        }

        Some(app_dir)
    }

    fn get_file_path(&self, key: &str) -> Option<PathBuf> {
        let config_dir = self.get_config_dir()?;
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Some(config_dir.join(format!("{}.json", safe_key)))
    }
}

impl KeyValueStore for FileStore {
    fn save_raw(&self, key: &str, value: &str) -> bool {
        let Some(path) = self.get_file_path(key) else {
            return false;
        };
        match std::fs::write(&path, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist client state");
                false
            }
        }
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        let path = self.get_file_path(key)?;
        std::fs::read_to_string(path).ok()
    }

    fn remove(&self, key: &str) {
        if let Some(path) = self.get_file_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }
}

// =========================================
// In-memory implementation
// =========================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn save_raw(&self, key: &str, value: &str) -> bool {
        self.values.lock().insert(key.to_string(), value.to_string());
        true
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}
