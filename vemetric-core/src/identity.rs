//! Session-scoped context and user identity
//!
//! The context id correlates every event from one browsing session. It is
//! generated lazily and kept in session storage, so it survives navigation
//! but not the end of the session. The user identifier and display name
//! live in the same storage.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const CONTEXT_ID_KEY: &str = "_vmCtx";
const IDENTIFIER_KEY: &str = "_vmId";
const DISPLAY_NAME_KEY: &str = "_vmDn";

/// Key/value storage scoped to one browsing session.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Session storage that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("session storage lock poisoned".to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("session storage lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Session storage persisted to a JSON file.
///
/// The session lasts until the file is deleted, which lets separate
/// processes share one context id.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Remove the storage file, ending the session.
    pub fn end_session(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("session storage lock poisoned".to_string()))?;
        f(&mut entries);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&*entries)?)?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Context id and user identity on top of [`SessionStorage`]
#[derive(Clone)]
pub struct IdentityStore {
    storage: Arc<dyn SessionStorage>,
}

impl IdentityStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    /// Read the context id, generating and storing one on first use.
    pub fn get_or_create_context_id(&self) -> Result<String> {
        if let Some(id) = self.storage.get(CONTEXT_ID_KEY) {
            return Ok(id);
        }

        let id = generate_context_id();
        self.storage.set(CONTEXT_ID_KEY, &id)?;
        Ok(id)
    }

    pub fn user_identifier(&self) -> Option<String> {
        self.storage.get(IDENTIFIER_KEY)
    }

    pub fn user_display_name(&self) -> Option<String> {
        self.storage.get(DISPLAY_NAME_KEY)
    }

    /// Store the user. A missing display name clears any previous one.
    pub fn set_user(&self, identifier: &str, display_name: Option<&str>) -> Result<()> {
        self.storage.set(IDENTIFIER_KEY, identifier)?;
        match display_name {
            Some(name) => self.storage.set(DISPLAY_NAME_KEY, name),
            None => self.storage.remove(DISPLAY_NAME_KEY),
        }
    }

    pub fn clear_user(&self) -> Result<()> {
        self.storage.remove(IDENTIFIER_KEY)?;
        self.storage.remove(DISPLAY_NAME_KEY)
    }
}

/// Digits of a random fraction, e.g. `0.8140263` becomes `8140263`.
fn generate_context_id() -> String {
    loop {
        let fraction = rand::random::<f64>().to_string();
        if let Some(digits) = fraction.strip_prefix("0.") {
            return digits.to_string();
        }
    }
}
