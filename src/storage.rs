//! Local cache adapters for the Adapty SDK

use std::collections::HashMap;
#[cfg(feature = "native-storage")]
use std::path::Path;
use std::sync::RwLock;

use crate::error::{AdaptyError, Result};

/// Storage keys
pub mod keys {
    pub const PROFILE: &str = concat!("adapty:", "profile");
    pub const INSTALLATION: &str = concat!("adapty:", "installation");
    pub const PURCHASER_INFO: &str = concat!("adapty:", "purchaser_info");
    pub const PROFILE_SEED: &str = concat!("adapty:", "profile_seed");
    pub const INSTALLATION_META_ID: &str = concat!("adapty:", "installation_meta_id");

    /// Every key owned by the SDK, removed together on logout.
    pub const ALL: &[&str] = &[
        PROFILE,
        INSTALLATION,
        PURCHASER_INFO,
        PROFILE_SEED,
        INSTALLATION_META_ID,
    ];
}

/// Durable key-value blob store backing the identity store.
pub trait LocalCache: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &str) -> Option<String>;

    /// Set a value by key
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value by key
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory cache, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.data.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| AdaptyError::storage("memory storage lock poisoned"))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| AdaptyError::storage("memory storage lock poisoned"))?;
        data.remove(key);
        Ok(())
    }
}

/// File-based cache
///
/// Stores SDK state in `adapty.json` within the specified directory.
#[cfg(feature = "native-storage")]
pub struct FileStorage {
    path: std::path::PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

#[cfg(feature = "native-storage")]
impl FileStorage {
    /// Create a new file storage in the given directory.
    ///
    /// The directory must exist and be writable. Returns `None` if the
    /// directory doesn't exist or the existing file can't be read.
    pub fn new(storage_dir: &Path) -> Option<Self> {
        if !storage_dir.is_dir() {
            return None;
        }

        let path = storage_dir.join("adapty.json");

        let cache = if path.exists() {
            let contents = std::fs::read_to_string(&path).ok()?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable cache file {}: {}", path.display(), e);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        Some(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    fn save(&self) -> Result<()> {
        let contents = {
            let cache = self
                .cache
                .read()
                .map_err(|_| AdaptyError::storage("file storage lock poisoned"))?;
            serde_json::to_string_pretty(&*cache)?
        };
        std::fs::write(&self.path, contents)
            .map_err(|e| AdaptyError::storage(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(feature = "native-storage")]
impl LocalCache for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key.to_string(), value.to_string());
        }
        self.save()
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(key);
        }
        self.save()
    }
}

#[cfg(feature = "native-storage")]
impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .finish()
    }
}
