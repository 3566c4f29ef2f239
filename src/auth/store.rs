//! Secure token persistence
//!
//! Prefers the OS keyring and falls back to a user-only JSON file. The
//! access/refresh pair is stored as one serialized blob under a single key,
//! so a concurrent read observes either the previous or the new session,
//! never a mix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::auth::SessionTokens;

const SERVICE_NAME: &str = "shopcart";
const SESSION_KEY: &str = "session";
const DEVICE_ID_KEY: &str = "device_id";

/// Storage-layer failure. Callers treat a read failure as "no session" and
/// force re-authentication rather than surfacing it as fatal.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt token store: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("cannot determine config directory")]
    NoConfigDir,
}

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// OS native keyring
    Keyring,
    /// JSON file in the user config directory
    File,
    /// Process-local storage for tests
    Memory,
}

/// Persisted shape of the file and memory backends
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionTokens>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

enum Inner {
    Keyring(Mutex<()>),
    File { path: PathBuf, lock: Mutex<()> },
    Memory(Mutex<StoreData>),
}

/// Persists session tokens and the device identifier
pub struct TokenStore {
    inner: Inner,
}

impl TokenStore {
    /// Create a token store, preferring the OS keyring
    pub fn open() -> Result<Self, StorageError> {
        if Self::keyring_available() {
            debug!("token store using OS keyring");
            Ok(Self {
                inner: Inner::Keyring(Mutex::new(())),
            })
        } else {
            let path = Self::default_file_path()?;
            debug!(path = %path.display(), "token store using file backend");
            Ok(Self::file_backed(path))
        }
    }

    /// Create a store persisted to the given JSON file
    pub fn file_backed(path: PathBuf) -> Self {
        Self {
            inner: Inner::File {
                path,
                lock: Mutex::new(()),
            },
        }
    }

    /// Create a store that lives only in this process
    pub fn in_memory() -> Self {
        Self {
            inner: Inner::Memory(Mutex::new(StoreData::default())),
        }
    }

    /// Get the storage backend type
    pub fn backend(&self) -> StorageBackend {
        match &self.inner {
            Inner::Keyring(_) => StorageBackend::Keyring,
            Inner::File { .. } => StorageBackend::File,
            Inner::Memory(_) => StorageBackend::Memory,
        }
    }

    /// Test if the keyring is available
    fn keyring_available() -> bool {
        keyring::Entry::new(SERVICE_NAME, "test").is_ok()
    }

    fn default_file_path() -> Result<PathBuf, StorageError> {
        let config_dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;

        let app_dir = config_dir.join(SERVICE_NAME);
        fs::create_dir_all(&app_dir)?;

        Ok(app_dir.join("tokens.json"))
    }

    /// Overwrite the stored session with a complete new token set
    pub fn save(&self, tokens: &SessionTokens) -> Result<(), StorageError> {
        match &self.inner {
            Inner::Keyring(lock) => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let blob = serde_json::to_string(tokens)?;
                entry(SESSION_KEY)?.set_password(&blob)?;
                Ok(())
            }
            Inner::File { path, lock } => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let mut data = read_file_data(path).unwrap_or_default();
                data.session = Some(tokens.clone());
                write_file_data(path, &data)
            }
            Inner::Memory(state) => {
                let mut data = state.lock().unwrap_or_else(PoisonError::into_inner);
                data.session = Some(tokens.clone());
                Ok(())
            }
        }
    }

    /// Read the stored session, if any
    pub fn read(&self) -> Result<Option<SessionTokens>, StorageError> {
        match &self.inner {
            Inner::Keyring(lock) => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                match entry(SESSION_KEY)?.get_password() {
                    Ok(blob) => Ok(Some(serde_json::from_str(&blob)?)),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Inner::File { path, lock } => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(read_file_data(path)?.session)
            }
            Inner::Memory(state) => {
                let data = state.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(data.session.clone())
            }
        }
    }

    /// Delete the stored session pair; idempotent. The device identifier is
    /// kept so re-login keeps the same installation identity.
    pub fn clear(&self) -> Result<(), StorageError> {
        match &self.inner {
            Inner::Keyring(lock) => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                match entry(SESSION_KEY)?.delete_password() {
                    Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Inner::File { path, lock } => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let mut data = read_file_data(path).unwrap_or_default();
                data.session = None;
                write_file_data(path, &data)
            }
            Inner::Memory(state) => {
                let mut data = state.lock().unwrap_or_else(PoisonError::into_inner);
                data.session = None;
                Ok(())
            }
        }
    }

    /// Return the persisted device identifier, generating and persisting it
    /// on first use
    pub fn ensure_device_id(&self) -> Result<String, StorageError> {
        match &self.inner {
            Inner::Keyring(lock) => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                match entry(DEVICE_ID_KEY)?.get_password() {
                    Ok(id) => Ok(id),
                    Err(keyring::Error::NoEntry) => {
                        let id = new_device_id();
                        entry(DEVICE_ID_KEY)?.set_password(&id)?;
                        Ok(id)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Inner::File { path, lock } => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let mut data = read_file_data(path)?;
                if let Some(id) = data.device_id {
                    return Ok(id);
                }
                let id = new_device_id();
                data.device_id = Some(id.clone());
                write_file_data(path, &data)?;
                Ok(id)
            }
            Inner::Memory(state) => {
                let mut data = state.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(id) = &data.device_id {
                    return Ok(id.clone());
                }
                let id = new_device_id();
                data.device_id = Some(id.clone());
                Ok(id)
            }
        }
    }
}

fn new_device_id() -> String {
    let id = Uuid::new_v4().to_string();
    debug!(device_id = %id, "generated device identifier");
    id
}

fn entry(key: &str) -> Result<keyring::Entry, StorageError> {
    Ok(keyring::Entry::new(SERVICE_NAME, key)?)
}

fn read_file_data(path: &Path) -> Result<StoreData, StorageError> {
    if !path.exists() {
        return Ok(StoreData::default());
    }

    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_file_data(path: &Path, data: &StoreData) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(data)?;
    fs::write(path, contents)?;

    // Set file permissions to user-only (Unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}
