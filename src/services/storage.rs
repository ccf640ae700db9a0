use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// The four durable string keys a session is persisted under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Serialized `UserProfile` JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<String>,
}

/// Durable backing store for the session. `save` replaces the whole record, so
/// a reader never observes half of a write.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<StoredSession, SessionError>;
    fn save(&self, record: &StoredSession) -> Result<(), SessionError>;
    fn wipe(&self) -> Result<(), SessionError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    record: Mutex<StoredSession>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: StoredSession) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    pub fn snapshot(&self) -> StoredSession {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredSession> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<StoredSession, SessionError> {
        Ok(self.lock().clone())
    }

    fn save(&self, record: &StoredSession) -> Result<(), SessionError> {
        *self.lock() = record.clone();
        Ok(())
    }

    fn wipe(&self) -> Result<(), SessionError> {
        *self.lock() = StoredSession::default();
        Ok(())
    }
}

/// Session persisted as one JSON file. Writes go to a sibling temp file that
/// is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<StoredSession, SessionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredSession::default())
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(StoredSession::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, record: &StoredSession) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn wipe(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
