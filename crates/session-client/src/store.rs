//! Credential persistence abstraction.
//!
//! The client only ever reads the bearer token on the request path and writes it
//! once per successful refresh. Sign-in (outside this crate) seeds both keys;
//! session teardown erases them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;

/// The two values the client keeps in a credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKey {
    /// Bearer token attached to outbound requests.
    AccessToken,
    /// Opaque identifier sent to the token endpoint to obtain a new bearer.
    RefreshId,
}

impl CredentialKey {
    /// Stable name used as the storage key.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshId => "refresh_id",
        }
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage for the current session credentials.
///
/// Implementations must answer `get` without network I/O: it runs on every
/// outbound request.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a credential value.
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError>;

    /// Write a credential value, replacing any previous one.
    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError>;

    /// Erase a credential value. Removing a missing key is not an error.
    async fn remove(&self, key: CredentialKey) -> Result<(), StoreError>;

    /// Erase every credential the client uses.
    async fn clear(&self) -> Result<(), StoreError> {
        self.remove(CredentialKey::AccessToken).await?;
        self.remove(CredentialKey::RefreshId).await
    }
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a signed-in session.
    pub fn with_session(access_token: impl Into<String>, refresh_id: impl Into<String>) -> Self {
        let mut values = HashMap::new();
        values.insert(CredentialKey::AccessToken, access_token.into());
        values.insert(CredentialKey::RefreshId, refresh_id.into());
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(&key).cloned())
    }

    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: CredentialKey) -> Result<(), StoreError> {
        self.values.write().remove(&key);
        Ok(())
    }
}

/// Credential store persisted as a small JSON object on disk.
///
/// Reads are served from memory; every write rewrites the file.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    values: RwLock<HashMap<CredentialKey, String>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCredentialStore {
    /// Open (or lazily create) a store at `path`. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = values.len(), "Opened credential file");

        Ok(Self {
            path,
            values: RwLock::new(values),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the backing file from the in-memory map. Callers hold `write_lock`.
    async fn write_file(&self) -> Result<(), StoreError> {
        let bytes = {
            let values = self.values.read();
            serde_json::to_vec_pretty(&*values)?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling file first so a crash never leaves a truncated store.
        let tmp = self.path.with_extension("tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Put back the value a failed write replaced.
    fn restore(&self, key: CredentialKey, previous: Option<String>) {
        let mut values = self.values.write();
        match previous {
            Some(value) => values.insert(key, value),
            None => values.remove(&key),
        };
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(&key).cloned())
    }

    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.values.write().insert(key, value.to_string());
        if let Err(e) = self.write_file().await {
            self.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: CredentialKey) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(previous) = self.values.write().remove(&key) else {
            return Ok(());
        };
        if let Err(e) = self.write_file().await {
            self.restore(key, Some(previous));
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryCredentialStore::with_session("t1", "user-1");

        assert_eq!(
            store.get(CredentialKey::AccessToken).await.unwrap(),
            Some("t1".to_string())
        );

        store.set(CredentialKey::AccessToken, "t2").await.unwrap();
        assert_eq!(
            store.get(CredentialKey::AccessToken).await.unwrap(),
            Some("t2".to_string())
        );

        store.clear().await.unwrap();
        assert!(store.get(CredentialKey::AccessToken).await.unwrap().is_none());
        assert!(store.get(CredentialKey::RefreshId).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        assert!(store.get(CredentialKey::RefreshId).await.unwrap().is_none());

        store.set(CredentialKey::AccessToken, "abc").await.unwrap();
        store.set(CredentialKey::RefreshId, "user-7").await.unwrap();
        drop(store);

        let reopened = FileCredentialStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(CredentialKey::AccessToken).await.unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(
            reopened.get(CredentialKey::RefreshId).await.unwrap(),
            Some("user-7".to_string())
        );

        reopened.clear().await.unwrap();
        let cleared = FileCredentialStore::open(&path).await.unwrap();
        assert!(cleared.get(CredentialKey::AccessToken).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.set(CredentialKey::AccessToken, "secret").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.set(CredentialKey::RefreshId, "user-1").await.unwrap();

        // A directory in place of the file makes the final rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.set(CredentialKey::AccessToken, "t1").await.is_err());
        assert!(store.get(CredentialKey::AccessToken).await.unwrap().is_none());

        assert!(store.remove(CredentialKey::RefreshId).await.is_err());
        assert_eq!(
            store.get(CredentialKey::RefreshId).await.unwrap(),
            Some("user-1".to_string())
        );

        std::fs::remove_dir(&path).unwrap();
        store.set(CredentialKey::AccessToken, "t1").await.unwrap();
        assert_eq!(
            store.get(CredentialKey::AccessToken).await.unwrap(),
            Some("t1".to_string())
        );
    }
}
