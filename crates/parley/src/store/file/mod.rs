//! File-based credential storage.
//!
//! Credentials live in `<dir>/creds.json`. Writes use atomic operations
//! (temp file + rename) so a crash never leaves a half-written blob behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::{CredentialError, CredentialResult};
use super::{CredentialStore, Credentials};

const CREDENTIALS_FILE: &str = "creds.json";

/// Stores credentials as JSON under a session directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> CredentialResult<Option<Credentials>> {
        let path = self.credentials_path();
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredentialError::file_io(&path, e)),
        };

        let value = serde_json::from_slice(&contents)
            .map_err(|e| CredentialError::deserialize(&path, e))?;
        Ok(Some(Credentials(value)))
    }

    async fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CredentialError::file_io(&self.dir, e))?;

        let data = serde_json::to_vec_pretty(credentials).map_err(CredentialError::Serialize)?;
        atomic_write_file(&self.credentials_path(), &data).await
    }

    async fn clear(&self) -> CredentialResult<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(dir = %self.dir.display(), "Session directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CredentialError::file_io(&self.dir, e)),
        }
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CredentialError::file_io(&self.dir, e))
    }
}

/// Write data to a temp file, fsync it, then atomically rename to the final path.
///
/// The temp file name is generated internally using a ULID to avoid collisions
/// from concurrent writers targeting the same final path.
async fn atomic_write_file(final_path: &Path, data: &[u8]) -> CredentialResult<()> {
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = final_path.with_file_name(format!("{}.{}.tmp", file_name, ulid::Ulid::new()));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| CredentialError::file_io(&temp_path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| CredentialError::file_io(&temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| CredentialError::file_io(&temp_path, e))?;
    fs::rename(&temp_path, final_path)
        .await
        .map_err(|e| CredentialError::file_io(final_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path().join("session"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path().join("session"));
        let creds = Credentials(json!({"me": {"id": "51987654321"}, "noise_key": "abc"}));

        store.save(&creds).await.unwrap();
        assert!(tmp.path().join("session/creds.json").exists());
        assert_eq!(store.load().await.unwrap(), Some(creds));
    }

    #[tokio::test]
    async fn save_overwrites_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());

        store.save(&Credentials(json!({"v": 1}))).await.unwrap();
        store.save(&Credentials(json!({"v": 2}))).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.0["v"], 2);

        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["creds.json".to_string()]);
    }

    #[tokio::test]
    async fn clear_removes_credentials_and_keeps_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("session");
        let store = FileCredentialStore::new(&dir);
        store.save(&Credentials(json!({"v": 1}))).await.unwrap();
        std::fs::write(dir.join("app-state-sync-key-1.json"), "{}").unwrap();

        store.clear().await.unwrap();
        assert!(dir.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        assert!(store.load().await.unwrap().is_none());

        // Idempotent
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("creds.json"), "{not json").unwrap();
        let store = FileCredentialStore::new(tmp.path());

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, CredentialError::Deserialize { .. }));
    }
}
