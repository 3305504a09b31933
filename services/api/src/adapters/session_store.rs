//! services/api/src/adapters/session_store.rs
//!
//! File-backed `SessionStore`: one JSON file per client key.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use production_core::ports::{PortError, PortResult, SessionStore};

pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Creates the directory if it does not exist.
    pub async fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn slot_path(&self, client_key: &str) -> PortResult<PathBuf> {
        let safe: String = client_key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if safe.is_empty() {
            return Err(PortError::Unexpected("Empty client key".to_string()));
        }
        Ok(self.dir.join(format!("{}.json", safe)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn read(&self, client_key: &str) -> PortResult<Option<String>> {
        match tokio::fs::read_to_string(self.slot_path(client_key)?).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }

    async fn write(&self, client_key: &str, contents: &str) -> PortResult<()> {
        let path = self.slot_path(client_key)?;
        let dir = self.dir.clone();
        let contents = contents.to_owned();
        // Each write gets its own temp file, renamed over the slot.
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(contents.as_bytes())?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .map_err(|e| PortError::Unexpected(e.to_string()))
    }

    async fn remove(&self, client_key: &str) -> PortResult<()> {
        match tokio::fs::remove_file(self.slot_path(client_key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slot_survives_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        store.write("client-1", "{\"job_id\":\"job-1\"}").await.unwrap();

        let reopened = FileSessionStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.read("client-1").await.unwrap().as_deref(),
            Some("{\"job_id\":\"job-1\"}")
        );
    }

    #[tokio::test]
    async fn missing_slot_reads_as_none_and_removes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        assert_eq!(store.read("nobody").await.unwrap(), None);
        store.remove("nobody").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_slot_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let (a, b) = tokio::join!(
            store.write("client-1", "{\"job_id\":\"job-1\"}"),
            store.write("client-1", "{\"job_id\":\"job-2\"}"),
        );
        a.unwrap();
        b.unwrap();

        let stored = store.read("client-1").await.unwrap().unwrap();
        assert!(stored == "{\"job_id\":\"job-1\"}" || stored == "{\"job_id\":\"job-2\"}");
        // No temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn path_characters_are_stripped_from_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        store.write("../escape", "x").await.unwrap();
        assert!(dir.path().join("escape.json").exists());
        assert!(store.write("../", "x").await.is_err());
    }
}
