//! Plain key-value tiers: the on-disk fallback store and an in-memory store.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::StorageTier;

fn check_component(value: &str) -> Result<()> {
    if value.is_empty()
        || value.contains('/')
        || value.contains('\\')
        || value.contains("..")
    {
        return Err(Error::InvalidInput(format!(
            "invalid store or id component: {value:?}"
        )));
    }
    Ok(())
}

/// Fallback tier storing one JSON file per entry under `root/<store>/<id>.json`.
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Create a file-backed store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, store: &str, id: &str) -> Result<PathBuf> {
        check_component(store)?;
        check_component(id)?;
        Ok(self.root.join(store).join(format!("{id}.json")))
    }
}

#[async_trait]
impl StorageTier for FileKvStore {
    fn tier_name(&self) -> &'static str {
        "file-kv"
    }

    async fn write(&self, store: &str, id: &str, payload: String) -> Result<()> {
        let path = self.entry_path(store, id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write to a sibling temp file then rename, so readers never observe
        // a half-written entry.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn read(&self, store: &str, id: &str) -> Result<Option<String>> {
        let path = self.entry_path(store, id)?;
        match std::fs::read_to_string(&path) {
            Ok(payload) => Ok(Some(payload)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove(&self, store: &str, id: &str) -> Result<()> {
        let path = self.entry_path(store, id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn keys(&self, store: &str) -> Result<Vec<String>> {
        check_component(store)?;
        let dir = self.root.join(store);
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(error) => return Err(error.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                out.push(id.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    async fn clear(&self, store: &str) -> Result<()> {
        check_component(store)?;
        let dir = self.root.join(store);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// In-memory tier used by tests and as an optional primary for ephemeral
/// deployments.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl MemoryKvStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageTier for MemoryKvStore {
    fn tier_name(&self) -> &'static str {
        "memory-kv"
    }

    async fn write(&self, store: &str, id: &str, payload: String) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert((store.to_string(), id.to_string()), payload);
        Ok(())
    }

    async fn read(&self, store: &str, id: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(store.to_string(), id.to_string())).cloned())
    }

    async fn remove(&self, store: &str, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(&(store.to_string(), id.to_string()));
        Ok(())
    }

    async fn keys(&self, store: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut out: Vec<String> = entries
            .keys()
            .filter(|(entry_store, _)| entry_store == store)
            .map(|(_, id)| id.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    async fn clear(&self, store: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|(entry_store, _), _| entry_store != store);
        Ok(())
    }
}
