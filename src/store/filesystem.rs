use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use super::kv::KeyValueStore;

/// Filesystem-backed store: one JSON file per key under a base directory.
pub struct FsStore {
    base_path: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `base_path`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)
            .with_context(|| format!("failed to create store directory {base_path:?}"))?;
        Ok(FsStore { base_path })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FsStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse stored value at {path:?}"))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.key_path(key);
        let temp_path = self.base_path.join(format!(".{key}.json.tmp"));

        // Temp file + rename keeps a single set atomic on POSIX systems.
        let json = serde_json::to_string_pretty(&value)?;
        fs::write(&temp_path, json).with_context(|| format!("failed to write {temp_path:?}"))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("failed to move {temp_path:?} into place"))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("failed to remove {path:?}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn set_and_get() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsStore::open(temp_dir.path())?;

        store.set("alpha", json!({"n": 1}))?;
        assert_eq!(store.get("alpha")?, Some(json!({"n": 1})));
        Ok(())
    }

    #[test]
    fn get_missing_key() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsStore::open(temp_dir.path())?;

        assert_eq!(store.get("nothing")?, None);
        Ok(())
    }

    #[test]
    fn set_overwrites() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsStore::open(temp_dir.path())?;

        store.set("k", json!([1]))?;
        store.set("k", json!([1, 2]))?;
        assert_eq!(store.get("k")?, Some(json!([1, 2])));
        Ok(())
    }

    #[test]
    fn remove_deletes_key() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsStore::open(temp_dir.path())?;

        store.set("k", json!(true))?;
        store.remove("k")?;
        assert_eq!(store.get("k")?, None);

        // Removing again is not an error.
        store.remove("k")?;
        Ok(())
    }
}
