use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{io, paths};

/// Persisted record of the most recently entered provisioning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
}

/// Stage file under the engine state directory.
#[derive(Debug, Clone)]
pub struct StageStore {
    path: PathBuf,
}

impl StageStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: paths::stage_file(state_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded stage, or `None` when no stage was ever set.
    pub fn current(&self) -> Result<Option<StageRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_yaml::from_str(&data)?))
    }

    /// Record `id` as the current stage.
    pub fn set(&self, id: &str) -> Result<StageRecord> {
        paths::validate_stage_id(id)?;
        let record = StageRecord {
            id: id.to_string(),
            started_at: Utc::now(),
        };
        let data = serde_yaml::to_string(&record)?;
        io::atomic_write(&self.path, data.as_bytes())?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_means_no_stage() {
        let dir = TempDir::new().unwrap();
        assert_eq!(StageStore::new(dir.path()).current().unwrap(), None);
    }

    #[test]
    fn set_then_read_back() {
        let dir = TempDir::new().unwrap();
        let store = StageStore::new(dir.path());
        let written = store.set("20").unwrap();
        let read = store.current().unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.id, "20");
    }

    #[test]
    fn set_overwrites_previous_stage() {
        let dir = TempDir::new().unwrap();
        let store = StageStore::new(dir.path());
        store.set("10").unwrap();
        store.set("post-sysprep").unwrap();
        assert_eq!(store.current().unwrap().unwrap().id, "post-sysprep");
    }

    #[test]
    fn set_rejects_bad_id() {
        let dir = TempDir::new().unwrap();
        assert!(StageStore::new(dir.path()).set("../x").is_err());
        assert!(!paths::stage_file(dir.path()).exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::stage_file(dir.path()), "id: [unclosed").unwrap();
        assert!(StageStore::new(dir.path()).current().is_err());
    }
}
