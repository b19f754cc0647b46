//! File-based repository implementations
//!
//! Outcomes are stored as a pretty-printed JSON array. Writes go to a
//! sibling temp file first and are renamed into place.

use super::traits::OutcomeRepository;
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::upload::UploadOutcome;
use std::fs;
use std::path::{Path, PathBuf};

/// JSON file repository for upload outcomes
pub struct FileOutcomeRepository {
    path: PathBuf,
}

impl FileOutcomeRepository {
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
            .unwrap_or_else(|| "outcomes.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl OutcomeRepository for FileOutcomeRepository {
    fn save_outcomes(&self, outcomes: &[UploadOutcome]) -> ScreenlogResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ScreenlogError::StorageSaveFailed(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let json = serde_json::to_vec_pretty(outcomes)?;
        let temp = self.temp_path();
        fs::write(&temp, json).map_err(|e| {
            ScreenlogError::StorageSaveFailed(format!("cannot write {}: {}", temp.display(), e))
        })?;
        fs::rename(&temp, &self.path).map_err(|e| {
            ScreenlogError::StorageSaveFailed(format!(
                "cannot replace {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn load_outcomes(&self) -> ScreenlogResult<Vec<UploadOutcome>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path).map_err(|e| {
            ScreenlogError::StorageLoadFailed(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ScreenlogError::StorageLoadFailed(format!(
                "corrupt outcome log {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn clear(&self) -> ScreenlogResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScreenlogError::StorageSaveFailed(format!(
                "cannot remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadStatus;
    use tempfile::TempDir;

    fn outcome(index: u64) -> UploadOutcome {
        let mut outcome = UploadOutcome::sample(index);
        outcome.status = UploadStatus::Uploaded;
        outcome.remote_file_id = Some(format!("file-{}", index));
        outcome
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let repo = FileOutcomeRepository::new(dir.path().join("outcomes.json"));

        assert!(repo.load_outcomes().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_and_clear() {
        let dir = TempDir::new().unwrap();
        let repo = FileOutcomeRepository::new(dir.path().join("nested/outcomes.json"));

        repo.save_outcomes(&[outcome(0), outcome(1)]).unwrap();
        let loaded = repo.load_outcomes().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].remote_file_id.as_deref(), Some("file-1"));
        assert!(!repo.temp_path().exists());

        repo.clear().unwrap();
        assert_eq!(repo.count_outcomes().unwrap(), 0);
        repo.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outcomes.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileOutcomeRepository::new(path).load_outcomes().unwrap_err();
        assert!(matches!(err, ScreenlogError::StorageLoadFailed(_)));
    }
}
