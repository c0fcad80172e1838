//! Persistent store (spec.md §3, §4.8, §6).
//!
//! Ported from `circuitkey/storage.py`'s `Bucket`: one JSON file per named
//! bucket under a data directory, loaded and saved as a whole map, plus a
//! namespace-wide `reset()`. No schema beyond what the caller stores is
//! enforced here — that's the PIN protocol's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read bucket {bucket}: {source}")]
    Read {
        bucket: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write bucket {bucket}: {source}")]
    Write {
        bucket: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bucket {bucket} contains invalid JSON: {source}")]
    Parse {
        bucket: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Bucket = HashMap<String, Value>;

pub trait Store: Send + Sync {
    fn load(&self, bucket: &str) -> Result<Bucket, StoreError>;
    fn save(&self, bucket: &str, data: &Bucket) -> Result<(), StoreError>;
    fn reset(&self) -> Result<(), StoreError>;
}

/// JSON-file-backed store rooted at a data directory, created on first use
/// exactly as `circuitkey/storage.py`'s `Bucket.__init__` creates `data/`.
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Locate the platform-appropriate application data directory via
    /// `directories::ProjectDirs`, falling back to `./data` if the
    /// platform has no well-known data directory (matching the teacher's
    /// `directories` dependency, used there for its config/data dir too).
    pub fn for_application() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "ctap-authenticator")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"));
        Self::new(data_dir)
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.data_dir.join(format!("{bucket}.json"))
    }
}

impl Store for FileStore {
    fn load(&self, bucket: &str) -> Result<Bucket, StoreError> {
        let path = self.bucket_path(bucket);

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Bucket::new()),
            Err(e) => {
                return Err(StoreError::Read {
                    bucket: bucket.to_string(),
                    source: e,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Bucket::new());
        }

        serde_json::from_str(&contents).map_err(|e| StoreError::Parse {
            bucket: bucket.to_string(),
            source: e,
        })
    }

    fn save(&self, bucket: &str, data: &Bucket) -> Result<(), StoreError> {
        create_dir(&self.data_dir, bucket)?;

        let path = self.bucket_path(bucket);
        let serialized = serde_json::to_string(data).map_err(|e| StoreError::Parse {
            bucket: bucket.to_string(),
            source: e,
        })?;

        std::fs::write(&path, serialized).map_err(|e| StoreError::Write {
            bucket: bucket.to_string(),
            source: e,
        })
    }

    fn reset(&self) -> Result<(), StoreError> {
        match std::fs::remove_dir_all(&self.data_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write {
                bucket: "<namespace>".to_string(),
                source: e,
            }),
        }
    }
}

fn create_dir(dir: &Path, bucket: &str) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir).map_err(|e| StoreError::Write {
        bucket: bucket.to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (FileStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        (store, dir)
    }

    #[test]
    fn load_missing_bucket_yields_empty_map() {
        let (store, _dir) = temp_store();
        let bucket = store.load("pin").unwrap();
        assert!(bucket.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (store, _dir) = temp_store();
        let mut data = Bucket::new();
        data.insert("retry_count".to_string(), json!(8));

        store.save("pin", &data).unwrap();
        let loaded = store.load("pin").unwrap();

        assert_eq!(loaded.get("retry_count"), Some(&json!(8)));
    }

    #[test]
    fn reset_removes_entire_namespace() {
        let (store, _dir) = temp_store();
        let mut data = Bucket::new();
        data.insert("retry_count".to_string(), json!(8));
        store.save("pin", &data).unwrap();

        store.reset().unwrap();

        let loaded = store.load("pin").unwrap();
        assert!(loaded.is_empty());
    }
}
