#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod fs;
pub mod memory;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use runpool_core::types::{RecordError, Schema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Namespace used when a caller does not pick one.
pub const DEFAULT_NAMESPACE: &str = "store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
    #[error("record {key} failed validation: {source}")]
    Validation {
        key: String,
        #[source]
        source: RecordError,
    },
    #[error("record {key} could not be encoded or decoded: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the failure is about record content rather than the backend.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. } | StoreError::InvalidKey(_))
    }
}

/// Byte-level key/value persistence under a single namespace.
///
/// - `save` replaces the whole value for a key atomically; nothing spans keys.
/// - `load` returns `None` for a key that was never written (or was cleared).
/// - `clear` drops every key in the namespace and must not race live traffic.
pub trait VersionedStore: Send + Sync + 'static {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Typed access on top of [`VersionedStore`]. Records are stored as JSON.
pub trait RecordStore: VersionedStore {
    fn save_record<T: Serialize>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.save(key, &bytes)
    }

    /// A record that decodes into the wrong shape or breaks `T`'s schema is a
    /// `Validation` error, never a partial value.
    fn load_validated<T: DeserializeOwned + Schema>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.load(key)? else {
            return Ok(None);
        };
        let record: T = serde_json::from_slice(&bytes).map_err(|err| {
            if err.is_data() {
                StoreError::Validation {
                    key: key.to_string(),
                    source: RecordError::Shape(err.to_string()),
                }
            } else {
                StoreError::Codec {
                    key: key.to_string(),
                    source: err,
                }
            }
        })?;
        record
            .validate()
            .map_err(|source| StoreError::Validation {
                key: key.to_string(),
                source,
            })?;
        Ok(Some(record))
    }

    /// Validates before writing; an invalid record leaves the key untouched.
    fn save_validated<T: Serialize + Schema>(
        &self,
        key: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        record
            .validate()
            .map_err(|source| StoreError::Validation {
                key: key.to_string(),
                source,
            })?;
        self.save_record(key, record)
    }
}

impl<S: VersionedStore + ?Sized> RecordStore for S {}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.trim().is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.contains("..")
        || key.chars().any(|c| c.is_whitespace() || c.is_control());
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Writes `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path must have parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad filename"))?;
    static TMP_SEQ: AtomicU64 = AtomicU64::new(0);
    let tmp = parent.join(format!(
        ".{file_name}.tmp.{}.{}.{}",
        std::process::id(),
        runpool_observe::time::unix_time_ms(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    std::fs::rename(tmp, path)?;
    Ok(())
}
