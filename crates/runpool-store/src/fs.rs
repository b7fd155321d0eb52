use std::path::PathBuf;

use crate::{validate_key, write_atomic, StoreError, VersionedStore, DEFAULT_NAMESPACE};

/// Directory used for keys that carry no `<prefix>:` part.
const BARE_KEY_DIR: &str = "_";

/// File-backed store: `<root>/<namespace>/<prefix>/<rest>` per key.
///
/// `run:abc` lands at `<root>/<namespace>/run/abc`. Writes go through a temp
/// file and a rename, so a reader sees either the old or the new record.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    namespace: String,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_namespace(root, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
        }
    }

    fn namespace_dir(&self) -> Result<PathBuf, StoreError> {
        validate_key(&self.namespace)?;
        Ok(self.root.join(&self.namespace))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        let dir = self.namespace_dir()?;
        let path = match key.split_once(':') {
            Some((prefix, rest)) if is_path_segment(prefix) && is_path_segment(rest) => {
                dir.join(prefix).join(rest)
            }
            Some(_) => return Err(StoreError::InvalidKey(key.to_string())),
            None if is_path_segment(key) => dir.join(BARE_KEY_DIR).join(key),
            None => return Err(StoreError::InvalidKey(key.to_string())),
        };
        Ok(path)
    }
}

// `.` would resolve to the directory itself.
fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "."
}

impl VersionedStore for FsStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.key_path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        write_atomic(&path, bytes)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let dir = self.namespace_dir()?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        tracing::info!(
            target: "runpool_proof",
            event = "store_cleared",
            backend = "fs",
            namespace = %self.namespace,
            dir = %dir.display(),
            "cleared store"
        );
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.namespace_dir()?;
        let prefixes = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut out = Vec::new();
        for prefix in prefixes {
            let prefix = prefix?;
            if !prefix.file_type()?.is_dir() {
                continue;
            }
            let prefix_name = prefix.file_name().to_string_lossy().into_owned();
            for entry in std::fs::read_dir(prefix.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                // in-flight temp files from write_atomic
                if name.starts_with('.') {
                    continue;
                }
                if prefix_name == BARE_KEY_DIR {
                    out.push(name);
                } else {
                    out.push(format!("{prefix_name}:{name}"));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
