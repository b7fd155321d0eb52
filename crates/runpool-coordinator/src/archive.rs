use std::path::PathBuf;

use runpool_core::ident::validate_identifier;
use runpool_core::types::Run;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("run id is not usable as an archive name: {0}")]
    InvalidRunId(String),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable sink for runs after an accepted submission.
///
/// Called outside the commit path: a failure here is logged by the caller and
/// does not undo the acceptance.
pub trait RunArchive: Send + Sync + 'static {
    fn archive(&self, run: &Run) -> Result<(), ArchiveError>;
}

/// Writes `<dir>/<run id>.json`, replacing the previous snapshot of that run.
#[derive(Debug, Clone)]
pub struct FsRunArchive {
    dir: PathBuf,
}

impl FsRunArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run: &Run) -> Result<PathBuf, ArchiveError> {
        validate_identifier("id", &run.id.0)
            .map_err(|_| ArchiveError::InvalidRunId(run.id.0.clone()))?;
        Ok(self.dir.join(format!("{}.json", run.id.0)))
    }
}

impl RunArchive for FsRunArchive {
    fn archive(&self, run: &Run) -> Result<(), ArchiveError> {
        let path = self.path_for(run)?;
        let bytes = serde_json::to_vec_pretty(run)?;
        runpool_store::write_atomic(&path, &bytes)?;
        Ok(())
    }
}
