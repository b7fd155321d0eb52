use std::path::Path;

use rand::Rng;
use runpool_core::ident::IdentError;
use runpool_core::types::{Parameters, Run, RunId, StudyId};
use runpool_store::{RecordStore, StoreError, VersionedStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Initial parameter values are drawn from this half-open integer range.
pub const RANDOM_PARAM_RANGE: std::ops::Range<i64> = -10..10;

#[derive(Debug, Error)]
pub enum StudyConfigError {
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid study id: {0}")]
    StudyId(#[from] IdentError),
    #[error("{0} must be > 0")]
    NonPositive(&'static str),
    #[error("non-random run initialisation is not supported")]
    NonRandomUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySettings {
    pub random: bool,
    pub nparams: usize,
    pub nruns: usize,
}

/// Study description, as found in the JSON config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub id: String,
    pub study: StudySettings,
}

impl StudyConfig {
    pub fn load(path: &Path) -> Result<Self, StudyConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, StudyConfigError> {
        let cfg: StudyConfig = serde_json::from_slice(bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), StudyConfigError> {
        StudyId::parse(&self.id)?;
        if self.study.nparams == 0 {
            return Err(StudyConfigError::NonPositive("nparams"));
        }
        if self.study.nruns == 0 {
            return Err(StudyConfigError::NonPositive("nruns"));
        }
        if !self.study.random {
            return Err(StudyConfigError::NonRandomUnsupported);
        }
        Ok(())
    }

    pub fn study_id(&self) -> Result<StudyId, StudyConfigError> {
        Ok(StudyId::parse(&self.id)?)
    }
}

/// Wipes the store and populates it with freshly generated runs.
///
/// Returns run ids in creation order; that order is the assignment order.
pub fn initialize_study<R: Rng>(
    store: &dyn VersionedStore,
    cfg: &StudyConfig,
    rng: &mut R,
) -> Result<Vec<RunId>, StoreError> {
    let parameters: Vec<Parameters> = (0..cfg.study.nruns)
        .map(|_| {
            let values: Vec<f64> = (0..cfg.study.nparams)
                .map(|_| rng.gen_range(RANDOM_PARAM_RANGE) as f64)
                .collect();
            Parameters::new(values)
        })
        .collect();

    store.clear()?;
    let run_ids = seed_runs(store, parameters)?;
    info!(
        target: "runpool_proof",
        event = "study_initialized",
        study_id = %cfg.id,
        nruns = cfg.study.nruns,
        nparams = cfg.study.nparams,
        "study initialized"
    );
    Ok(run_ids)
}

/// Persists one run per parameter vector without clearing the store first.
pub fn seed_runs(
    store: &dyn VersionedStore,
    parameters: Vec<Parameters>,
) -> Result<Vec<RunId>, StoreError> {
    let mut run_ids = Vec::with_capacity(parameters.len());
    for initial in parameters {
        let run = Run::new(RunId::new_random(), initial);
        store.save_validated(&run.id.record_key(), &run)?;
        run_ids.push(run.id);
    }
    Ok(run_ids)
}
