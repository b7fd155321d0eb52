use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ident::{validate_identifier, IdentError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyId(pub String);

/// Opaque version token gating submissions against a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckValue(pub String);

/// Key prefix for run records.
pub const RUN_KEY_PREFIX: &str = "run";
/// Key prefix for participant tracker records.
pub const TRACKER_KEY_PREFIX: &str = "participantid";

impl RunId {
    pub fn new_random() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn record_key(&self) -> String {
        format!("{RUN_KEY_PREFIX}:{}", self.0)
    }
}

impl ParticipantId {
    pub fn parse(value: &str) -> Result<Self, IdentError> {
        validate_identifier("participantId", value)?;
        Ok(ParticipantId(value.to_string()))
    }

    pub fn tracker_key(&self) -> String {
        format!("{TRACKER_KEY_PREFIX}:{}", self.0)
    }
}

impl StudyId {
    pub fn parse(value: &str) -> Result<Self, IdentError> {
        validate_identifier("studyId", value)?;
        Ok(StudyId(value.to_string()))
    }
}

impl CheckValue {
    pub fn generate() -> Self {
        CheckValue(uuid::Uuid::new_v4().to_string())
    }

    /// Generates a token guaranteed to differ from `previous`.
    pub fn regenerate(previous: &CheckValue) -> Self {
        loop {
            let next = Self::generate();
            if &next != previous {
                return next;
            }
        }
    }
}

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_inner!(RunId, ParticipantId, StudyId, CheckValue);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("{0} must be non-empty")]
    Empty(&'static str),
    #[error("parameters declare length {declared} but hold {actual} values")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("initial parameters declare length {initial} but current declare {current}")]
    DeclaredLengthDiffers { initial: usize, current: usize },
    #[error("parameters must be finite")]
    NonFinite,
    #[error("duplicate entry {value:?} in {field}")]
    Duplicate { field: &'static str, value: String },
    #[error("record has the wrong shape: {0}")]
    Shape(String),
    #[error(transparent)]
    Ident(#[from] IdentError),
}

/// Structural validation applied to records crossing a trust boundary
/// (store decode, request bodies).
pub trait Schema {
    fn validate(&self) -> Result<(), RecordError>;
}

/// Ordered numeric vector plus its declared length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub values: Vec<f64>,
    pub length: usize,
}

impl Parameters {
    pub fn new(values: Vec<f64>) -> Self {
        let length = values.len();
        Self { values, length }
    }
}

impl Schema for Parameters {
    fn validate(&self) -> Result<(), RecordError> {
        if self.values.len() != self.length {
            return Err(RecordError::LengthMismatch {
                declared: self.length,
                actual: self.values.len(),
            });
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(RecordError::NonFinite);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub check_value: CheckValue,
    pub initial_parameters: Parameters,
    pub current_parameters: Parameters,
    pub updated_by: Vec<ParticipantId>,
}

impl Run {
    /// Creates a fresh run whose current parameters start as a copy of the initial ones.
    pub fn new(id: RunId, initial: Parameters) -> Self {
        Self {
            id,
            check_value: CheckValue::generate(),
            current_parameters: initial.clone(),
            initial_parameters: initial,
            updated_by: Vec::new(),
        }
    }

    pub fn declared_len(&self) -> usize {
        self.initial_parameters.length
    }

    pub fn is_updated_by(&self, participant: &ParticipantId) -> bool {
        self.updated_by.contains(participant)
    }

    pub fn to_client(&self) -> ClientRun {
        ClientRun {
            id: self.id.clone(),
            check_value: self.check_value.clone(),
            parameters: self.current_parameters.clone(),
        }
    }
}

impl Schema for Run {
    fn validate(&self) -> Result<(), RecordError> {
        if self.id.0.trim().is_empty() {
            return Err(RecordError::Empty("id"));
        }
        if self.check_value.0.trim().is_empty() {
            return Err(RecordError::Empty("checkValue"));
        }
        self.initial_parameters.validate()?;
        self.current_parameters.validate()?;
        if self.initial_parameters.length != self.current_parameters.length {
            return Err(RecordError::DeclaredLengthDiffers {
                initial: self.initial_parameters.length,
                current: self.current_parameters.length,
            });
        }
        ensure_unique("updatedBy", self.updated_by.iter().map(|p| p.0.as_str()))
    }
}

/// Runs a participant has already completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantTracker {
    pub participant_id: ParticipantId,
    pub has_updated_run_ids: Vec<RunId>,
}

impl ParticipantTracker {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            has_updated_run_ids: Vec::new(),
        }
    }

    pub fn has_updated(&self, run_id: &RunId) -> bool {
        self.has_updated_run_ids.contains(run_id)
    }

    /// Returns false if the run was already recorded.
    pub fn record_update(&mut self, run_id: RunId) -> bool {
        if self.has_updated(&run_id) {
            return false;
        }
        self.has_updated_run_ids.push(run_id);
        true
    }
}

impl Schema for ParticipantTracker {
    fn validate(&self) -> Result<(), RecordError> {
        if self.participant_id.0.trim().is_empty() {
            return Err(RecordError::Empty("participantId"));
        }
        ensure_unique(
            "hasUpdatedRunIds",
            self.has_updated_run_ids.iter().map(|r| r.0.as_str()),
        )
    }
}

/// What a participant receives on assignment and sends back on submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRun {
    pub id: RunId,
    pub check_value: CheckValue,
    pub parameters: Parameters,
}

impl Schema for ClientRun {
    fn validate(&self) -> Result<(), RecordError> {
        validate_identifier("id", &self.id.0)?;
        if self.check_value.0.trim().is_empty() {
            return Err(RecordError::Empty("checkValue"));
        }
        self.parameters.validate()
    }
}

fn ensure_unique<'a>(
    field: &'static str,
    values: impl Iterator<Item = &'a str>,
) -> Result<(), RecordError> {
    let mut seen = std::collections::BTreeSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(RecordError::Duplicate {
                field,
                value: value.to_string(),
            });
        }
    }
    Ok(())
}
