//! Assignment and submission protocol over runs.
//!
//! A run is `Available` until an assignment locks it and stamps a fresh
//! check value; it becomes `Available` again when a submission carrying that
//! check value is accepted, or when the lock expires. The check value is the
//! only admission gate for a submission.

use std::sync::Arc;
use std::time::Duration;

use runpool_core::types::{
    CheckValue, ClientRun, ParticipantId, Run, RunId, Schema, StudyId,
};
use runpool_observe::metrics::{Counter, DurationAgg, ScopedTimer};
use runpool_store::{RecordStore, StoreError, VersionedStore};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::archive::RunArchive;
use crate::lock::LockManager;
use crate::tracker::TrackerStore;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        if err.is_validation() {
            CoordinatorError::Validation(err.to_string())
        } else {
            CoordinatorError::Store(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub study_id: StudyId,
    /// Full passes over the candidate list before reporting `Unavailable`.
    pub max_attempts: u32,
    /// Upper bound on the wait between passes; a lock release ends it early.
    pub retry_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    Assigned(ClientRun),
    /// Every candidate stayed locked for all attempts; worth asking again later.
    Unavailable,
    /// The participant has already completed every run.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    StaleCheckValue,
    AlreadyUpdated,
    LengthMismatch,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::StaleCheckValue => "stale_check_value",
            RejectReason::AlreadyUpdated => "already_updated",
            RejectReason::LengthMismatch => "length_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    NotApplied(RejectReason),
}

#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub assign_total: Counter,
    pub assigned_total: Counter,
    pub exhausted_total: Counter,
    pub unavailable_total: Counter,
    pub submit_total: Counter,
    pub accepted_total: Counter,
    pub not_applied_total: Counter,
    pub archive_failed_total: Counter,
    pub assign_latency: DurationAgg,
}

pub struct RunCoordinator {
    cfg: CoordinatorConfig,
    store: Arc<dyn VersionedStore>,
    trackers: TrackerStore,
    locks: LockManager,
    archive: Option<Arc<dyn RunArchive>>,
    run_ids: Vec<RunId>,
    metrics: CoordinatorMetrics,
    // Serializes every read-modify-write of run and tracker records. Async so
    // queued requests park instead of blocking a runtime worker.
    commit: Mutex<()>,
}

impl RunCoordinator {
    /// `run_ids` must already be persisted; their order is the assignment order.
    pub fn new(
        cfg: CoordinatorConfig,
        store: Arc<dyn VersionedStore>,
        locks: LockManager,
        run_ids: Vec<RunId>,
    ) -> Self {
        Self {
            cfg,
            trackers: TrackerStore::new(store.clone()),
            store,
            locks,
            archive: None,
            run_ids,
            metrics: CoordinatorMetrics::default(),
            commit: Mutex::new(()),
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn RunArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn study_id(&self) -> &StudyId {
        &self.cfg.study_id
    }

    pub fn run_ids(&self) -> &[RunId] {
        &self.run_ids
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    /// Reads a run record as currently stored.
    pub fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, CoordinatorError> {
        Ok(self.store.load_validated::<Run>(&run_id.record_key())?)
    }

    /// Hands the participant the first unlocked run it has not completed yet.
    pub async fn assign(
        &self,
        participant_id: &ParticipantId,
        study_id: &StudyId,
    ) -> Result<AssignOutcome, CoordinatorError> {
        self.metrics.assign_total.inc();
        let _timer = ScopedTimer::new(&self.metrics.assign_latency);
        self.ensure_study(study_id)?;

        let candidates = {
            let _guard = self.commit_guard().await;
            let tracker = self.trackers.get_or_create(participant_id)?;
            self.run_ids
                .iter()
                .filter(|id| !tracker.has_updated(id))
                .cloned()
                .collect::<Vec<_>>()
        };

        if candidates.is_empty() {
            self.metrics.exhausted_total.inc();
            info!(
                target: "runpool_proof",
                event = "participant_exhausted",
                study_id = %study_id,
                participant_id = %participant_id,
                "no runs left for participant"
            );
            return Ok(AssignOutcome::Exhausted);
        }

        let attempts = self.cfg.max_attempts.max(1);
        for attempt in 1..=attempts {
            // armed before the pass so a release during it still wakes us
            let released = self.locks.released();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(client_run) = self.assign_pass(participant_id, &candidates).await? {
                self.metrics.assigned_total.inc();
                info!(
                    target: "runpool_proof",
                    event = "run_assigned",
                    study_id = %study_id,
                    participant_id = %participant_id,
                    run_id = %client_run.id,
                    check_value = %client_run.check_value,
                    attempt,
                    "run assigned"
                );
                return Ok(AssignOutcome::Assigned(client_run));
            }
            if attempt < attempts {
                debug!(
                    participant_id = %participant_id,
                    attempt,
                    candidates = candidates.len(),
                    "all candidate runs locked; waiting"
                );
                let _ = tokio::time::timeout(self.cfg.retry_interval, released).await;
            }
        }

        self.metrics.unavailable_total.inc();
        info!(
            target: "runpool_proof",
            event = "runs_unavailable",
            study_id = %study_id,
            participant_id = %participant_id,
            attempts,
            "no runs available right now"
        );
        Ok(AssignOutcome::Unavailable)
    }

    /// Applies a participant's update iff its check value is still current.
    pub async fn submit(
        &self,
        participant_id: &ParticipantId,
        study_id: &StudyId,
        submission: ClientRun,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        self.metrics.submit_total.inc();
        self.ensure_study(study_id)?;
        submission
            .validate()
            .map_err(|err| CoordinatorError::Validation(err.to_string()))?;

        let accepted = {
            let _guard = self.commit_guard().await;
            let key = submission.id.record_key();
            let Some(mut run) = self.store.load_validated::<Run>(&key)? else {
                return Err(CoordinatorError::NotFound {
                    kind: "run",
                    id: submission.id.0.clone(),
                });
            };

            if let Some(reason) = admission(&run, participant_id, &submission) {
                self.metrics.not_applied_total.inc();
                info!(
                    target: "runpool_proof",
                    event = "submission_rejected",
                    study_id = %study_id,
                    participant_id = %participant_id,
                    run_id = %run.id,
                    reason = reason.as_str(),
                    "update not applied"
                );
                return Ok(SubmitOutcome::NotApplied(reason));
            }

            let mut tracker = self.trackers.get_or_create(participant_id)?;
            run.current_parameters = submission.parameters;
            run.updated_by.push(participant_id.clone());
            tracker.record_update(run.id.clone());

            self.store.save_validated(&key, &run)?;
            self.trackers.save(&tracker)?;
            self.locks.release(&run.id.0);
            run
        };

        self.metrics.accepted_total.inc();
        info!(
            target: "runpool_proof",
            event = "submission_accepted",
            study_id = %study_id,
            participant_id = %participant_id,
            run_id = %accepted.id,
            updated_by = accepted.updated_by.len(),
            "update applied"
        );

        if let Some(archive) = &self.archive {
            if let Err(err) = archive.archive(&accepted) {
                self.metrics.archive_failed_total.inc();
                warn!(run_id = %accepted.id, error = %err, "archiving accepted run failed");
            }
        }
        Ok(SubmitOutcome::Accepted)
    }

    /// One pass over `candidates`: lock the first free run and re-stamp it.
    async fn assign_pass(
        &self,
        participant_id: &ParticipantId,
        candidates: &[RunId],
    ) -> Result<Option<ClientRun>, CoordinatorError> {
        let _guard = self.commit_guard().await;
        for run_id in candidates {
            let Some(lease) = self.locks.try_lock(&run_id.0) else {
                continue;
            };
            match self.stamp_run(run_id) {
                Ok(client_run) => return Ok(Some(client_run)),
                Err(err) => {
                    self.locks.release_lease(&lease);
                    warn!(
                        participant_id = %participant_id,
                        run_id = %run_id,
                        error = %err,
                        "assignment failed after lock; released"
                    );
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    fn stamp_run(&self, run_id: &RunId) -> Result<ClientRun, CoordinatorError> {
        let key = run_id.record_key();
        let Some(mut run) = self.store.load_validated::<Run>(&key)? else {
            return Err(CoordinatorError::NotFound {
                kind: "run",
                id: run_id.0.clone(),
            });
        };
        run.check_value = CheckValue::regenerate(&run.check_value);
        self.store.save_validated(&key, &run)?;
        Ok(run.to_client())
    }

    fn ensure_study(&self, study_id: &StudyId) -> Result<(), CoordinatorError> {
        if study_id != &self.cfg.study_id {
            return Err(CoordinatorError::Validation(format!(
                "unknown studyId {study_id}"
            )));
        }
        Ok(())
    }

    async fn commit_guard(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().await
    }
}

fn admission(
    run: &Run,
    participant_id: &ParticipantId,
    submission: &ClientRun,
) -> Option<RejectReason> {
    if submission.check_value != run.check_value {
        return Some(RejectReason::StaleCheckValue);
    }
    if run.is_updated_by(participant_id) {
        return Some(RejectReason::AlreadyUpdated);
    }
    if submission.parameters.length != run.declared_len() {
        return Some(RejectReason::LengthMismatch);
    }
    None
}
