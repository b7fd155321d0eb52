use std::sync::Arc;

use runpool_core::types::{ParticipantId, ParticipantTracker};
use runpool_store::{RecordStore, StoreError, VersionedStore};
use tracing::debug;

/// Sole creator of `participantid:<id>` records.
#[derive(Clone)]
pub struct TrackerStore {
    store: Arc<dyn VersionedStore>,
}

impl TrackerStore {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self { store }
    }

    /// Loads the participant's tracker, persisting an empty one on first contact.
    pub fn get_or_create(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<ParticipantTracker, StoreError> {
        let key = participant_id.tracker_key();
        if let Some(tracker) = self.store.load_validated::<ParticipantTracker>(&key)? {
            return Ok(tracker);
        }

        let tracker = ParticipantTracker::new(participant_id.clone());
        self.store.save_validated(&key, &tracker)?;
        debug!(participant_id = %participant_id, "created participant tracker");
        Ok(tracker)
    }

    pub fn save(&self, tracker: &ParticipantTracker) -> Result<(), StoreError> {
        self.store
            .save_validated(&tracker.participant_id.tracker_key(), tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runpool_core::types::RunId;
    use runpool_store::MemoryStore;

    #[test]
    fn creates_and_persists_empty_tracker() {
        let store = Arc::new(MemoryStore::default());
        let trackers = TrackerStore::new(store.clone());
        let pid = ParticipantId("p1".to_string());

        let tracker = trackers.get_or_create(&pid).unwrap();
        assert!(tracker.has_updated_run_ids.is_empty());
        assert!(store.load("participantid:p1").unwrap().is_some());
    }

    #[test]
    fn returns_existing_tracker() {
        let store = Arc::new(MemoryStore::default());
        let trackers = TrackerStore::new(store);
        let pid = ParticipantId("p1".to_string());

        let mut tracker = trackers.get_or_create(&pid).unwrap();
        tracker.record_update(RunId("r1".to_string()));
        trackers.save(&tracker).unwrap();

        let again = trackers.get_or_create(&pid).unwrap();
        assert!(again.has_updated(&RunId("r1".to_string())));
    }
}
