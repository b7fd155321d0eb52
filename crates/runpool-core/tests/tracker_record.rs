use runpool_core::types::{ParticipantId, ParticipantTracker, RecordError, RunId, Schema};

#[test]
fn record_update_is_idempotent() {
    let mut t = ParticipantTracker::new(ParticipantId("p1".to_string()));
    let r1 = RunId("r1".to_string());
    assert!(t.record_update(r1.clone()));
    assert!(!t.record_update(r1.clone()));
    assert!(t.has_updated(&r1));
    assert_eq!(t.has_updated_run_ids.len(), 1);
    assert_eq!(t.validate(), Ok(()));
}

#[test]
fn tracker_rejects_duplicate_run_ids() {
    let t = ParticipantTracker {
        participant_id: ParticipantId("p1".to_string()),
        has_updated_run_ids: vec![RunId("r1".to_string()), RunId("r1".to_string())],
    };
    assert!(matches!(
        t.validate(),
        Err(RecordError::Duplicate {
            field: "hasUpdatedRunIds",
            ..
        })
    ));
}

#[test]
fn participant_id_parse_validates() {
    assert!(ParticipantId::parse("p-1").is_ok());
    assert!(ParticipantId::parse("").is_err());
    assert!(ParticipantId::parse("p 1").is_err());
}
