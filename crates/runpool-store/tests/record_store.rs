use runpool_core::types::{
    ParticipantId, ParticipantTracker, Parameters, RecordError, Run, RunId,
};
use runpool_store::{MemoryStore, RecordStore, StoreError, VersionedStore};

fn sample_run() -> Run {
    Run::new(RunId("r1".to_string()), Parameters::new(vec![1.0, 2.0]))
}

#[test]
fn validated_round_trip() -> anyhow::Result<()> {
    let store = MemoryStore::default();
    let run = sample_run();
    store.save_validated(&run.id.record_key(), &run)?;

    let loaded: Option<Run> = store.load_validated("run:r1")?;
    assert_eq!(loaded, Some(run));
    Ok(())
}

#[test]
fn absent_is_not_an_error() -> anyhow::Result<()> {
    let store = MemoryStore::default();
    let loaded: Option<Run> = store.load_validated("run:missing")?;
    assert!(loaded.is_none());
    Ok(())
}

#[test]
fn save_validated_refuses_invalid_record_without_writing() {
    let store = MemoryStore::default();
    let mut run = sample_run();
    run.current_parameters.values.push(9.0);

    let err = store.save_validated("run:r1", &run).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation {
            source: RecordError::LengthMismatch { .. },
            ..
        }
    ));
    assert_eq!(store.load("run:r1").unwrap(), None);
}

#[test]
fn load_validated_flags_schema_violation() {
    let store = MemoryStore::default();
    let mut run = sample_run();
    run.updated_by = vec![
        ParticipantId("a".to_string()),
        ParticipantId("a".to_string()),
    ];
    // bypass validation on the way in
    store.save_record("run:r1", &run).unwrap();

    let err = store.load_validated::<Run>("run:r1").unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn load_validated_flags_wrong_shape() {
    let store = MemoryStore::default();
    let tracker = ParticipantTracker::new(ParticipantId("p1".to_string()));
    store.save_record("run:r1", &tracker).unwrap();

    let err = store.load_validated::<Run>("run:r1").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation {
            source: RecordError::Shape(_),
            ..
        }
    ));
}

#[test]
fn garbage_bytes_are_a_codec_error() {
    let store = MemoryStore::default();
    store.save("run:r1", b"\xff\x00not json").unwrap();
    let err = store.load_validated::<Run>("run:r1").unwrap_err();
    assert!(matches!(err, StoreError::Codec { .. }));
}

#[test]
fn works_through_trait_object() -> anyhow::Result<()> {
    let store: std::sync::Arc<dyn VersionedStore> = std::sync::Arc::new(MemoryStore::default());
    let run = sample_run();
    store.save_validated(&run.id.record_key(), &run)?;
    assert_eq!(store.load_validated::<Run>("run:r1")?, Some(run));
    Ok(())
}
