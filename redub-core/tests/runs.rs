use std::path::Path;

use tempfile::TempDir;

use redub_core::{PipelineStage, RunFilter, RunState, RunStore};

fn store(base: &TempDir) -> RunStore {
    let store = RunStore::builder()
        .path(base.path().join("runs.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    store
}

#[test]
fn lifecycle_from_begin_to_complete() {
    let base = TempDir::new().unwrap();
    let store = store(&base);

    let record = store.begin("promo", Path::new("/srv/uploads/promo.mp4")).unwrap();
    assert_eq!(record.state, RunState::Running);
    assert_eq!(record.stage, PipelineStage::Uploaded);
    assert_eq!(record.attempt, 1);
    assert_eq!(record.source_path, "/srv/uploads/promo.mp4");
    assert!(record.finished_at.is_none());

    assert!(store.advance("promo", PipelineStage::Transcribing).unwrap());
    let record = store.get("promo").unwrap().unwrap();
    assert_eq!(record.stage, PipelineStage::Transcribing);
    assert!(record.updated_at >= record.started_at);

    assert!(store.complete("promo").unwrap());
    let record = store.get("promo").unwrap().unwrap();
    assert_eq!(record.state, RunState::Complete);
    assert_eq!(record.stage, PipelineStage::Complete);
    assert!(record.finished_at.is_some());

    // A finished run no longer moves between stages.
    assert!(!store.advance("promo", PipelineStage::Remuxing).unwrap());
}

#[test]
fn failure_is_recorded_and_cleared_by_rerun() {
    let base = TempDir::new().unwrap();
    let store = store(&base);

    store.begin("talk", Path::new("uploads/talk.mp4")).unwrap();
    store
        .fail("talk", PipelineStage::Synthesizing, "speech service returned 401")
        .unwrap();
    let failed = store.get("talk").unwrap().unwrap();
    assert_eq!(failed.state, RunState::Failed);
    assert_eq!(failed.stage, PipelineStage::Synthesizing);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("speech service returned 401")
    );

    let rerun = store.begin("talk", Path::new("uploads/talk.mp4")).unwrap();
    assert_eq!(rerun.attempt, 2);
    assert_eq!(rerun.state, RunState::Running);
    assert!(rerun.failure_reason.is_none());
    assert!(rerun.finished_at.is_none());
}

#[test]
fn list_filters_by_state_and_limit() {
    let base = TempDir::new().unwrap();
    let store = store(&base);
    for item in ["a", "b", "c"] {
        store.begin(item, Path::new(item)).unwrap();
    }
    store.complete("a").unwrap();
    store.fail("b", PipelineStage::Extracting, "ffmpeg exited").unwrap();

    let all = store.list(&RunFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    let failed = store
        .list(&RunFilter {
            state: Some(RunState::Failed),
            limit: None,
        })
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].item_name, "b");

    let limited = store
        .list(&RunFilter {
            state: None,
            limit: Some(2),
        })
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn updates_for_unknown_items_change_nothing() {
    let base = TempDir::new().unwrap();
    let store = store(&base);
    assert!(!store.complete("nobody").unwrap());
    assert!(!store.fail("nobody", PipelineStage::Remuxing, "x").unwrap());
    assert!(store.get("nobody").unwrap().is_none());
}
