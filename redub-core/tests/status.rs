mod common;

use tempfile::TempDir;

use redub_core::{ArtifactKind, ArtifactStore, ItemName, PipelineStage, StatusReporter};

use common::{orchestrator, place_upload, run_store, test_config, FakeSynthesizer, ScriptedExecutor};

#[tokio::test]
async fn unknown_item_reports_nothing_ready() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base);
    let reporter = StatusReporter::new(ArtifactStore::from_config(&config), Some(run_store(&config)));

    let snapshot = reporter.snapshot(&ItemName::new("ghost").unwrap()).await;
    assert!(!snapshot.thumbnail_ready);
    assert!(!snapshot.audio_extracted);
    assert!(!snapshot.synthesized_audio_ready);
    assert!(!snapshot.final_video_ready);
    assert!(!snapshot.complete);
    assert!(!snapshot.failed);
    assert_eq!(snapshot.stage, None);
    assert_eq!(snapshot.label(), "processing");
}

#[tokio::test]
async fn snapshot_reflects_artifacts_without_a_registry() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base);
    let store = ArtifactStore::from_config(&config);
    store.ensure_layout().await.unwrap();
    let item = ItemName::new("partial").unwrap();
    std::fs::write(store.artifact_path(ArtifactKind::Thumbnail, &item), b"png").unwrap();
    std::fs::write(store.artifact_path(ArtifactKind::ExtractedAudio, &item), b"mp3").unwrap();
    // A staged file is not yet an artifact.
    std::fs::write(config.synthesized_dir().join(".partial_tts.mp3"), b"half").unwrap();

    let snapshot = StatusReporter::new(store.clone(), None).snapshot(&item).await;
    assert!(snapshot.thumbnail_ready);
    assert!(snapshot.audio_extracted);
    assert!(!snapshot.synthesized_audio_ready);
    assert!(!snapshot.complete);

    std::fs::write(store.artifact_path(ArtifactKind::SynthesizedAudio, &item), b"tts").unwrap();
    std::fs::write(store.artifact_path(ArtifactKind::FinalVideo, &item), b"mp4").unwrap();
    let snapshot = StatusReporter::new(store, None).snapshot(&item).await;
    assert!(snapshot.complete);
    assert_eq!(snapshot.label(), "complete");
}

#[tokio::test]
async fn failed_run_is_surfaced_with_its_stage() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base);
    let source = place_upload(&config, "broken.mp4", b"SRC");
    let executor = ScriptedExecutor::new();
    executor.fail_when(|program, _| program.ends_with("whisper"));
    let runs = run_store(&config);
    let orchestrator = orchestrator(&config, &executor, &FakeSynthesizer::new(), Some(runs.clone()));
    let item = ItemName::new("broken").unwrap();
    orchestrator.run(&item, &source).await.unwrap_err();

    let snapshot = StatusReporter::new(orchestrator.store().clone(), Some(runs))
        .snapshot(&item)
        .await;
    assert!(snapshot.thumbnail_ready);
    assert!(snapshot.audio_extracted);
    assert!(!snapshot.synthesized_audio_ready);
    assert!(!snapshot.complete);
    assert!(snapshot.failed);
    assert_eq!(snapshot.stage, Some(PipelineStage::Transcribing));
    assert!(snapshot.failure_reason.is_some());
    assert_eq!(snapshot.label(), "failed");
}

#[tokio::test]
async fn status_flags_only_move_forward_during_a_run() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base);
    let source = place_upload(&config, "steady.mp4", b"SRC");
    let executor = ScriptedExecutor::new();
    executor.delay_each_call(std::time::Duration::from_millis(20));
    let orchestrator = orchestrator(&config, &executor, &FakeSynthesizer::new(), None);
    let item = ItemName::new("steady").unwrap();
    let reporter = StatusReporter::new(orchestrator.store().clone(), None);

    let submission = orchestrator.submit(item.clone(), source);
    let mut previous = reporter.snapshot(&item).await;
    while !submission.handle.is_finished() {
        let current = reporter.snapshot(&item).await;
        for (before, after) in [
            (previous.thumbnail_ready, current.thumbnail_ready),
            (previous.audio_extracted, current.audio_extracted),
            (previous.synthesized_audio_ready, current.synthesized_audio_ready),
            (previous.final_video_ready, current.final_video_ready),
        ] {
            assert!(!before || after, "a status flag went backwards");
        }
        previous = current;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    submission.wait().await.unwrap();
    assert!(reporter.snapshot(&item).await.complete);
}
