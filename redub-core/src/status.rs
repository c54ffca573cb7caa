use serde::Serialize;
use tracing::warn;

use crate::pipeline::PipelineStage;
use crate::runs::{RunRecord, RunState, RunStore};
use crate::store::{ArtifactKind, ArtifactStore, ItemName};

/// Progress of one item, recomputed from the artifact store on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub item: String,
    pub thumbnail_ready: bool,
    pub audio_extracted: bool,
    pub synthesized_audio_ready: bool,
    pub final_video_ready: bool,
    pub complete: bool,
    pub stage: Option<PipelineStage>,
    pub failed: bool,
    pub failure_reason: Option<String>,
}

impl StatusSnapshot {
    pub fn from_artifacts(
        item: &ItemName,
        thumbnail_ready: bool,
        audio_extracted: bool,
        synthesized_audio_ready: bool,
        final_video_ready: bool,
    ) -> Self {
        Self {
            item: item.to_string(),
            thumbnail_ready,
            audio_extracted,
            synthesized_audio_ready,
            final_video_ready,
            complete: thumbnail_ready
                && audio_extracted
                && synthesized_audio_ready
                && final_video_ready,
            stage: None,
            failed: false,
            failure_reason: None,
        }
    }

    /// Adds the last known stage and failure from the run registry.
    /// `complete` stays an artifact-only fact.
    pub fn with_run(mut self, record: &RunRecord) -> Self {
        self.stage = Some(record.stage);
        self.failed = record.state == RunState::Failed;
        self.failure_reason = record.failure_reason.clone();
        self
    }

    pub fn label(&self) -> &'static str {
        if self.complete {
            "complete"
        } else if self.failed {
            "failed"
        } else {
            "processing"
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReporter {
    store: ArtifactStore,
    runs: Option<RunStore>,
}

impl StatusReporter {
    pub fn new(store: ArtifactStore, runs: Option<RunStore>) -> Self {
        Self { store, runs }
    }

    pub async fn snapshot(&self, item: &ItemName) -> StatusSnapshot {
        let (thumbnail, audio, speech, final_video) = tokio::join!(
            self.store.exists(ArtifactKind::Thumbnail, item),
            self.store.exists(ArtifactKind::ExtractedAudio, item),
            self.store.exists(ArtifactKind::SynthesizedAudio, item),
            self.store.exists(ArtifactKind::FinalVideo, item),
        );
        let snapshot = StatusSnapshot::from_artifacts(item, thumbnail, audio, speech, final_video);
        let Some(runs) = self.runs.clone() else {
            return snapshot;
        };
        let name = item.to_string();
        match tokio::task::spawn_blocking(move || runs.get(&name)).await {
            Ok(Ok(Some(record))) => snapshot.with_run(&record),
            Ok(Ok(None)) => snapshot,
            Ok(Err(err)) => {
                warn!(item = %item, error = %err, "run registry unavailable for status");
                snapshot
            }
            Err(err) => {
                warn!(item = %item, error = %err, "run registry lookup aborted");
                snapshot
            }
        }
    }
}
