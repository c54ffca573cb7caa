use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{error, info, warn};

use crate::store::{is_file, ArtifactKind, ArtifactStore, ItemName};

use super::error::{StageError, StageResult};
use super::transcoder::{TranscodeOp, Transcoder};

/// Replaces the audio track of the source video with the synthesized speech.
#[derive(Clone)]
pub struct RemuxStage {
    store: ArtifactStore,
    transcoder: Transcoder,
}

impl RemuxStage {
    pub fn new(store: ArtifactStore, transcoder: Transcoder) -> Self {
        Self { store, transcoder }
    }

    pub async fn run(&self, item: &ItemName, source: &Path) -> StageResult<PathBuf> {
        let speech = self.store.artifact_path(ArtifactKind::SynthesizedAudio, item);
        if !is_file(&speech).await {
            return Err(StageError::MissingArtifact(speech));
        }
        let video_only = self.store.artifact_path(ArtifactKind::VideoOnly, item);
        let final_video = self.store.artifact_path(ArtifactKind::FinalVideo, item);

        self.transcoder
            .run(&TranscodeOp::StripAudio, source, &video_only)
            .await
            .inspect_err(|err| error!(item = %item, error = %err, "stripping audio failed"))?;

        let combine = TranscodeOp::MuxCombine {
            audio: speech,
            audio_codec: self.store.media().output_audio_codec.clone(),
        };
        // The video-only intermediate stays on disk if muxing fails.
        self.transcoder
            .run(&combine, &video_only, &final_video)
            .await
            .inspect_err(|err| error!(item = %item, error = %err, "muxing synthesized audio failed"))?;

        if let Err(err) = fs::remove_file(&video_only).await {
            warn!(path = %video_only.display(), error = %err, "failed to remove intermediate video");
        }
        info!(item = %item, path = %final_video.display(), "final video ready");
        Ok(final_video)
    }
}
