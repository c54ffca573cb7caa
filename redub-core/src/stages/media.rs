use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::error;

use crate::config::parse_frame_size;
use crate::store::{ArtifactKind, ArtifactStore, ItemName};

use super::error::{StageError, StageResult};
use super::transcoder::{TranscodeOp, Transcoder};

#[derive(Debug, Clone, Serialize)]
pub struct MediaArtifacts {
    pub thumbnail: PathBuf,
    pub audio: PathBuf,
}

/// Produces the thumbnail and extracted audio track for an uploaded video.
#[derive(Clone)]
pub struct MediaTransformStage {
    store: ArtifactStore,
    transcoder: Transcoder,
}

impl MediaTransformStage {
    pub fn new(store: ArtifactStore, transcoder: Transcoder) -> Self {
        Self { store, transcoder }
    }

    /// Both extractions run concurrently and both are awaited before returning.
    /// Audio is what the rest of the pipeline depends on, so its error wins
    /// when both fail.
    pub async fn run(&self, item: &ItemName, source: &Path) -> StageResult<MediaArtifacts> {
        let media = self.store.media();
        let (width, height) = parse_frame_size(&media.thumbnail_size).ok_or_else(|| {
            StageError::Config(format!("invalid thumbnail size {}", media.thumbnail_size))
        })?;
        let frame_op = TranscodeOp::ExtractFrame { width, height };
        let audio_op = TranscodeOp::ExtractAudio {
            codec: media.audio_codec.clone(),
        };
        let thumbnail_path = self.store.artifact_path(ArtifactKind::Thumbnail, item);
        let audio_path = self.store.artifact_path(ArtifactKind::ExtractedAudio, item);

        let (thumbnail, audio) = tokio::join!(
            self.transcoder.run(&frame_op, source, &thumbnail_path),
            self.transcoder.run(&audio_op, source, &audio_path),
        );

        if let Err(err) = &thumbnail {
            error!(item = %item, error = %err, "thumbnail extraction failed");
        }
        if let Err(err) = &audio {
            error!(item = %item, error = %err, "audio extraction failed");
        }
        let audio = audio?;
        let thumbnail = thumbnail?;
        Ok(MediaArtifacts { thumbnail, audio })
    }
}
