use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::TranscriptionSection;
use crate::exec::{stderr_tail, CommandExecutor};
use crate::store::{ArtifactKind, ArtifactStore, ItemName};

use super::error::{StageError, StageResult};
use super::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub path: PathBuf,
    pub text: String,
}

/// Runs the whisper CLI against an extracted audio track.
#[derive(Clone)]
pub struct TranscriptionStage {
    store: ArtifactStore,
    program: PathBuf,
    model: String,
    fail_on_stderr: bool,
    retry: RetryPolicy,
    executor: Arc<dyn CommandExecutor>,
}

impl TranscriptionStage {
    pub fn new(
        store: ArtifactStore,
        section: &TranscriptionSection,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            store,
            program: PathBuf::from(&section.binary),
            model: section.model_name.clone(),
            fail_on_stderr: section.fail_on_stderr,
            retry: RetryPolicy::from(&section.retry),
            executor,
        }
    }

    pub fn build_args(&self, audio: &Path, output_dir: &Path) -> Vec<String> {
        vec![
            audio.display().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output_dir".to_string(),
            output_dir.display().to_string(),
            "--output_format".to_string(),
            "txt".to_string(),
        ]
    }

    /// Writes `<transcripts>/<item>.txt` and returns its contents.
    ///
    /// Whisper names its output after the audio file stem, so it writes into a
    /// per-item staging directory first and the result is renamed into place.
    pub async fn run(&self, item: &ItemName, audio: &Path) -> StageResult<Transcript> {
        let target = self.store.artifact_path(ArtifactKind::Transcript, item);
        let transcripts_dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let staging_dir = transcripts_dir.join(format!(".staging-{item}"));
        fs::create_dir_all(&staging_dir)
            .await
            .map_err(|source| StageError::io(&staging_dir, source))?;

        let result = self
            .retry
            .run("transcribe", |_| self.invoke(audio, &staging_dir))
            .await;
        let outcome = match result {
            Ok(()) => self.promote(audio, &staging_dir, &target).await,
            Err(err) => Err(err),
        };
        if let Err(err) = fs::remove_dir_all(&staging_dir).await {
            warn!(path = %staging_dir.display(), error = %err, "failed to clean transcription staging directory");
        }
        outcome?;

        let text = read_transcript(&target).await?;
        if text.trim().is_empty() {
            return Err(StageError::EmptyTranscript(item.to_string()));
        }
        info!(item = %item, chars = text.len(), path = %target.display(), "transcript ready");
        Ok(Transcript { path: target, text })
    }

    async fn invoke(&self, audio: &Path, output_dir: &Path) -> StageResult<()> {
        let program = self.program.display().to_string();
        let args = self.build_args(audio, output_dir);
        let output = self
            .executor
            .run(&self.program, &args)
            .await
            .map_err(|source| StageError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stderr = stderr_tail(&output);
        if !output.status.success() {
            error!(program = %program, status = %output.status, stderr = %stderr, "transcription failed");
            return Err(StageError::CommandFailed {
                program,
                status: output.status.to_string(),
                stderr,
            });
        }
        if self.fail_on_stderr && !stderr.is_empty() {
            error!(program = %program, stderr = %stderr, "transcription wrote to stderr");
            return Err(StageError::CommandStderr { program, stderr });
        }
        Ok(())
    }

    async fn promote(&self, audio: &Path, staging_dir: &Path, target: &Path) -> StageResult<()> {
        let stem = audio
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let produced = staging_dir.join(format!("{stem}.txt"));
        if fs::metadata(&produced).await.is_err() {
            return Err(StageError::MissingArtifact(produced));
        }
        fs::rename(&produced, target)
            .await
            .map_err(|source| StageError::io(target, source))
    }
}

async fn read_transcript(path: &Path) -> StageResult<String> {
    let bytes = fs::read(path)
        .await
        .map_err(|source| StageError::io(path, source))?;
    String::from_utf8(bytes).map_err(|_| StageError::Encoding {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MediaSection, RetrySection};
    use crate::exec::SystemCommandExecutor;
    use crate::store::StoreDirs;

    #[test]
    fn whisper_arguments() {
        let section = TranscriptionSection {
            binary: "whisper".into(),
            model_name: "base".into(),
            fail_on_stderr: true,
            retry: RetrySection {
                max_attempts: 1,
                timeout_seconds: 10,
                backoff_initial_ms: 0,
                backoff_max_ms: 0,
            },
        };
        let store = ArtifactStore::new(
            StoreDirs::under("/data"),
            MediaSection {
                thumbnail_extension: "png".into(),
                thumbnail_size: "320x180".into(),
                audio_extension: "mp3".into(),
                audio_codec: "libmp3lame".into(),
                output_extension: "mp4".into(),
                output_audio_codec: "aac".into(),
            },
        );
        let stage = TranscriptionStage::new(store, &section, Arc::new(SystemCommandExecutor));
        let args = stage.build_args(Path::new("/data/processed/clip.mp3"), Path::new("/tmp/out"));
        assert_eq!(
            args.join(" "),
            "/data/processed/clip.mp3 --model base --output_dir /tmp/out --output_format txt"
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = read_transcript(&path).await.unwrap_err();
        assert!(matches!(err, StageError::Encoding { .. }));
    }
}
