use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::TranscoderSection;
use crate::exec::{stderr_tail, CommandExecutor};
use crate::store::{is_file, staging_path};

use super::error::{StageError, StageResult};
use super::retry::RetryPolicy;

/// The ffmpeg invocations the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOp {
    /// Pick a representative frame and scale it to `width`x`height`.
    ExtractFrame { width: u32, height: u32 },
    /// Drop the video stream and re-encode audio with `codec`.
    ExtractAudio { codec: String },
    /// Copy the video stream without its audio.
    StripAudio,
    /// Copy the video stream from the input and add `audio`, encoded with `audio_codec`.
    MuxCombine { audio: PathBuf, audio_codec: String },
}

impl TranscodeOp {
    pub fn label(&self) -> &'static str {
        match self {
            TranscodeOp::ExtractFrame { .. } => "extract_frame",
            TranscodeOp::ExtractAudio { .. } => "extract_audio",
            TranscodeOp::StripAudio => "strip_audio",
            TranscodeOp::MuxCombine { .. } => "mux_combine",
        }
    }
}

#[derive(Clone)]
pub struct Transcoder {
    program: PathBuf,
    log_level: String,
    retry: RetryPolicy,
    executor: Arc<dyn CommandExecutor>,
}

impl Transcoder {
    pub fn new(section: &TranscoderSection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            program: PathBuf::from(&section.ffmpeg),
            log_level: section.log_level.clone(),
            retry: RetryPolicy::from(&section.retry),
            executor,
        }
    }

    pub fn build_args(&self, op: &TranscodeOp, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-i".to_string(),
            input.display().to_string(),
        ];
        match op {
            TranscodeOp::ExtractFrame { width, height } => {
                args.extend([
                    "-vf".to_string(),
                    format!("thumbnail,scale={width}:{height}"),
                    "-frames:v".to_string(),
                    "1".to_string(),
                ]);
            }
            TranscodeOp::ExtractAudio { codec } => {
                args.extend(["-vn".to_string(), "-c:a".to_string(), codec.clone()]);
            }
            TranscodeOp::StripAudio => {
                args.extend(["-c:v".to_string(), "copy".to_string(), "-an".to_string()]);
            }
            TranscodeOp::MuxCombine { audio, audio_codec } => {
                args.extend([
                    "-i".to_string(),
                    audio.display().to_string(),
                    "-map".to_string(),
                    "0:v:0".to_string(),
                    "-map".to_string(),
                    "1:a:0".to_string(),
                    "-c:v".to_string(),
                    "copy".to_string(),
                    "-c:a".to_string(),
                    audio_codec.clone(),
                ]);
            }
        }
        args.push(output.display().to_string());
        args
    }

    /// Runs `op` and moves the result to `output` only once ffmpeg has succeeded,
    /// so a failed run never leaves a partial artifact under the final name.
    pub async fn run(&self, op: &TranscodeOp, input: &Path, output: &Path) -> StageResult<PathBuf> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StageError::io(parent, source))?;
        }
        let staged = staging_path(output);
        let args = self.build_args(op, input, &staged);
        let label = op.label();
        debug!(operation = label, input = %input.display(), output = %output.display(), "starting transcode");

        let result = self
            .retry
            .run(label, |_| self.invoke(&args, &staged))
            .await;
        if let Err(err) = result {
            discard(&staged).await;
            return Err(err);
        }
        fs::rename(&staged, output)
            .await
            .map_err(|source| StageError::io(output, source))?;
        info!(operation = label, output = %output.display(), "transcode finished");
        Ok(output.to_path_buf())
    }

    async fn invoke(&self, args: &[String], staged: &Path) -> StageResult<()> {
        let program = self.program.display().to_string();
        let output = self
            .executor
            .run(&self.program, args)
            .await
            .map_err(|source| StageError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(StageError::CommandFailed {
                program,
                status: output.status.to_string(),
                stderr: stderr_tail(&output),
            });
        }
        if !is_file(staged).await {
            return Err(StageError::MissingArtifact(staged.to_path_buf()));
        }
        Ok(())
    }
}

pub(crate) async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove partial output"),
    }
}
