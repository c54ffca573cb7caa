use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const ENV_SYNTHESIS_API_KEY: &str = "REDUB_SYNTHESIS_API_KEY";
pub const ENV_VOICE_ID: &str = "REDUB_VOICE_ID";
pub const ENV_TRANSCRIPTION_MODEL: &str = "REDUB_TRANSCRIPTION_MODEL";

const RUNS_DATABASE: &str = "runs.sqlite";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedubConfig {
    pub paths: PathsSection,
    pub media: MediaSection,
    pub transcoder: TranscoderSection,
    pub transcription: TranscriptionSection,
    pub synthesis: SynthesisSection,
}

impl RedubConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.uploads_dir)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.processed_dir)
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.transcripts_dir)
    }

    pub fn synthesized_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.synthesized_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn runs_db_path(&self) -> PathBuf {
        self.data_dir().join(RUNS_DATABASE)
    }

    /// Applies the process environment on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(api_key) = non_empty(ENV_SYNTHESIS_API_KEY) {
            self.synthesis.api_key = api_key;
        }
        if let Some(voice_id) = non_empty(ENV_VOICE_ID) {
            self.synthesis.voice_id = voice_id;
        }
        if let Some(model) = non_empty(ENV_TRANSCRIPTION_MODEL) {
            self.transcription.model_name = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, retry) in [
            ("transcoder", &self.transcoder.retry),
            ("transcription", &self.transcription.retry),
            ("synthesis", &self.synthesis.retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(ConfigError::invalid(
                    format!("{name}.retry.max_attempts"),
                    "must be greater than zero",
                ));
            }
            if retry.timeout_seconds == 0 {
                return Err(ConfigError::invalid(
                    format!("{name}.retry.timeout_seconds"),
                    "must be greater than zero",
                ));
            }
        }
        if self.synthesis.voice_id.trim().is_empty() {
            return Err(ConfigError::invalid("synthesis.voice_id", "is empty"));
        }
        if self.transcription.model_name.trim().is_empty() {
            return Err(ConfigError::invalid("transcription.model_name", "is empty"));
        }
        if parse_frame_size(&self.media.thumbnail_size).is_none() {
            return Err(ConfigError::invalid(
                "media.thumbnail_size",
                format!("expected WIDTHxHEIGHT, got {}", self.media.thumbnail_size),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub uploads_dir: String,
    pub processed_dir: String,
    pub transcripts_dir: String,
    pub synthesized_dir: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSection {
    pub thumbnail_extension: String,
    pub thumbnail_size: String,
    pub audio_extension: String,
    pub audio_codec: String,
    pub output_extension: String,
    pub output_audio_codec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSection {
    pub ffmpeg: String,
    pub log_level: String,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSection {
    pub binary: String,
    pub model_name: String,
    #[serde(default = "TranscriptionSection::default_fail_on_stderr")]
    pub fail_on_stderr: bool,
    pub retry: RetrySection,
}

impl TranscriptionSection {
    fn default_fail_on_stderr() -> bool {
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisSection {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub timeout_seconds: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetrySection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Splits `320x180` into `(320, 180)`.
pub fn parse_frame_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.trim().split_once(['x', 'X'])?;
    let width = width.trim().parse().ok()?;
    let height = height.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

pub fn load_redub_config<P: AsRef<Path>>(path: P) -> Result<RedubConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
