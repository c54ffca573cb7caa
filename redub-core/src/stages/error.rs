use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} reported errors: {stderr}")]
    CommandStderr { program: String, stderr: String },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("expected artifact missing: {0}")]
    MissingArtifact(PathBuf),
    #[error("transcript for {0} is empty")]
    EmptyTranscript(String),
    #[error("transcript at {path} is not valid UTF-8")]
    Encoding { path: PathBuf },
    #[error("speech service returned {status}: {body}")]
    Synthesis { status: u16, body: String },
    #[error("speech service returned no audio")]
    EmptyAudio,
    #[error("network error: {0}")]
    Network(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl StageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            source,
            path: path.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StageError::CommandFailed { .. }
            | StageError::Timeout { .. }
            | StageError::Network(_) => true,
            StageError::Synthesis { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(error: reqwest::Error) -> Self {
        StageError::Network(error.to_string())
    }
}

pub type StageResult<T> = Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let rate_limited = StageError::Synthesis {
            status: 429,
            body: String::new(),
        };
        let unauthorized = StageError::Synthesis {
            status: 401,
            body: "invalid api key".into(),
        };
        assert!(rate_limited.is_transient());
        assert!(!unauthorized.is_transient());
        assert!(StageError::Network("reset".into()).is_transient());
        assert!(!StageError::EmptyTranscript("clip".into()).is_transient());
        assert!(!StageError::CommandStderr {
            program: "whisper".into(),
            stderr: "Traceback".into(),
        }
        .is_transient());
    }
}
