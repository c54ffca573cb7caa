use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::store::ItemName;

use super::error::PipelineResult;

/// Where a run currently is. Ordered by execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Uploaded,
    Extracting,
    Transcribing,
    Synthesizing,
    Remuxing,
    Complete,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Uploaded => "uploaded",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Transcribing => "transcribing",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Remuxing => "remuxing",
            PipelineStage::Complete => "complete",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown pipeline stage {0:?}")]
pub struct UnknownStage(pub String);

impl std::str::FromStr for PipelineStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "extracting" => Ok(Self::Extracting),
            "transcribing" => Ok(Self::Transcribing),
            "synthesizing" => Ok(Self::Synthesizing),
            "remuxing" => Ok(Self::Remuxing),
            "complete" => Ok(Self::Complete),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub item: String,
    pub thumbnail: PathBuf,
    pub extracted_audio: PathBuf,
    pub transcript: PathBuf,
    pub synthesized_audio: PathBuf,
    pub final_video: PathBuf,
}

/// What the submitter is told right after the hand-off, before any stage runs.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionAck {
    pub item: String,
    pub source: PathBuf,
    pub message: String,
}

/// A run that was accepted and is processing in the background.
pub struct Submission {
    pub item: ItemName,
    pub ack: SubmissionAck,
    pub handle: JoinHandle<PipelineResult<RunReport>>,
}
