use thiserror::Error;

use crate::stages::StageError;
use crate::store::StoreError;

use super::types::PipelineStage;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{item}: {stage} failed: {source}")]
    Stage {
        item: String,
        stage: PipelineStage,
        #[source]
        source: StageError,
    },
    #[error("failed to set up pipeline: {0}")]
    Setup(#[source] StageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("pipeline task for {item} ended abnormally: {reason}")]
    Task { item: String, reason: String },
}

impl PipelineError {
    /// The stage that was running when the run stopped, if it got that far.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
