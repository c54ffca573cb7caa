pub mod config;
pub mod delivery;
pub mod error;
pub mod exec;
pub mod ingest;
pub mod pipeline;
pub mod runs;
pub mod stages;
pub mod status;
pub mod store;

pub use config::{
    load_redub_config, parse_frame_size, MediaSection, PathsSection, RedubConfig, RetrySection,
    SynthesisSection, TranscoderSection, TranscriptionSection,
};
pub use delivery::{
    content_type_for, ArtifactDelivery, ByteRange, DeliveryArea, DeliveryError, DeliveryResponse,
    DeliveryResult,
};
pub use error::{ConfigError, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use ingest::{IngestError, IngestResult, IngestedItem, Ingestor};
pub use pipeline::{
    Orchestrator, PipelineError, PipelineResult, PipelineStage, RunReport, Submission,
    SubmissionAck,
};
pub use runs::{RunError, RunFilter, RunRecord, RunResult, RunState, RunStore, RunStoreBuilder};
pub use stages::{
    ElevenLabsClient, MediaArtifacts, MediaTransformStage, RemuxStage, RetryPolicy,
    SpeechSynthesizer, StageError, StageResult, SynthesisStage, TranscodeOp, Transcoder,
    Transcript, TranscriptionStage,
};
pub use status::{StatusReporter, StatusSnapshot};
pub use store::{
    staging_path, ArtifactKind, ArtifactStore, ItemName, StoreArea, StoreDirs, StoreError,
    StoreResult,
};
