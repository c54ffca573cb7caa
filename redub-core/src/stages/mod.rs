mod error;
mod media;
mod remux;
mod retry;
mod synthesis;
mod transcoder;
mod transcription;

pub use error::{StageError, StageResult};
pub use media::{MediaArtifacts, MediaTransformStage};
pub use remux::RemuxStage;
pub use retry::RetryPolicy;
pub use synthesis::{ElevenLabsClient, SpeechSynthesizer, SynthesisStage};
pub use transcoder::{TranscodeOp, Transcoder};
pub use transcription::{Transcript, TranscriptionStage};
