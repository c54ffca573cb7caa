//! Sequences the stages for one item.
//!
//! A run is `extracting -> transcribing -> synthesizing -> remuxing`, each
//! stage starting only after its predecessor's artifacts are on disk. Runs
//! are spawned onto the tokio runtime so submission returns immediately.

mod error;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::RedubConfig;
use crate::exec::{CommandExecutor, SystemCommandExecutor};
use crate::runs::{RunResult, RunStore};
use crate::stages::{
    ElevenLabsClient, MediaTransformStage, RemuxStage, RetryPolicy, SpeechSynthesizer,
    StageError, SynthesisStage, Transcoder, TranscriptionStage,
};
use crate::store::{ArtifactStore, ItemName};

pub use error::{PipelineError, PipelineResult};
pub use types::{PipelineStage, RunReport, Submission, SubmissionAck, UnknownStage};

struct OrchestratorInner {
    store: ArtifactStore,
    media: MediaTransformStage,
    transcription: TranscriptionStage,
    synthesis: SynthesisStage,
    remux: RemuxStage,
    runs: Option<RunStore>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    /// Wires the stages to ffmpeg, whisper and ElevenLabs as configured.
    pub fn from_config(config: &RedubConfig, runs: Option<RunStore>) -> PipelineResult<Self> {
        let synthesizer = ElevenLabsClient::new(&config.synthesis).map_err(PipelineError::Setup)?;
        Ok(Self::with_capabilities(
            config,
            Arc::new(SystemCommandExecutor),
            Arc::new(synthesizer),
            runs,
        ))
    }

    pub fn with_capabilities(
        config: &RedubConfig,
        executor: Arc<dyn CommandExecutor>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        runs: Option<RunStore>,
    ) -> Self {
        let store = ArtifactStore::from_config(config);
        let transcoder = Transcoder::new(&config.transcoder, Arc::clone(&executor));
        let inner = OrchestratorInner {
            media: MediaTransformStage::new(store.clone(), transcoder.clone()),
            transcription: TranscriptionStage::new(
                store.clone(),
                &config.transcription,
                executor,
            ),
            synthesis: SynthesisStage::new(
                store.clone(),
                synthesizer,
                RetryPolicy::from(&config.synthesis.retry),
            ),
            remux: RemuxStage::new(store.clone(), transcoder),
            store,
            runs,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }

    pub fn runs(&self) -> Option<&RunStore> {
        self.inner.runs.as_ref()
    }

    /// Starts a run in the background and acknowledges it right away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, item: ItemName, source: PathBuf) -> Submission {
        let ack = SubmissionAck {
            item: item.to_string(),
            source: source.clone(),
            message: "Processing started".to_string(),
        };
        info!(item = %item, source = %source.display(), "run submitted");
        let orchestrator = self.clone();
        let task_item = item.clone();
        let handle = tokio::spawn(async move { orchestrator.run(&task_item, &source).await });
        Submission { item, ack, handle }
    }

    /// Runs every stage for `item` and returns once the final video exists
    /// or a stage has failed.
    ///
    /// Artifacts from an earlier run of the same item are removed first, so
    /// a snapshot taken mid-run only reflects this run's progress.
    pub async fn run(&self, item: &ItemName, source: &Path) -> PipelineResult<RunReport> {
        let name = item.to_string();
        let source_path = source.to_path_buf();
        self.record(move |runs| runs.begin(&name, &source_path).map(|_| ()))
            .await;
        info!(item = %item, source = %source.display(), "run started");

        let result = match self.prepare(item).await {
            Ok(()) => self.execute(item, source).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(report) => {
                let name = item.to_string();
                self.record(move |runs| runs.complete(&name).map(|_| ()))
                    .await;
                info!(item = %item, output = %report.final_video.display(), "run complete");
                Ok(report)
            }
            Err(err) => {
                let stage = err.stage().unwrap_or(PipelineStage::Uploaded);
                let reason = match &err {
                    PipelineError::Stage { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                let name = item.to_string();
                let recorded = reason.clone();
                self.record(move |runs| runs.fail(&name, stage, &recorded).map(|_| ()))
                    .await;
                error!(item = %item, stage = %stage, error = %reason, "run failed");
                Err(err)
            }
        }
    }

    async fn prepare(&self, item: &ItemName) -> PipelineResult<()> {
        let store = &self.inner.store;
        store.ensure_layout().await?;
        store.clear_artifacts(item).await?;
        Ok(())
    }

    async fn execute(&self, item: &ItemName, source: &Path) -> PipelineResult<RunReport> {
        let inner = &self.inner;

        self.enter(item, PipelineStage::Extracting).await;
        let media = inner
            .media
            .run(item, source)
            .await
            .map_err(|err| stage_error(item, PipelineStage::Extracting, err))?;
        inner.store.describe(&media.thumbnail).await;
        inner.store.describe(&media.audio).await;

        self.enter(item, PipelineStage::Transcribing).await;
        let transcript = inner
            .transcription
            .run(item, &media.audio)
            .await
            .map_err(|err| stage_error(item, PipelineStage::Transcribing, err))?;
        inner.store.describe(&transcript.path).await;

        self.enter(item, PipelineStage::Synthesizing).await;
        let synthesized_audio = inner
            .synthesis
            .run(item, &transcript.text)
            .await
            .map_err(|err| stage_error(item, PipelineStage::Synthesizing, err))?;
        inner.store.describe(&synthesized_audio).await;

        self.enter(item, PipelineStage::Remuxing).await;
        let final_video = inner
            .remux
            .run(item, source)
            .await
            .map_err(|err| stage_error(item, PipelineStage::Remuxing, err))?;
        inner.store.describe(&final_video).await;

        Ok(RunReport {
            item: item.to_string(),
            thumbnail: media.thumbnail,
            extracted_audio: media.audio,
            transcript: transcript.path,
            synthesized_audio,
            final_video,
        })
    }

    async fn enter(&self, item: &ItemName, stage: PipelineStage) {
        info!(item = %item, stage = %stage, "stage started");
        let name = item.to_string();
        self.record(move |runs| runs.advance(&name, stage).map(|_| ()))
            .await;
    }

    /// Registry writes never fail a run; artifacts remain authoritative.
    /// SQLite calls may wait on the busy timeout, so they run off the async workers.
    async fn record<F>(&self, update: F)
    where
        F: FnOnce(&RunStore) -> RunResult<()> + Send + 'static,
    {
        let Some(runs) = self.inner.runs.clone() else {
            return;
        };
        let path = runs.path().to_path_buf();
        match tokio::task::spawn_blocking(move || update(&runs)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(path = %path.display(), error = %err, "failed to update run registry")
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "run registry task aborted")
            }
        }
    }
}

fn stage_error(item: &ItemName, stage: PipelineStage, source: StageError) -> PipelineError {
    PipelineError::Stage {
        item: item.to_string(),
        stage,
        source,
    }
}

impl Submission {
    /// Waits for the background run to finish.
    pub async fn wait(self) -> PipelineResult<RunReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(PipelineError::Task {
                item: self.item.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
