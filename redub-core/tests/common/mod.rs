#![allow(dead_code)]

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use redub_core::{
    load_redub_config, CommandExecutor, Orchestrator, RedubConfig, RunStore, SpeechSynthesizer,
    StageError, StageResult,
};

pub type RecordedCalls = Arc<Mutex<Vec<(String, Vec<String>)>>>;
type Rule = Box<dyn Fn(&str, &[String]) -> bool + Send + Sync>;

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

/// Fixture config rooted in `base`, with fast retries.
pub fn test_config(base: &TempDir) -> RedubConfig {
    let mut config = load_redub_config(fixture_path("configs/redub.toml")).unwrap();
    config.paths.base_dir = base.path().join("redub").to_string_lossy().to_string();
    for retry in [
        &mut config.transcoder.retry,
        &mut config.transcription.retry,
        &mut config.synthesis.retry,
    ] {
        retry.max_attempts = 1;
        retry.timeout_seconds = 10;
        retry.backoff_initial_ms = 1;
        retry.backoff_max_ms = 2;
    }
    config
}

pub fn run_store(config: &RedubConfig) -> RunStore {
    let store = RunStore::new(config.runs_db_path()).unwrap();
    store.initialize().unwrap();
    store
}

pub fn orchestrator(
    config: &RedubConfig,
    executor: &ScriptedExecutor,
    synthesizer: &FakeSynthesizer,
    runs: Option<RunStore>,
) -> Orchestrator {
    Orchestrator::with_capabilities(
        config,
        Arc::new(executor.clone()),
        Arc::new(synthesizer.clone()),
        runs,
    )
}

/// Writes `contents` as `uploads/<file_name>` and returns its path.
pub fn place_upload(config: &RedubConfig, file_name: &str, contents: &[u8]) -> PathBuf {
    let dir = config.uploads_dir();
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file_name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Stands in for ffmpeg and whisper by writing the files they would produce.
///
/// ffmpeg outputs are tagged copies of their inputs so tests can trace which
/// bytes ended up where.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    calls: RecordedCalls,
    failures: Arc<Mutex<Vec<Rule>>>,
    whisper_stderr: Arc<Mutex<Option<String>>>,
    transcript: Arc<Mutex<Option<String>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose program name ends with `program`.
    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name.ends_with(program))
            .map(|(_, args)| args)
            .collect()
    }

    /// Makes every call matching `rule` exit with status 1.
    pub fn fail_when<F>(&self, rule: F)
    where
        F: Fn(&str, &[String]) -> bool + Send + Sync + 'static,
    {
        self.failures.lock().unwrap().push(Box::new(rule));
    }

    pub fn whisper_writes_stderr(&self, text: &str) {
        *self.whisper_stderr.lock().unwrap() = Some(text.to_string());
    }

    pub fn transcript_text(&self, text: &str) {
        *self.transcript.lock().unwrap() = Some(text.to_string());
    }

    pub fn delay_each_call(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn ffmpeg(&self, args: &[String]) -> std::io::Result<()> {
        let inputs: Vec<&String> = args
            .windows(2)
            .filter(|pair| pair[0] == "-i")
            .map(|pair| &pair[1])
            .collect();
        let output = PathBuf::from(args.last().cloned().unwrap_or_default());
        let read = |path: &String| std::fs::read(path);
        let has = |flag: &str| args.iter().any(|arg| arg == flag);

        let mut bytes = Vec::new();
        if inputs.len() == 2 {
            bytes.extend_from_slice(&read(inputs[0])?);
            bytes.extend_from_slice(b"|audio:");
            bytes.extend_from_slice(&read(inputs[1])?);
        } else if has("-vf") {
            bytes.extend_from_slice(b"frame:");
            bytes.extend_from_slice(&read(inputs[0])?);
        } else if has("-vn") {
            bytes.extend_from_slice(b"track:");
            bytes.extend_from_slice(&read(inputs[0])?);
        } else if has("-an") {
            bytes.extend_from_slice(b"video:");
            bytes.extend_from_slice(&read(inputs[0])?);
        }
        std::fs::write(output, bytes)
    }

    fn whisper(&self, args: &[String]) -> std::io::Result<()> {
        let audio = Path::new(&args[0]);
        let output_dir = args
            .windows(2)
            .find(|pair| pair[0] == "--output_dir")
            .map(|pair| PathBuf::from(&pair[1]))
            .unwrap_or_default();
        let stem = audio.file_stem().unwrap().to_string_lossy().to_string();
        let text = self
            .transcript
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("transcript of {stem}"));
        std::fs::write(output_dir.join(format!("{stem}.txt")), text)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        let name = program.display().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((name.clone(), args.to_vec()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|rule| rule(&name, args));
        if failed {
            return Ok(Output {
                status: ExitStatus::from_raw(1 << 8),
                stdout: Vec::new(),
                stderr: b"scripted failure".to_vec(),
            });
        }
        let mut stderr = Vec::new();
        if name.ends_with("whisper") {
            self.whisper(args)?;
            if let Some(text) = self.whisper_stderr.lock().unwrap().clone() {
                stderr = text.into_bytes();
            }
        } else {
            self.ffmpeg(args)?;
        }
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr,
        })
    }
}

/// Returns `speech:<text>` as the audio payload and records every request.
#[derive(Clone, Default)]
pub struct FakeSynthesizer {
    requests: Arc<Mutex<Vec<String>>>,
    failure: Arc<Mutex<Option<u16>>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_with_status(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> StageResult<Vec<u8>> {
        self.requests.lock().unwrap().push(text.to_string());
        if let Some(status) = *self.failure.lock().unwrap() {
            return Err(StageError::Synthesis {
                status,
                body: "{\"detail\":\"quota exceeded\"}".into(),
            });
        }
        Ok(format!("speech:{text}").into_bytes())
    }
}
