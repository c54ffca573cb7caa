use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use redub_core::{
    load_redub_config, ArtifactDelivery, ArtifactStore, DeliveryArea, IngestedItem, Ingestor,
    ItemName, Orchestrator, RedubConfig, RunFilter, RunRecord, RunReport, RunState, RunStore,
    StatusReporter, StatusSnapshot, SubmissionAck,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] redub_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("run registry error: {0}")]
    Runs(#[from] redub_core::RunError),
    #[error("artifact store error: {0}")]
    Store(#[from] redub_core::StoreError),
    #[error("ingest error: {0}")]
    Ingest(#[from] redub_core::IngestError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] redub_core::PipelineError),
    #[error("delivery error ({}): {}", .0.status(), .0)]
    Delivery(#[from] redub_core::DeliveryError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Video re-dubbing pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to redub.toml
    #[arg(long, default_value = "configs/redub.toml")]
    pub config: PathBuf,
    /// Overrides paths.base_dir
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a local video and run the pipeline on it
    Submit(SubmitArgs),
    /// Download a video and run the pipeline on it
    Fetch(FetchArgs),
    /// Run the pipeline again for an already uploaded item
    Rerun(ItemArgs),
    /// Show artifact progress for an item
    Status(ItemArgs),
    /// List recorded runs
    Runs(RunsArgs),
    /// Show the response a byte-range request would get
    Range(RangeArgs),
    /// Check directories, binaries and credentials
    Health,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub url: String,
}

#[derive(Args, Debug)]
pub struct ItemArgs {
    pub item: String,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Filter by state (running, complete, failed)
    #[arg(long)]
    pub state: Option<String>,
    /// Maximum number of rows
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    /// uploads or processed
    pub area: String,
    pub file: String,
    /// Range header value, e.g. bytes=0-99
    #[arg(long)]
    pub range: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Submit(args) => {
            let orchestrator = context.orchestrator()?;
            let ingested = context.ingestor()?.accept_upload(&args.file).await?;
            let result = context.process(&orchestrator, ingested).await?;
            render(&result, cli.format)?;
        }
        Commands::Fetch(args) => {
            let orchestrator = context.orchestrator()?;
            let ingested = context.ingestor()?.fetch_url(&args.url).await?;
            let result = context.process(&orchestrator, ingested).await?;
            render(&result, cli.format)?;
        }
        Commands::Rerun(args) => {
            let result = context.rerun(&args.item).await?;
            render(&result, cli.format)?;
        }
        Commands::Status(args) => {
            let snapshot = context.status(&args.item).await?;
            render(&snapshot, cli.format)?;
        }
        Commands::Runs(args) => {
            let runs = context.runs(args)?;
            render(&runs, cli.format)?;
        }
        Commands::Range(args) => {
            let head = context.range(args).await?;
            render(&head, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: RedubConfig,
    config_path: PathBuf,
    store: ArtifactStore,
    runs_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut config = load_redub_config(&config_path)?;
        if let Some(base_dir) = &cli.base_dir {
            config.paths.base_dir = base_dir.to_string_lossy().to_string();
        }
        config.apply_env();
        config.validate()?;
        let store = ArtifactStore::from_config(&config);
        let runs_db = config.runs_db_path();
        Ok(Self {
            config,
            config_path,
            store,
            runs_db,
        })
    }

    fn run_store(&self) -> Result<RunStore> {
        let store = RunStore::new(&self.runs_db)?;
        store.initialize()?;
        Ok(store)
    }

    fn ingestor(&self) -> Result<Ingestor> {
        Ok(Ingestor::new(self.store.clone())?)
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(Orchestrator::from_config(&self.config, Some(self.run_store()?))?)
    }

    /// Hands the item to the orchestrator and waits for the background run,
    /// since the process would otherwise exit underneath it.
    async fn process(
        &self,
        orchestrator: &Orchestrator,
        ingested: IngestedItem,
    ) -> Result<SubmitResult> {
        let submission = orchestrator.submit(ingested.item.clone(), ingested.source_path);
        let ack = submission.ack.clone();
        info!(item = %ack.item, "{}", ack.message);
        let report = submission.wait().await?;
        let snapshot = self.status(ingested.item.as_str()).await?;
        Ok(SubmitResult {
            ack,
            report,
            snapshot,
        })
    }

    async fn rerun(&self, item: &str) -> Result<SubmitResult> {
        let orchestrator = self.orchestrator()?;
        let item = ItemName::new(item)?;
        let source = self.store.locate_upload(&item).await?;
        let original_filename = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        self.process(
            &orchestrator,
            IngestedItem {
                item,
                source_path: source,
                original_filename,
            },
        )
        .await
    }

    async fn status(&self, item: &str) -> Result<StatusSnapshot> {
        let item = ItemName::new(item)?;
        let runs = if self.runs_db.exists() {
            Some(RunStore::new(&self.runs_db)?)
        } else {
            None
        };
        Ok(StatusReporter::new(self.store.clone(), runs)
            .snapshot(&item)
            .await)
    }

    fn runs(&self, args: &RunsArgs) -> Result<RunList> {
        let state = args
            .state
            .as_deref()
            .map(str::parse::<RunState>)
            .transpose()?;
        if !self.runs_db.exists() {
            return Ok(RunList { rows: Vec::new() });
        }
        let rows = RunStore::new(&self.runs_db)?.list(&RunFilter {
            state,
            limit: Some(args.limit),
        })?;
        Ok(RunList { rows })
    }

    async fn range(&self, args: &RangeArgs) -> Result<RangeHead> {
        let area: DeliveryArea = args.area.parse()?;
        let response = ArtifactDelivery::new(self.store.clone())
            .open(area, &args.file, args.range.as_deref())
            .await?;
        Ok(RangeHead {
            status: response.status,
            headers: response
                .headers()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_path("redub.toml", &self.config_path));
        for (name, path) in [
            ("uploads", self.config.uploads_dir()),
            ("processed", self.config.processed_dir()),
            ("transcriptions", self.config.transcripts_dir()),
            ("new_audio", self.config.synthesized_dir()),
            ("data", self.config.data_dir()),
        ] {
            results.push(self.check_directory(name, &path));
        }
        results.push(self.check_binary("ffmpeg", &self.config.transcoder.ffmpeg));
        results.push(self.check_binary("whisper", &self.config.transcription.binary));
        if self.config.synthesis.api_key.trim().is_empty() {
            results.push(HealthEntry::warn(
                "synthesis api key",
                format!(
                    "not set; export {} before submitting",
                    redub_core::config::ENV_SYNTHESIS_API_KEY
                ),
            ));
        } else {
            results.push(HealthEntry::ok("synthesis api key", "configured"));
        }
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} missing", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::error(
                name,
                format!("{path} is not a directory", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(
                name,
                format!("{path} not found, created on first run", path = path.display()),
            ),
        }
    }

    fn check_binary(&self, name: &str, program: &str) -> HealthEntry {
        match resolve_binary(program) {
            Some(path) => HealthEntry::ok(name, format!("{}", path.display())),
            None => HealthEntry::error(name, format!("{program} not found on PATH")),
        }
    }
}

fn resolve_binary(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub ack: SubmissionAck,
    pub report: RunReport,
    pub snapshot: StatusSnapshot,
}

impl DisplayFallback for SubmitResult {
    fn display(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.ack.item, self.ack.message)];
        lines.push(format!("final video: {}", self.report.final_video.display()));
        lines.push(format!("transcript: {}", self.report.transcript.display()));
        lines.push(self.snapshot.display());
        lines.join("\n")
    }
}

impl DisplayFallback for StatusSnapshot {
    fn display(&self) -> String {
        let flag = |ready: bool| if ready { "yes" } else { "no" };
        let mut lines = vec![
            format!("Item: {} ({})", self.item, self.label()),
            format!("  thumbnail ready: {}", flag(self.thumbnail_ready)),
            format!("  audio extracted: {}", flag(self.audio_extracted)),
            format!(
                "  synthesized audio ready: {}",
                flag(self.synthesized_audio_ready)
            ),
            format!("  final video ready: {}", flag(self.final_video_ready)),
        ];
        if let Some(stage) = self.stage {
            lines.push(format!("  last stage: {stage}"));
        }
        if let Some(reason) = &self.failure_reason {
            lines.push(format!("  failure: {reason}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RunList {
    pub rows: Vec<RunRecord>,
}

impl DisplayFallback for RunList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No runs recorded".to_string();
        }
        let mut lines = vec!["Runs:".to_string()];
        for row in &self.rows {
            let mut line = format!(
                "- {} [{}] stage={} attempt={} updated={}",
                row.item_name,
                row.state,
                row.stage,
                row.attempt,
                row.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(reason) = &row.failure_reason {
                line.push_str(&format!(" reason={reason}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RangeHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl DisplayFallback for RangeHead {
    fn display(&self) -> String {
        let mut lines = vec![format!("HTTP {}", self.status)];
        for (name, value) in &self.headers {
            lines.push(format!("{name}: {value}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
