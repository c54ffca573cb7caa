//! Directory-per-kind artifact layout.
//!
//! Every artifact path is a pure function of the artifact kind and the item
//! name, so the presence of a file is enough to tell whether the stage that
//! writes it has finished for that item.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::config::{MediaSection, RedubConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid item name {0:?}")]
    InvalidItemName(String),
    #[error("unknown area {0:?}")]
    UnknownArea(String),
    #[error("no upload found for item {0}")]
    UploadNotFound(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Join key shared by every artifact of one submitted video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemName(String);

impl ItemName {
    pub fn new(value: impl Into<String>) -> StoreResult<Self> {
        let value = value.into();
        // The name is used verbatim in artifact paths and upload lookup.
        if value.is_empty()
            || value.trim() != value
            || value.starts_with('.')
            || value.contains(['/', '\\'])
            || value.contains('\0')
        {
            return Err(StoreError::InvalidItemName(value));
        }
        Ok(Self(value))
    }

    /// Derives the item name from an uploaded file name by stripping its extension.
    pub fn from_file_name(file_name: &str) -> StoreResult<Self> {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| StoreError::InvalidItemName(file_name.to_string()))?;
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Thumbnail,
    ExtractedAudio,
    Transcript,
    SynthesizedAudio,
    VideoOnly,
    FinalVideo,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::Thumbnail,
        ArtifactKind::ExtractedAudio,
        ArtifactKind::Transcript,
        ArtifactKind::SynthesizedAudio,
        ArtifactKind::VideoOnly,
        ArtifactKind::FinalVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Thumbnail => "thumbnail",
            ArtifactKind::ExtractedAudio => "extracted_audio",
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::SynthesizedAudio => "synthesized_audio",
            ArtifactKind::VideoOnly => "video_only",
            ArtifactKind::FinalVideo => "final_video",
        }
    }

    pub fn area(&self) -> StoreArea {
        match self {
            ArtifactKind::Thumbnail
            | ArtifactKind::ExtractedAudio
            | ArtifactKind::VideoOnly
            | ArtifactKind::FinalVideo => StoreArea::Processed,
            ArtifactKind::Transcript => StoreArea::Transcripts,
            ArtifactKind::SynthesizedAudio => StoreArea::Synthesized,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreArea {
    Uploads,
    Processed,
    Transcripts,
    Synthesized,
}

impl StoreArea {
    pub const ALL: [StoreArea; 4] = [
        StoreArea::Uploads,
        StoreArea::Processed,
        StoreArea::Transcripts,
        StoreArea::Synthesized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreArea::Uploads => "uploads",
            StoreArea::Processed => "processed",
            StoreArea::Transcripts => "transcripts",
            StoreArea::Synthesized => "synthesized",
        }
    }
}

impl fmt::Display for StoreArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreArea {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploads" => Ok(Self::Uploads),
            "processed" => Ok(Self::Processed),
            "transcripts" | "transcriptions" => Ok(Self::Transcripts),
            "synthesized" | "new_audio" => Ok(Self::Synthesized),
            other => Err(StoreError::UnknownArea(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreDirs {
    pub uploads: PathBuf,
    pub processed: PathBuf,
    pub transcripts: PathBuf,
    pub synthesized: PathBuf,
}

impl StoreDirs {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            uploads: root.join("uploads"),
            processed: root.join("processed"),
            transcripts: root.join("transcriptions"),
            synthesized: root.join("new_audio"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dirs: StoreDirs,
    media: MediaSection,
}

impl ArtifactStore {
    pub fn new(dirs: StoreDirs, media: MediaSection) -> Self {
        Self { dirs, media }
    }

    pub fn from_config(config: &RedubConfig) -> Self {
        let dirs = StoreDirs {
            uploads: config.uploads_dir(),
            processed: config.processed_dir(),
            transcripts: config.transcripts_dir(),
            synthesized: config.synthesized_dir(),
        };
        Self::new(dirs, config.media.clone())
    }

    pub fn media(&self) -> &MediaSection {
        &self.media
    }

    pub fn dir(&self, area: StoreArea) -> &Path {
        match area {
            StoreArea::Uploads => &self.dirs.uploads,
            StoreArea::Processed => &self.dirs.processed,
            StoreArea::Transcripts => &self.dirs.transcripts,
            StoreArea::Synthesized => &self.dirs.synthesized,
        }
    }

    /// Creates any missing area directory.
    pub async fn ensure_layout(&self) -> StoreResult<()> {
        for area in StoreArea::ALL {
            let dir = self.dir(area);
            if fs::metadata(dir).await.is_ok() {
                continue;
            }
            fs::create_dir_all(dir)
                .await
                .map_err(|source| StoreError::Io {
                    source,
                    path: dir.to_path_buf(),
                })?;
            info!(area = %area, path = %dir.display(), "created artifact directory");
        }
        Ok(())
    }

    pub fn artifact_path(&self, kind: ArtifactKind, item: &ItemName) -> PathBuf {
        let media = &self.media;
        let file_name = match kind {
            ArtifactKind::Thumbnail => {
                format!("{item}_thumbnail.{}", media.thumbnail_extension)
            }
            ArtifactKind::ExtractedAudio => format!("{item}.{}", media.audio_extension),
            ArtifactKind::Transcript => format!("{item}.txt"),
            ArtifactKind::SynthesizedAudio => format!("{item}_tts.{}", media.audio_extension),
            ArtifactKind::VideoOnly => {
                format!("{item}_temp_video.{}", media.output_extension)
            }
            ArtifactKind::FinalVideo => format!("{item}_new_audio.{}", media.output_extension),
        };
        self.dir(kind.area()).join(file_name)
    }

    pub fn upload_path(&self, file_name: &str) -> PathBuf {
        self.dirs.uploads.join(file_name)
    }

    pub async fn exists(&self, kind: ArtifactKind, item: &ItemName) -> bool {
        is_file(&self.artifact_path(kind, item)).await
    }

    /// Removes every artifact a previous run left behind for `item`.
    pub async fn clear_artifacts(&self, item: &ItemName) -> StoreResult<()> {
        for kind in ArtifactKind::ALL {
            let path = self.artifact_path(kind, item);
            match fs::remove_file(&path).await {
                Ok(()) => debug!(item = %item, kind = %kind, "removed stale artifact"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Io { source, path }),
            }
        }
        Ok(())
    }

    /// Finds the uploaded source for `item`, i.e. `uploads/<item>.<ext>`.
    pub async fn locate_upload(&self, item: &ItemName) -> StoreResult<PathBuf> {
        let dir = &self.dirs.uploads;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UploadNotFound(item.to_string()));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    source,
                    path: dir.clone(),
                })
            }
        };
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            source,
            path: dir.clone(),
        })? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !is_file(&path).await {
                continue;
            }
            let stem = Path::new(name.as_ref())
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string());
            if stem.as_deref() == Some(item.as_str()) {
                candidates.push(path);
            }
        }
        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::UploadNotFound(item.to_string()))
    }

    /// Logs whether `path` exists and how large it is.
    pub async fn describe(&self, path: &Path) {
        match fs::metadata(path).await {
            Ok(meta) => debug!(path = %path.display(), size = meta.len(), "artifact present"),
            Err(_) => debug!(path = %path.display(), "artifact missing"),
        }
    }
}

/// Sibling path an artifact is written to before being renamed into place.
///
/// The extension is preserved because the transcoder picks its muxer from it.
pub fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}"))
}

pub(crate) async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
