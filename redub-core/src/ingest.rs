use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::delivery::guess_media_type;
use crate::store::{staging_path, ArtifactStore, ItemName, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no file at {0}")]
    MissingFile(PathBuf),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid item name derived from {0:?}")]
    InvalidName(String),
    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// A video placed in the upload area and ready to be submitted.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedItem {
    pub item: ItemName,
    pub source_path: PathBuf,
    pub original_filename: String,
}

#[derive(Clone)]
pub struct Ingestor {
    store: ArtifactStore,
    http_client: Client,
}

impl Ingestor {
    pub fn new(store: ArtifactStore) -> IngestResult<Self> {
        let http_client = Client::builder()
            .user_agent("redub/0.1")
            .build()
            .map_err(|err| IngestError::Fetch {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { store, http_client })
    }

    /// Brings a local file into the upload area.
    pub async fn accept_upload(&self, path: &Path) -> IngestResult<IngestedItem> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|_| IngestError::MissingFile(path.to_path_buf()))?;
        if !metadata.is_file() {
            return Err(IngestError::MissingFile(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::InvalidName(path.display().to_string()))?
            .to_string();
        let item = item_for(&file_name)?;
        self.store.ensure_layout().await?;

        let destination = self.store.upload_path(&file_name);
        if !same_file(path, &destination).await {
            copy_into_place(path, &destination).await?;
        }
        info!(item = %item, path = %destination.display(), "upload accepted");
        self.store.describe(&destination).await;
        Ok(IngestedItem {
            item,
            source_path: destination,
            original_filename: file_name,
        })
    }

    /// Downloads `url` into the upload area. `file://` URLs are copied.
    pub async fn fetch_url(&self, url: &str) -> IngestResult<IngestedItem> {
        let invalid = |reason: &str| IngestError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let parsed = Url::parse(url).map_err(|err| invalid(&err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return Err(invalid("unsupported scheme"));
        }
        let file_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| invalid("url has no file name"))?
            .to_string();
        let item = item_for(&file_name)?;

        match guess_media_type(Path::new(&file_name)) {
            Some(media_type) if media_type.starts_with("video/") => {
                debug!(url, media_type, "remote file looks like video")
            }
            other => warn!(url, media_type = ?other, "remote file might not be a video"),
        }

        self.store.ensure_layout().await?;
        let destination = self.store.upload_path(&file_name);
        if parsed.scheme() == "file" {
            let source = parsed
                .to_file_path()
                .map_err(|_| invalid("invalid file url"))?;
            if !fs::metadata(&source).await.map(|m| m.is_file()).unwrap_or(false) {
                return Err(IngestError::MissingFile(source));
            }
            copy_into_place(&source, &destination).await?;
        } else {
            self.download(url, &destination).await?;
        }
        info!(item = %item, url, path = %destination.display(), "remote video fetched");
        self.store.describe(&destination).await;
        Ok(IngestedItem {
            item,
            source_path: destination,
            original_filename: file_name,
        })
    }

    async fn download(&self, url: &str, destination: &Path) -> IngestResult<()> {
        let fetch_error = |reason: String| IngestError::Fetch {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("unexpected status {status}")));
        }
        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            debug!(url, content_type = ?content_type, "remote content type");
        }

        let staged = staging_path(destination);
        let io_error = |source: std::io::Error| IngestError::Io {
            source,
            path: staged.clone(),
        };
        let result = async {
            let mut file = fs::File::create(&staged).await.map_err(io_error)?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let data = chunk.map_err(|err| fetch_error(err.to_string()))?;
                file.write_all(&data).await.map_err(io_error)?;
            }
            file.flush().await.map_err(io_error)?;
            Ok::<_, IngestError>(())
        }
        .await;
        if let Err(err) = result {
            let _ = fs::remove_file(&staged).await;
            return Err(err);
        }
        fs::rename(&staged, destination)
            .await
            .map_err(|source| IngestError::Io {
                source,
                path: destination.to_path_buf(),
            })
    }
}

fn item_for(file_name: &str) -> IngestResult<ItemName> {
    ItemName::from_file_name(file_name).map_err(|_| IngestError::InvalidName(file_name.to_string()))
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn copy_into_place(source: &Path, destination: &Path) -> IngestResult<()> {
    let staged = staging_path(destination);
    fs::copy(source, &staged)
        .await
        .map_err(|err| IngestError::Io {
            source: err,
            path: staged.clone(),
        })?;
    fs::rename(&staged, destination)
        .await
        .map_err(|source| IngestError::Io {
            source,
            path: destination.to_path_buf(),
        })
}
