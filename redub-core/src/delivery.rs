//! Serves uploaded and processed files with HTTP range semantics.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom, Take};

use crate::store::ArtifactStore;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("area {0} is not served")]
    UnservedArea(String),
    #[error("range {header:?} not satisfiable for {total} bytes")]
    Unsatisfiable { header: String, total: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl DeliveryError {
    /// HTTP status the error maps to.
    pub fn status(&self) -> u16 {
        match self {
            DeliveryError::NotFound(_) => 404,
            DeliveryError::InvalidName(_) | DeliveryError::UnservedArea(_) => 400,
            DeliveryError::Unsatisfiable { .. } => 416,
            DeliveryError::Io { .. } => 500,
        }
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Inclusive byte span within a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parses a `Range` header value against a file of `total` bytes.
    ///
    /// Only the first range of a multi-range request is honored.
    pub fn parse(header: &str, total: u64) -> DeliveryResult<Self> {
        let unsatisfiable = || DeliveryError::Unsatisfiable {
            header: header.to_string(),
            total,
        };
        let value = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(unsatisfiable)?;
        let first = value.split(',').next().unwrap_or_default().trim();
        let (start, end) = first.split_once('-').ok_or_else(unsatisfiable)?;
        let (start, end) = (start.trim(), end.trim());
        if total == 0 {
            return Err(unsatisfiable());
        }
        let last = total - 1;

        if start.is_empty() {
            let suffix: u64 = end.parse().map_err(|_| unsatisfiable())?;
            if suffix == 0 {
                return Err(unsatisfiable());
            }
            return Ok(Self {
                start: total.saturating_sub(suffix),
                end: last,
            });
        }

        let start: u64 = start.parse().map_err(|_| unsatisfiable())?;
        let end = if end.is_empty() {
            last
        } else {
            end.parse::<u64>().map_err(|_| unsatisfiable())?.min(last)
        };
        if start > last || start > end {
            return Err(unsatisfiable());
        }
        Ok(Self { start, end })
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryArea {
    Uploads,
    Processed,
}

impl std::str::FromStr for DeliveryArea {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploads" => Ok(Self::Uploads),
            "processed" => Ok(Self::Processed),
            other => Err(DeliveryError::UnservedArea(other.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct DeliveryResponse {
    pub status: u16,
    pub content_length: u64,
    pub total_size: u64,
    pub content_range: Option<String>,
    pub content_type: &'static str,
    pub accept_ranges: &'static str,
    pub body: Take<File>,
}

impl DeliveryResponse {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if let Some(range) = &self.content_range {
            headers.push(("Content-Range", range.clone()));
        }
        headers.push(("Accept-Ranges", self.accept_ranges.to_string()));
        headers.push(("Content-Length", self.content_length.to_string()));
        headers.push(("Content-Type", self.content_type.to_string()));
        headers
    }

    pub async fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.content_length as usize);
        self.body.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactDelivery {
    store: ArtifactStore,
}

impl ArtifactDelivery {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub async fn open(
        &self,
        area: DeliveryArea,
        file_name: &str,
        range: Option<&str>,
    ) -> DeliveryResult<DeliveryResponse> {
        // Dot-prefixed names are staging files that are still being written.
        if file_name.is_empty()
            || file_name.starts_with('.')
            || file_name.contains(['/', '\\', '\0'])
        {
            return Err(DeliveryError::InvalidName(file_name.to_string()));
        }
        let dir = match area {
            DeliveryArea::Uploads => self.store.dir(crate::store::StoreArea::Uploads),
            DeliveryArea::Processed => self.store.dir(crate::store::StoreArea::Processed),
        };
        let path = dir.join(file_name);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeliveryError::NotFound(file_name.to_string()))
            }
            Err(source) => return Err(DeliveryError::Io { source, path }),
        };
        let metadata = file.metadata().await.map_err(|source| DeliveryError::Io {
            source,
            path: path.clone(),
        })?;
        if !metadata.is_file() {
            return Err(DeliveryError::NotFound(file_name.to_string()));
        }
        let total = metadata.len();
        let content_type = content_type_for(&path);

        match range {
            Some(header) => {
                let range = ByteRange::parse(header, total)?;
                file.seek(SeekFrom::Start(range.start))
                    .await
                    .map_err(|source| DeliveryError::Io {
                        source,
                        path: path.clone(),
                    })?;
                Ok(DeliveryResponse {
                    status: 206,
                    content_length: range.len(),
                    total_size: total,
                    content_range: Some(range.content_range(total)),
                    content_type,
                    accept_ranges: "bytes",
                    body: file.take(range.len()),
                })
            }
            None => Ok(DeliveryResponse {
                status: 200,
                content_length: total,
                total_size: total,
                content_range: None,
                content_type,
                accept_ranges: "bytes",
                body: file.take(total),
            }),
        }
    }
}

/// Content type served for `path`. Unknown extensions are served as MP4.
pub fn content_type_for(path: &Path) -> &'static str {
    guess_media_type(path).unwrap_or("video/mp4")
}

/// Media type implied by the file extension, if it is one we know.
pub fn guess_media_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let media_type = match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html",
        _ => return None,
    };
    Some(media_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_open_and_suffix_ranges() {
        assert_eq!(
            ByteRange::parse("bytes=0-99", 1000).unwrap(),
            ByteRange { start: 0, end: 99 }
        );
        assert_eq!(
            ByteRange::parse("bytes=900-", 1000).unwrap(),
            ByteRange { start: 900, end: 999 }
        );
        assert_eq!(
            ByteRange::parse("bytes=-100", 1000).unwrap(),
            ByteRange { start: 900, end: 999 }
        );
        assert_eq!(
            ByteRange::parse("bytes=-5000", 1000).unwrap(),
            ByteRange { start: 0, end: 999 }
        );
    }

    #[test]
    fn clamps_end_and_takes_first_of_many() {
        let range = ByteRange::parse("bytes=990-2000", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 990, end: 999 });
        assert_eq!(range.len(), 10);
        let first = ByteRange::parse("bytes=10-19, 50-59", 1000).unwrap();
        assert_eq!(first, ByteRange { start: 10, end: 19 });
        assert_eq!(first.content_range(1000), "bytes 10-19/1000");
    }

    #[test]
    fn rejects_unsatisfiable_ranges() {
        for header in ["bytes=1000-", "bytes=50-10", "items=0-1", "bytes=abc", "bytes=-0"] {
            let err = ByteRange::parse(header, 1000).unwrap_err();
            assert_eq!(err.status(), 416, "{header}");
        }
        assert!(ByteRange::parse("bytes=0-", 0).is_err());
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("a_thumbnail.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a.MP3")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("a_new_audio.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("noext")), "video/mp4");
        assert_eq!(guess_media_type(Path::new("page.html")), Some("text/html"));
        assert_eq!(guess_media_type(Path::new("archive.bin")), None);
    }
}
