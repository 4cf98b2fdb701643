mod ytdlp;

pub use ytdlp::YtDlp;

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::error::{Error, Result};

static VIDEO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+").expect("video url regex is valid")
});

static WATCH_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?youtube\.com/watch\?(?:[^#]*&)?v=([A-Za-z0-9_-]+)")
        .expect("watch url regex is valid")
});

static SHORT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?youtu\.be/([A-Za-z0-9_-]+)").expect("short url regex is valid")
});

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to run {tool}: {reason}")]
    Spawn { tool: String, reason: String },
    #[error("extraction tool exited with {status}")]
    ToolFailed { status: String, stderr: String },
    #[error("unreadable extraction output: {0}")]
    Parse(String),
}

impl ExtractError {
    /// Diagnostic text kept alongside the opaque failure.
    pub fn detail(&self) -> String {
        match self {
            Self::ToolFailed { status, stderr } => format!("{status}: {}", stderr.trim()),
            other => other.to_string(),
        }
    }
}

impl From<ExtractError> for Error {
    fn from(err: ExtractError) -> Self {
        Error::ExtractionFailed {
            detail: err.detail(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub quality: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
}

/// Video metadata as reported by the extraction tool. Never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<FormatInfo>,
}

/// Narrow interface over the external extraction tool.
#[async_trait]
pub trait VideoExtractor: Send + Sync {
    /// Fetch metadata only, without downloading.
    async fn extract(&self, url: &str) -> std::result::Result<VideoMetadata, ExtractError>;

    /// Download `url` using `output_template` (which may contain the tool's
    /// `%(ext)s` placeholder). Returns the final path when the tool reports it.
    async fn download(
        &self,
        url: &str,
        quality: &str,
        output_template: &Path,
    ) -> std::result::Result<Option<PathBuf>, ExtractError>;
}

/// A downloaded video ready to be uploaded.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub metadata: VideoMetadata,
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
}

/// Resolves video URLs to metadata and local files.
pub struct VideoAcquirer {
    extractor: Arc<dyn VideoExtractor>,
    download_dir: PathBuf,
}

impl VideoAcquirer {
    pub fn new(extractor: Arc<dyn VideoExtractor>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Metadata for `url`, including the available formats.
    pub async fn info(&self, url: &str) -> Result<VideoMetadata> {
        validate_video_url(url)?;
        let url = canonical_url(url);
        info!("fetching video info for {url}");
        Ok(self.extractor.extract(&url).await?)
    }

    /// Fetch metadata, then download the video into the download directory
    /// under `<sanitized title>_<id>.<ext>`.
    pub async fn acquire(&self, url: &str, quality: &str) -> Result<Acquisition> {
        validate_video_url(url)?;
        validate_quality(quality)?;
        let url = canonical_url(url);

        tokio::fs::create_dir_all(&self.download_dir).await?;

        let mut metadata = self.extractor.extract(&url).await?;
        metadata.formats.clear();
        if !is_safe_id(&metadata.id) {
            return Err(Error::ExtractionFailed {
                detail: format!("unexpected video id {:?}", metadata.id),
            });
        }

        let sanitized = sanitize_title(&metadata.title);
        let template = self
            .download_dir
            .join(format!("{sanitized}_{}.%(ext)s", metadata.id));
        info!("downloading {} ({quality}) to {}", metadata.id, template.display());

        let path = match self.extractor.download(&url, quality, &template).await? {
            Some(path) => {
                if is_file(&path).await {
                    path
                } else {
                    warn!("reported path {} does not exist, scanning download dir", path.display());
                    self.locate(&metadata.id, &sanitized).await?
                }
            }
            None => self.locate(&metadata.id, &sanitized).await?,
        };

        let size_bytes = tokio::fs::metadata(&path).await?.len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::not_found("downloaded file has no name"))?;
        info!("downloaded {} ({size_bytes} bytes)", path.display());

        Ok(Acquisition {
            metadata,
            path,
            filename,
            size_bytes,
        })
    }

    async fn locate(&self, id: &str, sanitized: &str) -> Result<PathBuf> {
        locate_download(&self.download_dir, id, sanitized)
            .await?
            .ok_or_else(|| Error::not_found("downloaded file not found"))
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Reject empty URLs and URLs that are not on a recognised video host.
pub fn validate_video_url(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::invalid("YouTube URL is required"));
    }
    if !VIDEO_URL_RE.is_match(url) {
        return Err(Error::invalid("Invalid YouTube URL"));
    }
    Ok(())
}

/// Rewrite watch and short links to `https://www.youtube.com/watch?v=<id>`,
/// dropping playlist and tracking parameters. Other URLs pass through.
pub fn canonical_url(url: &str) -> String {
    let url = url.trim();
    WATCH_URL_RE
        .captures(url)
        .or_else(|| SHORT_URL_RE.captures(url))
        .and_then(|c| c.get(1))
        .map(|id| format!("https://www.youtube.com/watch?v={}", id.as_str()))
        .unwrap_or_else(|| url.to_string())
}

fn validate_quality(quality: &str) -> Result<()> {
    let ok = !quality.is_empty()
        && !quality.starts_with('-')
        && quality
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+/[]<>=!*._-:".contains(c));
    if ok {
        Ok(())
    } else {
        Err(Error::invalid(format!("invalid quality selector {quality:?}")))
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Keep ASCII letters, digits, `-` and `_`; collapse whitespace runs to `_`;
/// cap the length.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    let truncated: String = joined.chars().take(config::SANITIZED_TITLE_MAX_LEN).collect();
    if truncated.is_empty() {
        "video".to_string()
    } else {
        truncated
    }
}

/// Find a finished download in `dir` whose name contains both the video id
/// and the start of the sanitized title, whatever its extension.
pub async fn locate_download(
    dir: &Path,
    id: &str,
    sanitized: &str,
) -> std::io::Result<Option<PathBuf>> {
    let prefix: String = sanitized.chars().take(config::TITLE_MATCH_PREFIX_LEN).collect();
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let regular = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        if regular
            && name.contains(id)
            && name.contains(&prefix)
            && !name.ends_with(".part")
            && !name.ends_with(".ytdl")
        {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}
