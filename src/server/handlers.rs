use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;

use super::{ApiError, ApiResult, AppState};
use crate::config;
use crate::error::Error;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    filepath: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    account: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadInfo {
    filename: String,
    filepath: String,
    size: u64,
    downloaded_at: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

fn required_url(url: Option<String>) -> ApiResult<String> {
    url.filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::invalid("YouTube URL is required").into())
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = body(payload)?;
    let url = required_url(request.url)?;
    let quality = request
        .quality
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| config::DEFAULT_QUALITY.to_string());

    let _permit = state
        .downloads
        .acquire()
        .await
        .map_err(|_| ApiError::internal("server is shutting down"))?;
    let acquisition = state.acquirer.acquire(&url, &quality).await?;

    let filepath = tokio::fs::canonicalize(&acquisition.path)
        .await
        .unwrap_or_else(|_| acquisition.path.clone());
    let info = DownloadInfo {
        filename: acquisition.filename,
        filepath: filepath.to_string_lossy().into_owned(),
        size: acquisition.size_bytes,
        downloaded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    Ok(Json(json!({
        "success": true,
        "videoInfo": acquisition.metadata,
        "downloadInfo": info,
    })))
}

pub async fn video_info(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = body(payload)?;
    let url = required_url(request.url)?;
    let metadata = state.acquirer.info(&url).await?;
    Ok(Json(json!({
        "success": true,
        "videoInfo": metadata,
    })))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    let requested = query
        .filepath
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("File path is required"))?;
    let path = resolve_in_dir(&state.download_dir(), &requested).await?;

    let file = tokio::fs::File::open(&path).await.map_err(Error::from)?;
    let size = file.metadata().await.map_err(Error::from)?.len();
    info!("serving {} ({size} bytes)", path.display());

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Some(disposition) = attachment(&path) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

pub async fn list_videos(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let account = query
        .account
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Account address is required"))?;

    let videos = store::list_videos(state.store.as_ref(), &state.rpc_url, &account)
        .await
        .map_err(|e| {
            warn!("listing blobs for {account} failed: {e}");
            ApiError::internal(format!("failed to list videos: {e}"))
        })?;
    Ok(Json(json!({
        "success": true,
        "total": videos.len(),
        "videos": videos,
    })))
}

/// Resolve `requested` to an existing file inside `dir`. Relative paths are
/// taken relative to `dir`. Anything that escapes it is reported as missing.
async fn resolve_in_dir(dir: &Path, requested: &str) -> Result<PathBuf, Error> {
    let missing = || Error::not_found("File not found");
    let root = tokio::fs::canonicalize(dir).await.map_err(|_| missing())?;
    let candidate = Path::new(requested);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| missing())?;
    if !resolved.starts_with(&root) {
        warn!("refusing to serve {} outside {}", resolved.display(), root.display());
        return Err(missing());
    }
    let meta = tokio::fs::metadata(&resolved).await.map_err(|_| missing())?;
    if !meta.is_file() {
        return Err(missing());
    }
    Ok(resolved)
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn attachment(path: &Path) -> Option<HeaderValue> {
    let name = path.file_name()?.to_string_lossy().replace(['"', '\\'], "_");
    HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")).ok()
}
