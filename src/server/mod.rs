mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;

use crate::acquire::VideoAcquirer;
use crate::error::Error;
use crate::store::BlobStore;

/// Shared state behind every route.
pub struct AppState {
    acquirer: VideoAcquirer,
    store: Arc<dyn BlobStore>,
    rpc_url: String,
    downloads: Semaphore,
}

impl AppState {
    /// `max_concurrent_downloads` bounds how many acquisitions run at once;
    /// further requests wait for a slot.
    pub fn new(
        acquirer: VideoAcquirer,
        store: Arc<dyn BlobStore>,
        rpc_url: impl Into<String>,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self {
            acquirer,
            store,
            rpc_url: rpc_url.into(),
            downloads: Semaphore::new(max_concurrent_downloads.max(1)),
        }
    }

    fn download_dir(&self) -> PathBuf {
        self.acquirer.download_dir().to_path_buf()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/download", post(handlers::download))
        .route("/video-info", post(handlers::video_info))
        .route("/get-file", get(handlers::get_file))
        .route("/list-videos", get(handlers::list_videos))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ExtractionFailed { detail } => {
                error!("extraction failed: {detail}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;
