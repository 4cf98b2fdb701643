use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

use super::{access_url, BlobRecord, BlobStore, StoreError};

const ACCOUNT_BLOBS_QUERY: &str = "query AccountBlobs($owner: String!) { \
    blobs(where: { owner: { _eq: $owner } }) { owner blob_name size expires_at } }";

/// Blob store backed by the network's HTTP RPC and GraphQL indexer.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: Client,
    rpc_url: String,
    indexer_url: String,
    api_key: Option<String>,
}

impl HttpBlobStore {
    pub fn new(
        rpc_url: impl Into<String>,
        indexer_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            rpc_url: rpc_url.into(),
            indexer_url: indexer_url.into(),
            api_key,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorize(request).send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::Unreachable(err.to_string())
    } else {
        StoreError::Request(err.to_string())
    }
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<BlobsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct BlobsData {
    blobs: Vec<IndexedBlob>,
}

#[derive(Deserialize)]
struct IndexedBlob {
    owner: String,
    blob_name: String,
    size: u64,
    expires_at: i64,
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put_blob(&self, owner: &str, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let url = access_url(&self.rpc_url, owner, name);
        info!("uploading {} bytes to {}", data.len(), url);

        let request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec());
        self.send(request).await?;
        Ok(())
    }

    async fn get_blob(&self, owner: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let url = access_url(&self.rpc_url, owner, name);
        debug!("fetching {url}");
        let response = self.send(self.client.get(&url)).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn account_blobs(&self, owner: &str) -> Result<Vec<BlobRecord>, StoreError> {
        debug!("querying indexer for blobs owned by {owner}");
        let body = json!({
            "query": ACCOUNT_BLOBS_QUERY,
            "variables": { "owner": owner },
        });
        let response = self
            .send(self.client.post(&self.indexer_url).json(&body))
            .await?;
        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        if let Some(err) = parsed.errors.first() {
            return Err(StoreError::Decode(err.message.clone()));
        }
        let data = parsed
            .data
            .ok_or_else(|| StoreError::Decode("response has no data".into()))?;

        Ok(data
            .blobs
            .into_iter()
            .map(|b| BlobRecord {
                owner: b.owner,
                name: b.blob_name,
                size: b.size,
                expiration_micros: b.expires_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_blob, StoreFailureKind};
    use axum::body::Bytes;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use serde_json::Value;

    async fn put_handler(
        Path((owner, name)): Path<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        if headers.get("authorization").map(|h| h.as_bytes()) != Some(b"Bearer key-1") {
            return StatusCode::UNAUTHORIZED;
        }
        match name.as_str() {
            "flaky.bin" => StatusCode::INTERNAL_SERVER_ERROR,
            "huge.bin" => StatusCode::PAYLOAD_TOO_LARGE,
            _ if owner == "0xabc" && body.as_ref() == b"payload" => StatusCode::NO_CONTENT,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    async fn get_handler(Path((owner, name)): Path<(String, String)>) -> Result<Vec<u8>, StatusCode> {
        match (owner.as_str(), name.as_str()) {
            ("0xabc", "clip one.mp4") => Ok(b"stored bytes".to_vec()),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn graphql_handler(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["variables"]["owner"], "0xabc");
        Json(json!({
            "data": { "blobs": [
                { "owner": "0xabc", "blob_name": "@0xabc/clip.mp4", "size": 42, "expires_at": 1_000 }
            ]}
        }))
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/shelby/v1/blobs/{owner}/{name}", put(put_handler).get(get_handler))
            .route("/graphql", post(graphql_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn store(base: &str) -> HttpBlobStore {
        HttpBlobStore::new(
            format!("{base}/shelby"),
            format!("{base}/graphql"),
            Some("key-1".into()),
        )
    }

    #[tokio::test]
    async fn test_put_blob_success() {
        let base = spawn_server().await;
        store(&base)
            .put_blob("abc", "ok.bin", b"payload")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_blob_classifies_status() {
        let base = spawn_server().await;
        let s = store(&base);

        let err = s.put_blob("0xabc", "flaky.bin", b"x").await.unwrap_err();
        assert_eq!(err.kind(), StoreFailureKind::Transient);

        let err = s.put_blob("0xabc", "huge.bin", b"x").await.unwrap_err();
        assert_eq!(err.kind(), StoreFailureKind::PayloadTooLarge);

        let err = s.put_blob("0xabc", "other.bin", b"x").await.unwrap_err();
        assert_eq!(err.kind(), StoreFailureKind::Unknown);
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let s = store(&format!("http://{addr}"));
        let err = s.put_blob("0xabc", "ok.bin", b"payload").await.unwrap_err();
        assert_eq!(err.kind(), StoreFailureKind::Transient);
    }

    #[tokio::test]
    async fn test_get_blob_round_trip_and_missing() {
        let base = spawn_server().await;
        let s = store(&base);

        let bytes = read_blob(&s, "abc", "clip one.mp4").await.unwrap();
        assert_eq!(bytes, b"stored bytes");

        let err = s.get_blob("0xabc", "gone.mp4").await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 404, .. }));
        let err = read_blob(&s, "0xabc", "gone.mp4").await.unwrap_err();
        assert!(matches!(err, crate::error::Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_blob_unreachable_is_store_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = read_blob(&store(&format!("http://{addr}")), "0xabc", "a.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Store(StoreError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_account_blobs_parses_indexer() {
        let base = spawn_server().await;
        let blobs = store(&base).account_blobs("0xabc").await.unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].name, "@0xabc/clip.mp4");
        assert_eq!(blobs[0].size, 42);
        assert_eq!(blobs[0].expiration_micros, 1_000);
    }
}
