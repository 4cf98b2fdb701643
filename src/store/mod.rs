mod http;

pub use http::HttpBlobStore;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use thiserror::Error;

use crate::config;

/// Characters left alone by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob store responded with HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("blob store unreachable: {0}")]
    Unreachable(String),
    #[error("blob store request failed: {0}")]
    Request(String),
    #[error("malformed blob store response: {0}")]
    Decode(String),
}

/// How a failed store call should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailureKind {
    /// Server-side or connectivity fault; retry the store step alone.
    Transient,
    /// Not retryable without reducing the input.
    PayloadTooLarge,
    /// Retryable with caution.
    Unknown,
}

impl StoreFailureKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::PayloadTooLarge)
    }
}

impl StoreError {
    pub fn kind(&self) -> StoreFailureKind {
        match self {
            Self::Status { status: 413, .. } => StoreFailureKind::PayloadTooLarge,
            Self::Status { status, .. } if (500..600).contains(status) => {
                StoreFailureKind::Transient
            }
            Self::Unreachable(_) => StoreFailureKind::Transient,
            _ => StoreFailureKind::Unknown,
        }
    }
}

/// A blob as reported by the network's account listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub owner: String,
    pub name: String,
    pub size: u64,
    pub expiration_micros: i64,
}

/// Raw blob storage keyed by `(owner, name)`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, owner: &str, name: &str, data: &[u8]) -> Result<(), StoreError>;

    async fn get_blob(&self, owner: &str, name: &str) -> Result<Vec<u8>, StoreError>;

    async fn account_blobs(&self, owner: &str) -> Result<Vec<BlobRecord>, StoreError>;
}

/// Ensure an account address carries the `0x` prefix.
pub fn format_owner(owner: &str) -> String {
    let owner = owner.trim();
    if owner.starts_with("0x") {
        owner.to_string()
    } else {
        format!("0x{owner}")
    }
}

/// Public download URL of a blob. Pure function of its key.
pub fn access_url(rpc_url: &str, owner: &str, name: &str) -> String {
    format!(
        "{}/v1/blobs/{}/{}",
        rpc_url.trim_end_matches('/'),
        format_owner(owner),
        utf8_percent_encode(name, URI_COMPONENT)
    )
}

/// Explorer page of a registration transaction.
pub fn explorer_transaction_url(transaction_hash: &str) -> String {
    format!("{}/txn/{transaction_hash}", config::EXPLORER_URL)
}

/// Explorer page of a blob under its owner account.
pub fn explorer_blob_url(owner: &str, name: &str) -> String {
    format!(
        "{}/account/{}/blobs?name={}",
        config::EXPLORER_URL,
        format_owner(owner),
        utf8_percent_encode(name, URI_COMPONENT)
    )
}

/// Strip an owner path prefix (`@0x.../name`) down to the bare logical name.
pub fn bare_blob_name(name: &str) -> &str {
    if name.starts_with('@') {
        name.rsplit('/').next().unwrap_or(name)
    } else {
        name
    }
}

/// One entry of `GET /list-videos`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListing {
    pub name: String,
    pub size: u64,
    pub owner: String,
    pub expiration_micros: i64,
    pub expiration_date: String,
    pub is_expired: bool,
    pub download_url: String,
}

impl VideoListing {
    pub fn from_record(record: &BlobRecord, rpc_url: &str, now: DateTime<Utc>) -> Self {
        let owner = format_owner(&record.owner);
        let name = bare_blob_name(&record.name).to_string();
        let expiration_date = DateTime::<Utc>::from_timestamp_micros(record.expiration_micros)
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();

        Self {
            download_url: access_url(rpc_url, &owner, &name),
            is_expired: is_expired(record.expiration_micros, now),
            name,
            size: record.size,
            owner,
            expiration_micros: record.expiration_micros,
            expiration_date,
        }
    }
}

pub fn is_expired(expiration_micros: i64, now: DateTime<Utc>) -> bool {
    expiration_micros < now.timestamp_micros()
}

/// List an account's blobs in display form.
pub async fn list_videos(
    store: &dyn BlobStore,
    rpc_url: &str,
    owner: &str,
) -> Result<Vec<VideoListing>, StoreError> {
    let now = Utc::now();
    let records = store.account_blobs(&format_owner(owner)).await?;
    Ok(records
        .iter()
        .map(|r| VideoListing::from_record(r, rpc_url, now))
        .collect())
}

/// Read a stored blob back. A blob the store does not know is `NotFound`.
pub async fn read_blob(
    store: &dyn BlobStore,
    owner: &str,
    name: &str,
) -> crate::error::Result<Vec<u8>> {
    let owner = format_owner(owner);
    store.get_blob(&owner, name).await.map_err(|e| match e {
        StoreError::Status { status: 404, .. } => {
            crate::error::Error::not_found(format!("blob {owner}/{name}"))
        }
        other => crate::error::Error::Store(other),
    })
}
