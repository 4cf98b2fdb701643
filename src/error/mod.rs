use thiserror::Error;

use crate::store::{StoreError, StoreFailureKind};

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a user-initiated action can fail.
///
/// Only `InvalidInput` is meant to be corrected and resubmitted by the caller.
/// The rest are surfaced as-is, with the transaction hash attached wherever one
/// was obtained, since nothing is ever rolled back automatically.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("video extraction failed")]
    ExtractionFailed {
        /// Raw diagnostic output of the extraction tool.
        detail: String,
    },

    #[error("wallet is connected to the wrong network (currently on: {reported}); switch to Shelbynet")]
    WrongNetwork { reported: String },

    #[error("transaction signature rejected: {0}")]
    SignatureRejected(String),

    #[error("blob registration failed: {0}")]
    RegistrationFailed(String),

    #[error("{}", storage_message(.kind, .transaction_hash, .source))]
    StorageFailed {
        transaction_hash: String,
        kind: StoreFailureKind,
        #[source]
        source: StoreError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("blob store error: {0}")]
    Store(#[source] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    /// Transaction hash attached to this error, if the failure happened after
    /// the registration transaction was submitted.
    pub fn transaction_hash(&self) -> Option<&str> {
        match self {
            Self::StorageFailed {
                transaction_hash, ..
            } => Some(transaction_hash),
            _ => None,
        }
    }
}

fn storage_message(kind: &StoreFailureKind, tx: &str, source: &StoreError) -> String {
    match kind {
        StoreFailureKind::Transient => format!(
            "the storage network is experiencing issues; the blob was registered on-chain but the upload failed, \
             retry the upload in a few minutes ({source}). Transaction: {tx}"
        ),
        StoreFailureKind::PayloadTooLarge => format!(
            "file size exceeds the storage network limits; try a smaller file or lower quality ({source}). Transaction: {tx}"
        ),
        StoreFailureKind::Unknown => {
            format!("upload to the storage network failed: {source}. Transaction was successful: {tx}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failure_message_carries_hash() {
        let err = Error::StorageFailed {
            transaction_hash: "0xabc".into(),
            kind: StoreFailureKind::Transient,
            source: StoreError::Status {
                status: 503,
                message: "unavailable".into(),
            },
        };
        assert!(err.to_string().contains("0xabc"));
        assert_eq!(err.transaction_hash(), Some("0xabc"));
    }

    #[test]
    fn test_too_large_message_carries_hash() {
        let err = Error::StorageFailed {
            transaction_hash: "0xdef".into(),
            kind: StoreFailureKind::PayloadTooLarge,
            source: StoreError::Status {
                status: 413,
                message: "too large".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("exceeds"));
        assert!(msg.contains("0xdef"));
    }

    #[test]
    fn test_other_errors_have_no_hash() {
        assert!(Error::invalid("bad url").transaction_hash().is_none());
        assert!(Error::SignatureRejected("no".into())
            .transaction_hash()
            .is_none());
    }
}
