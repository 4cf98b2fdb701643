pub mod acquire;
pub mod chain;
pub mod commitment;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod upload;
pub mod wallet;

pub use acquire::{VideoAcquirer, YtDlp};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use store::HttpBlobStore;
pub use upload::{UploadFailure, UploadOrchestrator, UploadReceipt, UploadState};
pub use wallet::{AptosCliSigner, WalletSession};
