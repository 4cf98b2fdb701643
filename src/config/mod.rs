use std::path::PathBuf;
use std::time::Duration;

// Network parameters
pub const NETWORK_NAME_MARKER: &str = "shelby";
pub const NETWORK_URL_MARKER: &str = "shelbynet";
pub const DEFAULT_RPC_URL: &str = "https://api.shelbynet.shelby.xyz/shelby";
pub const DEFAULT_INDEXER_URL: &str = "https://api.shelbynet.shelby.xyz/v1/graphql";
pub const EXPLORER_URL: &str = "https://explorer.shelby.xyz/shelbynet";

// Blob parameters
pub const CHUNKSET_SIZE: usize = 10 * 1_048_576; // 10 MiB
pub const COMMITMENT_SIZE: usize = 32;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const MIN_RETENTION_DAYS: i64 = 1;
pub const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

// Registration transaction
pub const REGISTER_MODULE: &str = "blob_metadata";
pub const REGISTER_FUNCTION: &str = "register_blob";
pub const MAX_GAS_AMOUNT: u64 = 200_000;
pub const GAS_UNIT_PRICE: u64 = 100;

// Video acquisition
pub const DEFAULT_QUALITY: &str = "best";
pub const SANITIZED_TITLE_MAX_LEN: usize = 100;
pub const TITLE_MATCH_PREFIX_LEN: usize = 20;
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";

// Server
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 2;

/// Number of chunksets the network expects for a blob of `size` bytes.
/// An empty blob still occupies one chunkset.
pub fn expected_chunksets(size: u64) -> u32 {
    let chunkset = CHUNKSET_SIZE as u64;
    (size.div_ceil(chunkset)).max(1) as u32
}

/// Clamp a requested retention period to the one-day minimum.
pub fn clamp_retention_days(days: i64) -> i64 {
    days.max(MIN_RETENTION_DAYS)
}

/// Runtime configuration shared by the CLI, the HTTP server and the orchestrator.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_url: String,
    pub indexer_url: String,
    pub api_key: Option<String>,
    /// Address of the account that publishes the blob metadata module.
    pub contract_address: Option<String>,
    pub download_dir: PathBuf,
    pub yt_dlp: String,
    pub aptos_profile: String,
    pub listen_addr: String,
    pub max_concurrent_downloads: usize,
    pub signature_timeout: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            indexer_url: DEFAULT_INDEXER_URL.to_string(),
            api_key: None,
            contract_address: None,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            yt_dlp: DEFAULT_YT_DLP.to_string(),
            aptos_profile: "default".to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            signature_timeout: None,
        }
    }
}
