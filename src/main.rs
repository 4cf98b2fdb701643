use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use shelbytube::acquire::{VideoAcquirer, YtDlp};
use shelbytube::chain::RegistrationBuilder;
use shelbytube::commitment::{ContentAddresser, MerkleAddresser};
use shelbytube::config::{
    AppConfig, DEFAULT_DOWNLOAD_DIR, DEFAULT_INDEXER_URL, DEFAULT_LISTEN_ADDR,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_QUALITY, DEFAULT_RETENTION_DAYS, DEFAULT_RPC_URL,
    DEFAULT_YT_DLP,
};
use shelbytube::server::{self, AppState};
use shelbytube::store::{self, HttpBlobStore};
use shelbytube::upload::{SpinnerHook, UploadFailure, UploadOrchestrator, UploadReceipt};
use shelbytube::wallet::{AptosCliSigner, WalletSession, WalletSigner};

/// shelbytube: download videos with yt-dlp and store them as blobs on Shelby.
#[derive(Parser)]
#[command(name = "shelbytube", version, about)]
struct Cli {
    /// Shelby RPC base URL
    #[arg(long, env = "SHELBY_RPC_URL", default_value = DEFAULT_RPC_URL, global = true)]
    rpc_url: String,

    /// Indexer GraphQL endpoint used for account listings
    #[arg(long, env = "SHELBY_INDEXER_URL", default_value = DEFAULT_INDEXER_URL, global = true)]
    indexer_url: String,

    /// API key sent to the Shelby RPC
    #[arg(long, env = "SHELBY_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Address that publishes the blob metadata module
    #[arg(long, env = "SHELBY_CONTRACT_ADDRESS", global = true)]
    contract_address: Option<String>,

    /// Directory downloaded videos are written to
    #[arg(long, env = "SHELBYTUBE_DOWNLOAD_DIR", default_value = DEFAULT_DOWNLOAD_DIR, global = true)]
    download_dir: PathBuf,

    /// yt-dlp executable
    #[arg(long, env = "YT_DLP", default_value = DEFAULT_YT_DLP, global = true)]
    yt_dlp: String,

    /// Aptos CLI profile used to sign registrations
    #[arg(long, env = "APTOS_PROFILE", default_value = "default", global = true)]
    aptos_profile: String,

    /// Give up on a pending signature after this many seconds
    #[arg(long, global = true)]
    signature_timeout: Option<u64>,

    /// Submit registrations without the interactive confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
        listen: String,

        /// Downloads allowed to run at the same time
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_DOWNLOADS)]
        max_concurrent_downloads: usize,
    },

    /// Print video metadata as JSON
    Info {
        url: String,
    },

    /// Download a video into the download directory
    Download {
        url: String,

        /// yt-dlp format selector
        #[arg(short, long, default_value = DEFAULT_QUALITY)]
        quality: String,
    },

    /// Register and store a local file
    Upload {
        file: PathBuf,

        /// Blob name (default: the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Retention in days
        #[arg(short, long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: i64,
    },

    /// Download a video, then register and store it
    Fetch {
        url: String,

        /// yt-dlp format selector
        #[arg(short, long, default_value = DEFAULT_QUALITY)]
        quality: String,

        /// Retention in days
        #[arg(short, long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: i64,
    },

    /// List the blobs stored by an account
    List {
        account: String,
    },

    /// Download a stored blob
    Get {
        owner: String,
        name: String,

        /// Output path (default: the blob name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the unsigned registration payload for a file, for signing in a wallet
    Prepare {
        file: PathBuf,

        /// Account that will own the blob
        #[arg(long)]
        owner: String,

        /// Blob name (default: the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Retention in days
        #[arg(short, long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: i64,
    },

    /// Repeat only the storage step of an upload whose registration succeeded
    RetryStore {
        file: PathBuf,

        /// Blob name used at registration
        #[arg(short, long)]
        name: String,

        /// Registration transaction hash
        #[arg(long)]
        tx: String,
    },
}

impl Cli {
    fn config(&self) -> AppConfig {
        AppConfig {
            rpc_url: self.rpc_url.clone(),
            indexer_url: self.indexer_url.clone(),
            api_key: self.api_key.clone(),
            contract_address: self.contract_address.clone(),
            download_dir: self.download_dir.clone(),
            yt_dlp: self.yt_dlp.clone(),
            aptos_profile: self.aptos_profile.clone(),
            signature_timeout: self.signature_timeout.map(Duration::from_secs),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    for file in [".env.local", ".env"] {
        if dotenvy::from_filename(file).is_ok() {
            eprintln!("loaded environment from {file}");
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut cfg = cli.config();

    match cli.command {
        Commands::Serve {
            listen,
            max_concurrent_downloads,
        } => {
            cfg.listen_addr = listen;
            cfg.max_concurrent_downloads = max_concurrent_downloads;
            serve(&cfg).await?;
        }

        Commands::Info { url } => {
            let metadata = acquirer(&cfg).info(&url).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }

        Commands::Download { url, quality } => {
            let acquisition = acquirer(&cfg).acquire(&url, &quality).await?;
            println!(
                "Downloaded {} → {} ({} bytes)",
                acquisition.metadata.title,
                acquisition.path.display(),
                acquisition.size_bytes
            );
        }

        Commands::Upload { file, name, days } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&file)?,
            };
            upload_file(&cfg, cli.yes, &file, &name, days).await?;
        }

        Commands::Fetch { url, quality, days } => {
            let acquisition = acquirer(&cfg).acquire(&url, &quality).await?;
            info!(
                "downloaded {} ({} bytes)",
                acquisition.filename, acquisition.size_bytes
            );
            upload_file(&cfg, cli.yes, &acquisition.path, &acquisition.filename, days).await?;
        }

        Commands::List { account } => {
            let store = blob_store(&cfg);
            let videos = store::list_videos(store.as_ref(), &cfg.rpc_url, &account)
                .await
                .with_context(|| format!("failed to list blobs for {account}"))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "videos": videos,
                    "total": videos.len(),
                }))?
            );
        }

        Commands::Get {
            owner,
            name,
            output,
        } => {
            let data = store::read_blob(blob_store(&cfg).as_ref(), &owner, &name).await?;
            let output = match output {
                Some(path) => path,
                None => PathBuf::from(file_name(Path::new(store::bare_blob_name(&name)))?),
            };
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("Fetched {} bytes → {}", data.len(), output.display());
        }

        Commands::Prepare {
            file,
            owner,
            name,
            days,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&file)?,
            };
            let data = read_file(&file).await?;
            let commitment = MerkleAddresser::default().commit(&data);
            let payload = registration_builder(&cfg)?.build(
                &store::format_owner(&owner),
                &name,
                &commitment,
                days,
                chrono::Utc::now(),
            )?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "merkleRoot": commitment.root_hex(),
                    "numChunksets": commitment.num_chunksets,
                    "size": commitment.raw_size,
                    "payload": payload.to_wallet_json(),
                }))?
            );
        }

        Commands::RetryStore { file, name, tx } => {
            let (wallet, session) = connect_wallet(&cfg, cli.yes).await?;
            let data = read_file(&file).await?;
            let receipt = orchestrator(&cfg, wallet)?
                .retry_store(&session, &data, &name, &tx)
                .await
                .map_err(report_failure)?;
            print_receipt(&receipt);
        }
    }

    Ok(())
}

fn acquirer(cfg: &AppConfig) -> VideoAcquirer {
    VideoAcquirer::new(Arc::new(YtDlp::new(&cfg.yt_dlp)), &cfg.download_dir)
}

fn blob_store(cfg: &AppConfig) -> Arc<HttpBlobStore> {
    Arc::new(HttpBlobStore::new(
        &cfg.rpc_url,
        &cfg.indexer_url,
        cfg.api_key.clone(),
    ))
}

async fn serve(cfg: &AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&cfg.download_dir)
        .await
        .with_context(|| format!("cannot create {}", cfg.download_dir.display()))?;

    let state = AppState::new(
        acquirer(cfg),
        blob_store(cfg),
        &cfg.rpc_url,
        cfg.max_concurrent_downloads,
    );
    let app = server::router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("cannot listen on {}", cfg.listen_addr))?;
    info!("listening on http://{}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

async fn connect_wallet(
    cfg: &AppConfig,
    assume_yes: bool,
) -> Result<(Arc<dyn WalletSigner>, WalletSession)> {
    let signer = AptosCliSigner::new(&cfg.aptos_profile).assume_yes(assume_yes);
    signer
        .connect()
        .await
        .with_context(|| format!("cannot use aptos profile {}", cfg.aptos_profile))?;
    let session = WalletSession::query(&signer).await;
    Ok((Arc::new(signer), session))
}

fn registration_builder(cfg: &AppConfig) -> Result<RegistrationBuilder> {
    let Some(contract) = cfg.contract_address.as_deref() else {
        bail!("SHELBY_CONTRACT_ADDRESS (or --contract-address) is required to register blobs");
    };
    Ok(RegistrationBuilder::new(contract))
}

fn orchestrator(cfg: &AppConfig, wallet: Arc<dyn WalletSigner>) -> Result<UploadOrchestrator> {
    Ok(UploadOrchestrator::new(
        wallet,
        blob_store(cfg),
        registration_builder(cfg)?,
        &cfg.rpc_url,
    )
    .with_hook(Arc::new(SpinnerHook::new()))
    .with_signature_timeout(cfg.signature_timeout))
}

async fn upload_file(
    cfg: &AppConfig,
    assume_yes: bool,
    path: &Path,
    name: &str,
    days: i64,
) -> Result<()> {
    let (wallet, session) = connect_wallet(cfg, assume_yes).await?;
    let orchestrator = orchestrator(cfg, wallet)?;
    let data = read_file(path).await?;
    info!("uploading {} ({} bytes) as {name}", path.display(), data.len());

    let receipt = orchestrator
        .upload(&session, &data, name, days)
        .await
        .map_err(report_failure)?;
    print_receipt(&receipt);
    Ok(())
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn print_receipt(receipt: &UploadReceipt) {
    println!("Stored → {}", receipt.access_url);
    println!(
        "Explorer → {}",
        store::explorer_blob_url(&receipt.owner, &receipt.name)
    );
    println!(
        "Transaction → {}",
        store::explorer_transaction_url(&receipt.transaction_hash)
    );
}

fn report_failure(failure: UploadFailure) -> anyhow::Error {
    if let Some(tx) = &failure.transaction_hash {
        eprintln!("Registration went through: {}", store::explorer_transaction_url(tx));
        if failure.can_retry_store() {
            eprintln!("Retry the storage step with: shelbytube retry-store <file> --name <name> --tx {tx}");
        }
    }
    failure.into()
}
