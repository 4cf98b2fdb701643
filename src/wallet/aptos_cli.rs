use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use super::{
    AccountInfo, NetworkInfo, SignMessageRequest, SubmittedTransaction, WalletError, WalletSigner,
};
use crate::chain::RegistrationPayload;

/// Signs through a local `aptos` CLI profile.
///
/// Submission runs `aptos move run` with the terminal attached, so the CLI
/// asks the user to confirm the transaction just as a wallet extension would.
/// Answering "no" is reported as a rejection.
///
/// The CLI has no off-chain message signing, so `sign_message` always
/// returns [`WalletError::Unsupported`].
#[derive(Debug)]
pub struct AptosCliSigner {
    binary: String,
    profile: String,
    assume_yes: bool,
    connected: AtomicBool,
}

/// Envelope every `aptos` subcommand prints on stdout.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CliOutput<T> {
    result: Option<T>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ProfileConfig {
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    rest_url: Option<String>,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunResult {
    transaction_hash: String,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    vm_status: Option<String>,
}

impl AptosCliSigner {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            binary: "aptos".to_string(),
            profile: profile.into(),
            assume_yes: false,
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Skip the interactive confirmation prompt.
    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    async fn profile(&self) -> Result<ProfileConfig, WalletError> {
        let output = Command::new(&self.binary)
            .args(["config", "show-profiles", "--profile", &self.profile])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| WalletError::Failed(format!("failed to spawn {}: {e}", self.binary)))?;

        let mut profiles: serde_json::Map<String, Value> = parse_output(&output.stdout)?;
        let profile = profiles
            .remove(&self.profile)
            .ok_or_else(|| WalletError::Failed(format!("profile {} not found", self.profile)))?;
        serde_json::from_value(profile).map_err(|e| WalletError::Failed(e.to_string()))
    }

    fn payload_path(&self) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!(
            "shelbytube-payload-{}-{nanos}.json",
            std::process::id()
        ))
    }
}

fn parse_output<T: DeserializeOwned>(stdout: &[u8]) -> Result<T, WalletError> {
    let parsed: CliOutput<T> = serde_json::from_slice(stdout).map_err(|e| {
        WalletError::Failed(format!(
            "unexpected aptos output ({e}): {}",
            String::from_utf8_lossy(stdout).trim()
        ))
    })?;
    match (parsed.result, parsed.error) {
        (_, Some(error)) if is_abort(&error) => Err(WalletError::Rejected(error)),
        (_, Some(error)) => Err(WalletError::Failed(error)),
        (Some(result), None) => Ok(result),
        (None, None) => Err(WalletError::Failed("empty aptos output".into())),
    }
}

fn is_abort(error: &str) -> bool {
    error.contains("Aborted command")
}

#[async_trait]
impl WalletSigner for AptosCliSigner {
    async fn connect(&self) -> Result<AccountInfo, WalletError> {
        let account = self.account().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("connected to aptos profile {} ({})", self.profile, account.address);
        Ok(account)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn account(&self) -> Result<AccountInfo, WalletError> {
        let profile = self.profile().await?;
        let address = profile.account.ok_or(WalletError::NotConnected)?;
        Ok(AccountInfo {
            address: crate::store::format_owner(&address),
            public_key: profile.public_key.unwrap_or_default(),
        })
    }

    async fn network(&self) -> Result<NetworkInfo, WalletError> {
        let profile = self.profile().await?;
        Ok(NetworkInfo {
            name: profile.network.unwrap_or_default(),
            url: profile.rest_url.unwrap_or_default(),
            chain_id: String::new(),
        })
    }

    async fn sign_and_submit_transaction(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<SubmittedTransaction, WalletError> {
        if !self.is_connected().await {
            return Err(WalletError::NotConnected);
        }

        let path = self.payload_path();
        let json = serde_json::to_vec_pretty(&payload.to_cli_json())
            .map_err(|e| WalletError::Failed(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| WalletError::Failed(format!("cannot write {}: {e}", path.display())))?;

        let mut command = Command::new(&self.binary);
        command
            .arg("move")
            .arg("run")
            .arg("--json-file")
            .arg(&path)
            .args(["--profile", &self.profile])
            .args(["--max-gas", &payload.max_gas_amount.to_string()])
            .args(["--gas-unit-price", &payload.gas_unit_price.to_string()])
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if self.assume_yes {
            command.arg("--assume-yes");
        }

        info!("submitting {} via aptos profile {}", payload.function, self.profile);
        let output = command.output().await;
        let _ = tokio::fs::remove_file(&path).await;
        let output =
            output.map_err(|e| WalletError::Failed(format!("failed to spawn {}: {e}", self.binary)))?;
        debug!("aptos exited with {}", output.status);

        let result: RunResult = parse_output(&output.stdout)?;
        if result.success == Some(false) {
            return Err(WalletError::Failed(
                result.vm_status.unwrap_or_else(|| "transaction failed".into()),
            ));
        }
        Ok(SubmittedTransaction {
            hash: result.transaction_hash,
        })
    }

    async fn sign_message(&self, _request: &SignMessageRequest) -> Result<String, WalletError> {
        Err(WalletError::Unsupported("message signing"))
    }
}
