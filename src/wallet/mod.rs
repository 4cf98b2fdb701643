mod aptos_cli;

pub use aptos_cli::AptosCliSigner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::RegistrationPayload;
use crate::config;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("wallet not connected")]
    NotConnected,
    #[error("request rejected by the user: {0}")]
    Rejected(String),
    #[error("wallet does not support {0}")]
    Unsupported(&'static str),
    #[error("wallet error: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    #[serde(default)]
    pub public_key: String,
}

/// Network the wallet reports as active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub chain_id: String,
}

impl NetworkInfo {
    /// True when the name mentions `shelby` or the URL mentions `shelbynet`.
    pub fn is_expected(&self) -> bool {
        self.name.to_lowercase().contains(config::NETWORK_NAME_MARKER)
            || self.url.to_lowercase().contains(config::NETWORK_URL_MARKER)
    }

    pub fn describe(&self) -> String {
        [&self.name, &self.url]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignMessageRequest {
    pub message: String,
    pub nonce: String,
}

/// A wallet that can sign and broadcast transactions on the user's behalf.
///
/// `sign_and_submit_transaction` may wait indefinitely on the user.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn connect(&self) -> Result<AccountInfo, WalletError>;
    async fn disconnect(&self) -> Result<(), WalletError>;
    async fn is_connected(&self) -> bool;
    async fn account(&self) -> Result<AccountInfo, WalletError>;
    async fn network(&self) -> Result<NetworkInfo, WalletError>;
    async fn sign_and_submit_transaction(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<SubmittedTransaction, WalletError>;
    async fn sign_message(&self, request: &SignMessageRequest) -> Result<String, WalletError>;
}

/// Snapshot of the wallet connection handed to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSession {
    pub account: Option<String>,
    pub network: Option<NetworkInfo>,
}

impl WalletSession {
    pub fn new(account: impl Into<String>, network: NetworkInfo) -> Self {
        Self {
            account: Some(account.into()),
            network: Some(network),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Read the current connection state from a wallet. A wallet that cannot
    /// report its network yields a session with `network: None`.
    pub async fn query(wallet: &dyn WalletSigner) -> Self {
        if !wallet.is_connected().await {
            return Self::disconnected();
        }
        let account = match wallet.account().await {
            Ok(a) => Some(a.address),
            Err(e) => {
                log::warn!("could not read wallet account: {e}");
                None
            }
        };
        let network = match wallet.network().await {
            Ok(n) => Some(n),
            Err(e) => {
                log::warn!("could not read wallet network: {e}");
                None
            }
        };
        Self { account, network }
    }

    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_marker_by_name_or_url() {
        let by_name = NetworkInfo {
            name: "Shelbynet".into(),
            ..Default::default()
        };
        let by_url = NetworkInfo {
            name: "Custom".into(),
            url: "https://api.SHELBYNET.shelby.xyz/v1".into(),
            ..Default::default()
        };
        let testnet = NetworkInfo {
            name: "Testnet".into(),
            url: "https://fullnode.testnet.aptoslabs.com/v1".into(),
            ..Default::default()
        };
        assert!(by_name.is_expected());
        assert!(by_url.is_expected());
        assert!(!testnet.is_expected());
        assert!(!NetworkInfo::default().is_expected());
    }

    #[test]
    fn test_describe_network() {
        let n = NetworkInfo {
            url: "http://localhost:8080".into(),
            ..Default::default()
        };
        assert_eq!(n.describe(), "http://localhost:8080");
        assert_eq!(NetworkInfo::default().describe(), "Unknown");
    }

    struct BrokenProfile;

    #[async_trait]
    impl WalletSigner for BrokenProfile {
        async fn connect(&self) -> Result<AccountInfo, WalletError> {
            self.account().await
        }
        async fn disconnect(&self) -> Result<(), WalletError> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn account(&self) -> Result<AccountInfo, WalletError> {
            Err(WalletError::Failed("profile shelby not found".into()))
        }
        async fn network(&self) -> Result<NetworkInfo, WalletError> {
            Ok(NetworkInfo {
                name: "Shelbynet".into(),
                ..Default::default()
            })
        }
        async fn sign_and_submit_transaction(
            &self,
            _payload: &RegistrationPayload,
        ) -> Result<SubmittedTransaction, WalletError> {
            Err(WalletError::NotConnected)
        }
        async fn sign_message(&self, _request: &SignMessageRequest) -> Result<String, WalletError> {
            Err(WalletError::Unsupported("message signing"))
        }
    }

    #[tokio::test]
    async fn test_query_without_account_is_disconnected() {
        let session = WalletSession::query(&BrokenProfile).await;
        assert!(!session.is_connected());
        assert!(session.network.is_some_and(|n| n.is_expected()));
    }

    #[test]
    fn test_session_connection() {
        assert!(!WalletSession::disconnected().is_connected());
        assert!(WalletSession::new("0x1", NetworkInfo::default()).is_connected());
    }
}
