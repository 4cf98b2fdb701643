pub mod hook;

pub use hook::{NoopHook, SpinnerHook, UploadHook};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;

use crate::chain::RegistrationBuilder;
use crate::commitment::{ContentAddresser, MerkleAddresser};
use crate::error::Error;
use crate::store::{access_url, format_owner, BlobStore};
use crate::wallet::{WalletError, WalletSession, WalletSigner};

/// The step an upload was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Commit,
    Register,
    Sign,
    Store,
}

impl UploadStep {
    pub fn label(self) -> &'static str {
        match self {
            Self::Commit => "committing",
            Self::Register => "registering",
            Self::Sign => "awaiting_signature",
            Self::Store => "storing",
        }
    }
}

/// State of a single upload attempt.
///
/// `Idle -> Committing -> Registering -> AwaitingSignature -> Storing -> Complete`,
/// with `Failed` reachable from every non-idle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Committing,
    Registering,
    AwaitingSignature,
    Storing,
    Complete(UploadReceipt),
    Failed {
        step: UploadStep,
        transaction_hash: Option<String>,
    },
}

impl UploadState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Committing => UploadStep::Commit.label(),
            Self::Registering => UploadStep::Register.label(),
            Self::AwaitingSignature => UploadStep::Sign.label(),
            Self::Storing => UploadStep::Store.label(),
            Self::Complete(_) => "complete",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub owner: String,
    pub name: String,
    pub access_url: String,
    pub transaction_hash: String,
}

/// A failed upload: the step that failed, the transaction hash if one was
/// obtained before the failure, and the cause.
#[derive(Error, Debug)]
#[error("upload failed while {}: {error}", .step.label())]
pub struct UploadFailure {
    pub step: UploadStep,
    pub transaction_hash: Option<String>,
    #[source]
    pub error: Error,
}

impl UploadFailure {
    /// True when only the storage step needs repeating.
    pub fn can_retry_store(&self) -> bool {
        match &self.error {
            Error::StorageFailed { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}

/// Tracks one attempt and reports each transition to the hook.
struct Attempt<'a> {
    state: UploadState,
    transaction_hash: Option<String>,
    hook: &'a dyn UploadHook,
}

impl<'a> Attempt<'a> {
    fn new(hook: &'a dyn UploadHook) -> Self {
        Self {
            state: UploadState::Idle,
            transaction_hash: None,
            hook,
        }
    }

    fn enter(&mut self, state: UploadState) {
        info!("upload: {} -> {}", self.state.label(), state.label());
        self.state = state;
        self.hook.on_transition(&self.state);
    }

    fn fail(&mut self, step: UploadStep, error: Error) -> UploadFailure {
        match &self.transaction_hash {
            Some(tx) => error!("upload failed while {} (transaction {tx}): {error}", step.label()),
            None => warn!("upload failed while {}: {error}", step.label()),
        }
        self.enter(UploadState::Failed {
            step,
            transaction_hash: self.transaction_hash.clone(),
        });
        UploadFailure {
            step,
            transaction_hash: self.transaction_hash.clone(),
            error,
        }
    }
}

/// Runs the register-then-store sequence for one blob.
///
/// Every instance is independent; no retries happen across steps. A caller
/// facing a storage-only failure can use [`UploadOrchestrator::retry_store`]
/// with the transaction hash from the failure.
pub struct UploadOrchestrator {
    addresser: Arc<dyn ContentAddresser>,
    builder: RegistrationBuilder,
    wallet: Arc<dyn WalletSigner>,
    store: Arc<dyn BlobStore>,
    rpc_url: String,
    signature_timeout: Option<Duration>,
    hook: Arc<dyn UploadHook>,
}

impl UploadOrchestrator {
    pub fn new(
        wallet: Arc<dyn WalletSigner>,
        store: Arc<dyn BlobStore>,
        builder: RegistrationBuilder,
        rpc_url: impl Into<String>,
    ) -> Self {
        Self {
            addresser: Arc::new(MerkleAddresser::default()),
            builder,
            wallet,
            store,
            rpc_url: rpc_url.into(),
            signature_timeout: None,
            hook: Arc::new(NoopHook),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn UploadHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Treat a signature that takes longer than `timeout` as rejected.
    pub fn with_signature_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.signature_timeout = timeout;
        self
    }

    /// Register `data` as blob `name` for the session's account and upload it.
    pub async fn upload(
        &self,
        session: &WalletSession,
        data: &[u8],
        name: &str,
        retention_days: i64,
    ) -> Result<UploadReceipt, UploadFailure> {
        let mut attempt = Attempt::new(self.hook.as_ref());

        attempt.enter(UploadState::Committing);
        let owner = match session.account.as_deref() {
            Some(account) => format_owner(account),
            None => return Err(attempt.fail(UploadStep::Commit, Error::invalid("wallet not connected"))),
        };
        if name.trim().is_empty() {
            return Err(attempt.fail(UploadStep::Commit, Error::invalid("blob name is required")));
        }
        let commitment = self.addresser.commit(data);
        info!(
            "committed {} bytes: root {} over {} chunksets",
            commitment.raw_size,
            commitment.root_hex(),
            commitment.num_chunksets
        );

        attempt.enter(UploadState::Registering);
        let payload = self
            .builder
            .build(&owner, name, &commitment, retention_days, Utc::now())
            .map_err(|e| attempt.fail(UploadStep::Register, e))?;

        attempt.enter(UploadState::AwaitingSignature);
        self.check_network(session)
            .map_err(|e| attempt.fail(UploadStep::Sign, e))?;
        let transaction_hash = self
            .sign(&payload)
            .await
            .map_err(|e| attempt.fail(UploadStep::Sign, e))?;
        info!("registration transaction submitted: {transaction_hash}");
        attempt.transaction_hash = Some(transaction_hash);

        self.store_bytes(&mut attempt, &owner, name, data).await
    }

    /// Repeat only the storage step of an upload whose registration
    /// transaction `transaction_hash` already went through.
    pub async fn retry_store(
        &self,
        session: &WalletSession,
        data: &[u8],
        name: &str,
        transaction_hash: &str,
    ) -> Result<UploadReceipt, UploadFailure> {
        let mut attempt = Attempt::new(self.hook.as_ref());
        attempt.transaction_hash = Some(transaction_hash.to_string());

        let owner = match session.account.as_deref() {
            Some(account) => format_owner(account),
            None => {
                attempt.enter(UploadState::Storing);
                return Err(attempt.fail(UploadStep::Store, Error::invalid("wallet not connected")));
            }
        };
        info!("retrying storage for transaction {transaction_hash}");
        self.store_bytes(&mut attempt, &owner, name, data).await
    }

    async fn store_bytes(
        &self,
        attempt: &mut Attempt<'_>,
        owner: &str,
        name: &str,
        data: &[u8],
    ) -> Result<UploadReceipt, UploadFailure> {
        let transaction_hash = attempt.transaction_hash.clone().unwrap_or_default();

        attempt.enter(UploadState::Storing);
        if let Err(source) = self.store.put_blob(owner, name, data).await {
            let kind = source.kind();
            let error = Error::StorageFailed {
                transaction_hash,
                kind,
                source,
            };
            return Err(attempt.fail(UploadStep::Store, error));
        }
        info!("stored {} bytes as {owner}/{name}", data.len());

        let receipt = UploadReceipt {
            owner: owner.to_string(),
            name: name.to_string(),
            access_url: access_url(&self.rpc_url, owner, name),
            transaction_hash,
        };
        attempt.enter(UploadState::Complete(receipt.clone()));
        Ok(receipt)
    }

    fn check_network(&self, session: &WalletSession) -> Result<(), Error> {
        match &session.network {
            Some(network) if network.is_expected() => Ok(()),
            Some(network) => Err(Error::WrongNetwork {
                reported: network.describe(),
            }),
            None => Err(Error::WrongNetwork {
                reported: "Unknown".into(),
            }),
        }
    }

    async fn sign(&self, payload: &crate::chain::RegistrationPayload) -> Result<String, Error> {
        let submit = self.wallet.sign_and_submit_transaction(payload);
        let result = match self.signature_timeout {
            Some(limit) => match tokio::time::timeout(limit, submit).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Error::SignatureRejected(format!(
                        "no signature within {}s",
                        limit.as_secs()
                    )))
                }
            },
            None => submit.await,
        };

        match result {
            Ok(tx) => Ok(tx.hash),
            Err(WalletError::Rejected(reason)) => Err(Error::SignatureRejected(reason)),
            Err(WalletError::NotConnected) => Err(Error::invalid("wallet not connected")),
            Err(other) => Err(Error::RegistrationFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RegistrationPayload;
    use crate::store::{BlobRecord, StoreError, StoreFailureKind};
    use crate::wallet::{AccountInfo, NetworkInfo, SignMessageRequest, SubmittedTransaction};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const RPC: &str = "https://api.shelbynet.shelby.xyz/shelby";
    const TX: &str = "0x9f2c4e6a8b0d1f3e5c7a9b1d3f5e7c9a1b3d5f7e9c1a3b5d7f9e1c3a5b7d9f1e";

    enum SignBehavior {
        Approve,
        Reject,
        Hang,
    }

    struct MockWallet {
        behavior: SignBehavior,
        calls: AtomicUsize,
        last_payload: Mutex<Option<RegistrationPayload>>,
    }

    impl MockWallet {
        fn new(behavior: SignBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                last_payload: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl WalletSigner for MockWallet {
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
            Ok(AccountInfo {
                address: "0xabc".into(),
                public_key: String::new(),
            })
        }
        async fn network(&self) -> Result<NetworkInfo, WalletError> {
            Ok(shelbynet())
        }
        async fn sign_and_submit_transaction(
            &self,
            payload: &RegistrationPayload,
        ) -> Result<SubmittedTransaction, WalletError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload.clone());
            match self.behavior {
                SignBehavior::Approve => Ok(SubmittedTransaction { hash: TX.into() }),
                SignBehavior::Reject => Err(WalletError::Rejected("User rejected".into())),
                SignBehavior::Hang => std::future::pending().await,
            }
        }
        async fn sign_message(&self, _request: &SignMessageRequest) -> Result<String, WalletError> {
            Err(WalletError::Unsupported("message signing"))
        }
    }

    #[derive(Default)]
    struct MockStore {
        fail_status: Mutex<Option<u16>>,
        blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    }

    impl MockStore {
        fn failing(status: u16) -> Arc<Self> {
            let store = Self::default();
            *store.fail_status.lock().unwrap() = Some(status);
            Arc::new(store)
        }
    }

    #[async_trait]
    impl BlobStore for MockStore {
        async fn put_blob(&self, owner: &str, name: &str, data: &[u8]) -> Result<(), StoreError> {
            if let Some(status) = *self.fail_status.lock().unwrap() {
                return Err(StoreError::Status {
                    status,
                    message: "mock failure".into(),
                });
            }
            self.blobs
                .lock()
                .unwrap()
                .insert((owner.to_string(), name.to_string()), data.to_vec());
            Ok(())
        }

        async fn get_blob(&self, owner: &str, name: &str) -> Result<Vec<u8>, StoreError> {
            self.blobs
                .lock()
                .unwrap()
                .get(&(owner.to_string(), name.to_string()))
                .cloned()
                .ok_or(StoreError::Status {
                    status: 404,
                    message: "no such blob".into(),
                })
        }

        async fn account_blobs(&self, _owner: &str) -> Result<Vec<BlobRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        states: Mutex<Vec<String>>,
    }

    impl UploadHook for RecordingHook {
        fn on_transition(&self, state: &UploadState) {
            self.states.lock().unwrap().push(state.label().to_string());
        }
    }

    fn shelbynet() -> NetworkInfo {
        NetworkInfo {
            name: "Shelbynet".into(),
            url: "https://api.shelbynet.shelby.xyz/v1".into(),
            chain_id: String::new(),
        }
    }

    fn session() -> WalletSession {
        WalletSession::new("abc", shelbynet())
    }

    fn orchestrator(wallet: Arc<MockWallet>, store: Arc<MockStore>) -> UploadOrchestrator {
        UploadOrchestrator::new(wallet, store, RegistrationBuilder::new("0xc0ffee"), RPC)
    }

    #[tokio::test]
    async fn test_upload_success_walks_every_state() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let store = Arc::new(MockStore::default());
        let hook = Arc::new(RecordingHook::default());
        let orch = orchestrator(wallet.clone(), store.clone()).with_hook(hook.clone());

        let receipt = orch
            .upload(&session(), b"video bytes", "My Clip_abc12345678.mp4", 30)
            .await
            .unwrap();

        assert_eq!(
            receipt.access_url,
            format!("{RPC}/v1/blobs/0xabc/My%20Clip_abc12345678.mp4")
        );
        assert_eq!(receipt.transaction_hash.trim_start_matches("0x").len(), 64);
        assert_eq!(receipt.owner, "0xabc");
        assert_eq!(receipt.name, "My Clip_abc12345678.mp4");
        assert_eq!(
            store.get_blob(&receipt.owner, &receipt.name).await.unwrap(),
            b"video bytes"
        );
        assert_eq!(
            *hook.states.lock().unwrap(),
            vec!["committing", "registering", "awaiting_signature", "storing", "complete"]
        );
        let blobs = store.blobs.lock().unwrap();
        assert_eq!(
            blobs.get(&("0xabc".to_string(), "My Clip_abc12345678.mp4".to_string())),
            Some(&b"video bytes".to_vec())
        );
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_transaction_hash() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let orch = orchestrator(wallet, MockStore::failing(500));

        let failure = orch
            .upload(&session(), b"bytes", "a.bin", 30)
            .await
            .unwrap_err();

        assert_eq!(failure.step, UploadStep::Store);
        assert_eq!(failure.transaction_hash.as_deref(), Some(TX));
        assert_eq!(failure.error.transaction_hash(), Some(TX));
        assert!(failure.error.to_string().contains(TX));
        assert!(failure.can_retry_store());
        match failure.error {
            Error::StorageFailed { kind, .. } => assert_eq!(kind, StoreFailureKind::Transient),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_payload_too_large_is_not_store_retryable() {
        let orch = orchestrator(MockWallet::new(SignBehavior::Approve), MockStore::failing(413));
        let failure = orch
            .upload(&session(), b"bytes", "a.bin", 30)
            .await
            .unwrap_err();
        assert!(!failure.can_retry_store());
        assert_eq!(failure.transaction_hash.as_deref(), Some(TX));
    }

    #[tokio::test]
    async fn test_retry_store_reuses_transaction() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let store = Arc::new(MockStore::default());
        let orch = orchestrator(wallet.clone(), store.clone());

        let receipt = orch
            .retry_store(&session(), b"bytes", "a.bin", TX)
            .await
            .unwrap();

        assert_eq!(receipt.transaction_hash, TX);
        assert_eq!(wallet.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.blobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_network_never_prompts() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let orch = orchestrator(wallet.clone(), Arc::new(MockStore::default()));
        let testnet = NetworkInfo {
            name: "Testnet".into(),
            url: "https://fullnode.testnet.aptoslabs.com/v1".into(),
            chain_id: "2".into(),
        };

        let failure = orch
            .upload(&WalletSession::new("0xabc", testnet), b"x", "a.bin", 30)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, Error::WrongNetwork { ref reported } if reported == "Testnet"));
        assert_eq!(failure.step, UploadStep::Sign);
        assert!(failure.transaction_hash.is_none());
        assert_eq!(wallet.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_network_is_wrong_network() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let orch = orchestrator(wallet.clone(), Arc::new(MockStore::default()));
        let session = WalletSession {
            account: Some("0xabc".into()),
            network: None,
        };

        let failure = orch.upload(&session, b"x", "a.bin", 30).await.unwrap_err();
        assert!(matches!(failure.error, Error::WrongNetwork { .. }));
        assert_eq!(wallet.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_signature() {
        let store = Arc::new(MockStore::default());
        let orch = orchestrator(MockWallet::new(SignBehavior::Reject), store.clone());

        let failure = orch
            .upload(&session(), b"x", "a.bin", 30)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, Error::SignatureRejected(_)));
        assert!(failure.transaction_hash.is_none());
        assert!(store.blobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signature_timeout_counts_as_rejection() {
        let orch = orchestrator(
            MockWallet::new(SignBehavior::Hang),
            Arc::new(MockStore::default()),
        )
        .with_signature_timeout(Some(Duration::from_millis(20)));

        let failure = orch
            .upload(&session(), b"x", "a.bin", 30)
            .await
            .unwrap_err();
        assert_eq!(failure.step, UploadStep::Sign);
        assert!(matches!(failure.error, Error::SignatureRejected(_)));
    }

    #[tokio::test]
    async fn test_disconnected_session_is_invalid_input() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let hook = Arc::new(RecordingHook::default());
        let orch = orchestrator(wallet.clone(), Arc::new(MockStore::default())).with_hook(hook.clone());

        let failure = orch
            .upload(&WalletSession::disconnected(), b"x", "a.bin", 30)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, Error::InvalidInput(_)));
        assert_eq!(failure.step, UploadStep::Commit);
        assert_eq!(wallet.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*hook.states.lock().unwrap(), vec!["committing", "failed"]);
    }

    #[tokio::test]
    async fn test_zero_retention_clamped_to_future() {
        let wallet = MockWallet::new(SignBehavior::Approve);
        let orch = orchestrator(wallet.clone(), Arc::new(MockStore::default()));
        let before = Utc::now().timestamp_micros();

        orch.upload(&session(), b"", "empty.bin", 0).await.unwrap();

        let payload = wallet.last_payload.lock().unwrap().clone().unwrap();
        assert!(payload.expiration_micros > before);
        assert!(payload.expiration_micros >= before + crate::config::MICROS_PER_DAY);
    }
}
