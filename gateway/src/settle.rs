//! Settlement: hand a finished proof to the score contract.
//!
//! Two paths exist behind one submitter. A hosted relay can take the raw
//! journal and assemble the transaction itself, or the gateway assembles
//! the `submit_score` invocation locally and sends the XDR to a
//! wallet-backed relay for signing. Both paths end at [`TransactionRelay`],
//! so tests drive the whole layer with a mock.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    classify::{classify_response, describe_failure, CallFailure},
    config::SettleMode,
    xdr::{self, ScAddress},
};

/// Everything settlement needs from a finished proof job.
#[derive(Debug, Clone)]
pub struct ClaimSubmission {
    pub job_id: Uuid,
    pub claimant_address: String,
    pub journal_raw: Vec<u8>,
    pub journal_digest: [u8; 32],
    /// Groth16 seal bytes, passed to the contract alongside the journal.
    pub seal: Vec<u8>,
    /// The prover's full job response, forwarded for relay-side auditing.
    pub prover_response: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleOutcome {
    pub tx_hash: String,
}

/// Relay-side failure, split by where it happened: the transaction was
/// executed and rejected, or it never got that far.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transaction rejected: {message}")]
    Execution { message: String },
    #[error("relay unreachable (status {status:?}): {message}")]
    Transport { status: Option<u16>, message: String },
}

impl RelayError {
    pub fn from_response(status: u16, body: &str) -> Option<Self> {
        match classify_response(status, body).into_failure()? {
            CallFailure {
                reason,
                retryable: true,
            } => Some(Self::Transport {
                status: Some(status),
                message: reason,
            }),
            CallFailure { reason, .. } => Some(Self::Execution { message: reason }),
        }
    }

    fn into_call_failure(self) -> CallFailure {
        match self {
            Self::Execution { message } => CallFailure::fatal(describe_failure(&message)),
            Self::Transport { message, .. } => CallFailure::retryable(message),
        }
    }
}

/// Body for the hosted-relay path.
#[derive(Debug, Clone, Serialize)]
pub struct DirectClaimBody {
    pub job_id: Uuid,
    pub claimant_address: String,
    pub journal_raw_hex: String,
    pub journal_digest_hex: String,
    pub prover_response: Value,
}

/// Body for the wallet-assembled path: XDR the relay only signs and sends.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledInvocation {
    pub source_account: String,
    pub network_passphrase: String,
    pub host_function_xdr: String,
    pub auth_entries_xdr: Vec<String>,
}

#[async_trait]
pub trait TransactionRelay: Send + Sync {
    async fn submit_claim(&self, body: &DirectClaimBody) -> Result<String, RelayError>;

    async fn submit_assembled(&self, tx: &AssembledInvocation) -> Result<String, RelayError>;
}

pub struct HttpRelayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRelayClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, CallFailure> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CallFailure::fatal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<String, RelayError> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|err| RelayError::Transport {
            status: None,
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| RelayError::Transport {
            status: Some(status),
            message: err.to_string(),
        })?;
        if let Some(err) = RelayError::from_response(status, &text) {
            return Err(err);
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|err| RelayError::Transport {
            status: Some(status),
            message: format!("malformed relay response: {err}"),
        })?;
        parsed
            .get("tx_hash")
            .or_else(|| parsed.get("hash"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayError::Transport {
                status: Some(status),
                message: "relay response is missing the transaction hash".to_string(),
            })
    }
}

#[async_trait]
impl TransactionRelay for HttpRelayClient {
    async fn submit_claim(&self, body: &DirectClaimBody) -> Result<String, RelayError> {
        self.post_json("/api/claims", body).await
    }

    async fn submit_assembled(&self, tx: &AssembledInvocation) -> Result<String, RelayError> {
        self.post_json("/api/transactions", tx).await
    }
}

pub struct SettlementSubmitter {
    mode: Option<SettleMode>,
    relay: Box<dyn TransactionRelay>,
}

impl SettlementSubmitter {
    pub fn new(mode: Option<SettleMode>, relay: Box<dyn TransactionRelay>) -> Self {
        Self { mode, relay }
    }

    /// Submit one claim. Configuration and address errors are fatal before
    /// any network traffic; relay outcomes are classified per response.
    pub async fn settle(&self, submission: &ClaimSubmission) -> Result<SettleOutcome, CallFailure> {
        let Some(mode) = &self.mode else {
            return Err(CallFailure::fatal(
                "settlement is not configured: set RELAY_URL (and SOURCE_ACCOUNT for locally assembled transactions)",
            ));
        };

        match mode {
            SettleMode::DirectRelay { url, .. } => {
                require_https(url)?;
                let body = DirectClaimBody {
                    job_id: submission.job_id,
                    claimant_address: submission.claimant_address.clone(),
                    journal_raw_hex: hex::encode(&submission.journal_raw),
                    journal_digest_hex: hex::encode(submission.journal_digest),
                    prover_response: submission.prover_response.clone(),
                };
                let tx_hash = self
                    .relay
                    .submit_claim(&body)
                    .await
                    .map_err(RelayError::into_call_failure)?;
                Ok(SettleOutcome { tx_hash })
            }
            SettleMode::WalletAssembled {
                relay_url,
                contract_id,
                source_account,
                network_passphrase,
            } => {
                require_https(relay_url)?;
                let contract = ScAddress::from_contract_strkey(contract_id)
                    .map_err(|err| CallFailure::fatal(format!("bad SCORE_CONTRACT_ID: {err}")))?;
                let claimant = ScAddress::from_strkey(&submission.claimant_address)
                    .map_err(|err| CallFailure::fatal(format!("bad claimant address: {err}")))?;

                let host_function_xdr = xdr::submit_score_host_function(
                    &contract,
                    &submission.seal,
                    &submission.journal_raw,
                    &claimant,
                );
                let auth_entry = xdr::submit_score_auth_entry(
                    &contract,
                    &submission.seal,
                    &submission.journal_raw,
                    &claimant,
                );

                let tx = AssembledInvocation {
                    source_account: source_account.clone(),
                    network_passphrase: network_passphrase.clone(),
                    host_function_xdr,
                    auth_entries_xdr: vec![auth_entry],
                };
                let tx_hash = self
                    .relay
                    .submit_assembled(&tx)
                    .await
                    .map_err(RelayError::into_call_failure)?;
                Ok(SettleOutcome { tx_hash })
            }
        }
    }
}

/// Relays carry signing authority, so plaintext endpoints are refused.
/// Loopback is exempt for local development.
fn require_https(url: &str) -> Result<(), CallFailure> {
    if url.starts_with("https://")
        || url.starts_with("http://127.0.0.1")
        || url.starts_with("http://localhost")
    {
        return Ok(());
    }
    Err(CallFailure::fatal(format!(
        "relay URL {url:?} must use https"
    )))
}
