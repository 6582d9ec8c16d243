//! Client for the remote proving service.
//!
//! The service accepts a raw tape on `POST /api/prove-tape`, returns a job
//! handle, and exposes the job on `GET /api/jobs/{id}` until the proof is
//! ready; `DELETE /api/jobs/{id}` abandons it. All calls go through
//! [`ProverApi`] so the orchestrator can be driven by a mock in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    classify::{classify_response, classify_transport, CallFailure},
    types::{ProofStats, ReceiptKind},
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// `POST /api/prove-tape` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobCreated {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub status_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProof {
    pub journal: Vec<u8>,
    pub receipt: Vec<u8>,
    pub requested_receipt_kind: ReceiptKind,
    #[serde(default)]
    pub produced_receipt_kind: Option<ReceiptKind>,
    #[serde(default)]
    pub stats: Option<ProofStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    pub proof: RemoteProof,
    pub elapsed_ms: u64,
}

/// `GET /api/jobs/{id}` body. The remote status vocabulary is `queued`,
/// `running`, `succeeded`, `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJob {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub result: Option<RemoteEnvelope>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Subset of the prover's `GET /api/health` body the gateway checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHealth {
    pub status: String,
    pub rules_digest: u32,
    pub ruleset: String,
    pub image_id: String,
    #[serde(default)]
    pub dev_mode: bool,
}

#[async_trait]
pub trait ProverApi: Send + Sync {
    async fn submit_tape(
        &self,
        tape: &[u8],
        receipt_kind: ReceiptKind,
    ) -> Result<RemoteJobCreated, CallFailure>;

    async fn fetch_job(&self, job_id: &str) -> Result<RemoteJob, CallFailure>;

    /// Ask the prover to abandon a job. Best-effort: the gateway's own
    /// cancellation never waits on this succeeding.
    async fn cancel_job(&self, job_id: &str) -> Result<(), CallFailure>;

    async fn fetch_health(&self) -> Result<RemoteHealth, CallFailure>;
}

pub struct HttpProverClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProverClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, CallFailure> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| CallFailure::fatal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn read_checked<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CallFailure> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| classify_transport(&err))?;
        if let Some(failure) = classify_response(status, &body).into_failure() {
            return Err(failure);
        }
        serde_json::from_str(&body)
            .map_err(|err| CallFailure::fatal(format!("malformed prover response: {err}")))
    }
}

#[async_trait]
impl ProverApi for HttpProverClient {
    async fn submit_tape(
        &self,
        tape: &[u8],
        receipt_kind: ReceiptKind,
    ) -> Result<RemoteJobCreated, CallFailure> {
        let url = format!(
            "{}/api/prove-tape?receipt_kind={}",
            self.base_url,
            receipt_kind.as_str()
        );
        let response = self
            .with_auth(self.client.post(&url))
            .header("content-type", "application/octet-stream")
            .body(tape.to_vec())
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;
        Self::read_checked(response).await
    }

    async fn fetch_job(&self, job_id: &str) -> Result<RemoteJob, CallFailure> {
        let url = format!("{}/api/jobs/{job_id}", self.base_url);
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;
        Self::read_checked(response).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), CallFailure> {
        let url = format!("{}/api/jobs/{job_id}", self.base_url);
        let response = self
            .with_auth(self.client.delete(&url))
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| classify_transport(&err))?;
        match classify_response(status, &body).into_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn fetch_health(&self) -> Result<RemoteHealth, CallFailure> {
        let url = format!("{}/api/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;
        Self::read_checked(response).await
    }
}
