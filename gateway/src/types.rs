use asteroids_claim_core::{ScoreJournal, TapeSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatching,
    ProverRunning,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Proof format requested from the prover. The gateway asks for groth16 so
/// the receipt can go straight to the on-chain verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Composite,
    Succinct,
    #[default]
    Groth16,
}

impl ReceiptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Composite => "composite",
            Self::Succinct => "succinct",
            Self::Groth16 => "groth16",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TapeInfo {
    pub size_bytes: usize,
    /// Parsed from the tape header/footer at admission; immutable afterwards.
    pub metadata: TapeSummary,
}

/// The gateway's own attempts to hand the tape to the prover.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueState {
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at_unix_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at_unix_s: Option<u64>,
}

/// The remote prover-side job, tracked independently of `QueueState`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProverSide {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_polled_at_unix_s: Option<u64>,
    pub polling_errors: u32,
    pub recovery_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofStats {
    pub segments: u64,
    pub total_cycles: u64,
    pub user_cycles: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub elapsed_ms: u64,
    pub requested_receipt_kind: ReceiptKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_receipt_kind: Option<ReceiptKind>,
    pub journal: ScoreJournal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProofStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Where the proof artifact can be fetched from (the remote job URL).
    pub artifact_key: String,
    pub summary: ResultSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at_unix_s: u64,
    pub updated_at_unix_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_unix_s: Option<u64>,
    pub tape: TapeInfo,
    pub queue: QueueState,
    pub prover: ProverSide,
    /// Retained once a proof exists, even if settlement later fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ProofJob {
    pub fn new(tape_size: usize, metadata: TapeSummary) -> Self {
        let now = now_unix_s();
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Queued,
            created_at_unix_s: now,
            updated_at_unix_s: now,
            completed_at_unix_s: None,
            tape: TapeInfo {
                size_bytes: tape_size,
                metadata,
            },
            queue: QueueState::default(),
            prover: ProverSide::default(),
            result: None,
            tx_hash: None,
            error: None,
            error_code: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub status_url: String,
}

pub fn now_unix_s() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
