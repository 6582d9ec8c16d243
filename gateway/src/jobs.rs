//! Proof-job orchestration.
//!
//! Admission parses and validates the tape, claims the slot, and spawns a
//! driver task that walks the job through its three layers: dispatch to the
//! prover, poll the remote job, settle the journal on-chain. Each layer
//! retries transient failures on its own budget and resumes where it left
//! off; a fatal classification at any layer fails the job. Cancellation is
//! observed between awaits, and the slot's terminal-state immutability
//! makes late driver writes harmless.

use std::{sync::Arc, time::Duration};

use asteroids_claim_core::{
    constants::RULES_DIGEST, journal_digest, parse_tape_summary, ScoreJournal, TapeError,
};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    classify::describe_failure,
    health::HealthState,
    prover::{ProverApi, RemoteEnvelope, RemoteJob},
    settle::{ClaimSubmission, SettlementSubmitter},
    slot::{CancelResult, JobSlot},
    types::{
        now_unix_s, JobResult, JobStatus, ProofJob, ReceiptKind, ResultSummary,
    },
};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub dispatch_max_attempts: u32,
    pub dispatch_base_delay: Duration,
    pub poll_interval: Duration,
    pub poll_error_limit: u32,
    pub recovery_max_attempts: u32,
    pub settle_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            dispatch_max_attempts: 5,
            dispatch_base_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(3),
            poll_error_limit: 10,
            recovery_max_attempts: 2,
            settle_max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.dispatch_base_delay
            .saturating_mul(1u32 << shift)
            .min(MAX_BACKOFF)
    }
}

/// Admission failures, before any job exists.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("tape is {size} bytes; the limit is {max}")]
    TapeTooLarge { size: usize, max: usize },
    #[error("invalid tape: {0}")]
    InvalidTape(#[from] TapeError),
    /// The contract refuses zero-score claims, so proving one is wasted work.
    #[error("final_score must be greater than zero")]
    ZeroScore,
    #[error("a proof job is already in flight")]
    JobActive(Box<ProofJob>),
    #[error("prover pairing is degraded: {reason}")]
    ProverDegraded { reason: String },
}

pub struct Orchestrator {
    slot: Arc<JobSlot>,
    prover: Arc<dyn ProverApi>,
    settler: Arc<SettlementSubmitter>,
    health: Arc<HealthState>,
    policy: RetryPolicy,
    max_tape_bytes: usize,
    max_frames: u32,
    prover_deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        slot: Arc<JobSlot>,
        prover: Arc<dyn ProverApi>,
        settler: Arc<SettlementSubmitter>,
        health: Arc<HealthState>,
        policy: RetryPolicy,
        max_tape_bytes: usize,
        max_frames: u32,
        prover_deadline: Duration,
    ) -> Self {
        Self {
            slot,
            prover,
            settler,
            health,
            policy,
            max_tape_bytes,
            max_frames,
            prover_deadline,
        }
    }

    /// Admit a tape: validate it, claim the slot, spawn the driver. Returns
    /// the freshly queued job snapshot.
    pub async fn submit(self: &Arc<Self>, tape: Vec<u8>) -> Result<ProofJob, SubmitError> {
        if tape.len() > self.max_tape_bytes {
            return Err(SubmitError::TapeTooLarge {
                size: tape.len(),
                max: self.max_tape_bytes,
            });
        }
        let summary = parse_tape_summary(&tape, self.max_frames)?;
        if summary.final_score == 0 {
            return Err(SubmitError::ZeroScore);
        }

        if let Some(reason) = self.health.is_degraded().await {
            return Err(SubmitError::ProverDegraded { reason });
        }

        let job = ProofJob::new(tape.len(), summary);
        let snapshot = job.clone();
        let cancel_rx = self
            .slot
            .try_claim(job)
            .await
            .map_err(|active| SubmitError::JobActive(Box::new(active)))?;

        tracing::info!(
            job_id = %snapshot.job_id,
            frames = snapshot.tape.metadata.frame_count,
            score = snapshot.tape.metadata.final_score,
            "proof job admitted"
        );

        let driver = Arc::clone(self);
        tokio::spawn(async move {
            driver.drive(snapshot.job_id, tape, cancel_rx).await;
        });

        Ok(snapshot)
    }

    /// Cancel the active job. The local transition is immediate; the remote
    /// prover job is told to stop on a best-effort basis afterwards.
    pub async fn cancel(&self, job_id: Uuid) -> CancelResult {
        let remote_id = self
            .slot
            .get(job_id)
            .await
            .and_then(|job| job.prover.job_id);
        let result = self.slot.cancel(job_id).await;

        if result == CancelResult::Cancelled {
            if let Some(remote_id) = remote_id {
                let prover = Arc::clone(&self.prover);
                tokio::spawn(async move {
                    if let Err(err) = prover.cancel_job(&remote_id).await {
                        tracing::warn!(
                            remote_id = %remote_id,
                            error = %err,
                            "remote job cancel did not go through"
                        );
                    }
                });
            }
        }
        result
    }

    async fn drive(&self, job_id: Uuid, tape: Vec<u8>, mut cancel_rx: watch::Receiver<bool>) {
        let Some(remote_id) = self.dispatch(job_id, &tape, &mut cancel_rx).await else {
            return;
        };
        let Some((remote, envelope)) = self
            .poll(job_id, &tape, remote_id, &mut cancel_rx)
            .await
        else {
            return;
        };
        let Some(journal) = self.record_result(job_id, &envelope).await else {
            return;
        };
        self.settle(job_id, journal, remote, envelope, &mut cancel_rx)
            .await;
    }

    /// Layer 1: hand the tape to the prover, with backoff on transients.
    async fn dispatch(
        &self,
        job_id: Uuid,
        tape: &[u8],
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        let mut attempt = 0;
        loop {
            if *cancel_rx.borrow() {
                return None;
            }
            attempt += 1;
            self.slot
                .update(job_id, |job| {
                    job.status = JobStatus::Dispatching;
                    job.queue.attempts = attempt;
                    job.queue.last_attempt_at_unix_s = Some(now_unix_s());
                    job.queue.next_retry_at_unix_s = None;
                })
                .await?;

            match self.prover.submit_tape(tape, ReceiptKind::default()).await {
                Ok(created) => {
                    tracing::info!(job_id = %job_id, remote_id = %created.job_id, "tape dispatched");
                    self.slot
                        .update(job_id, |job| {
                            job.status = JobStatus::ProverRunning;
                            job.prover.job_id = Some(created.job_id.clone());
                            job.prover.status = Some(created.status.clone());
                            job.prover.status_url = created.status_url.clone();
                        })
                        .await?;
                    return Some(created.job_id);
                }
                Err(failure) if failure.retryable && attempt < self.policy.dispatch_max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %failure,
                        delay_ms = delay.as_millis() as u64,
                        "dispatch failed, will retry"
                    );
                    self.slot
                        .update(job_id, |job| {
                            job.status = JobStatus::Retrying;
                            job.queue.last_error = Some(failure.reason.clone());
                            job.queue.next_retry_at_unix_s =
                                Some(now_unix_s() + delay.as_secs());
                        })
                        .await?;
                    if sleep_or_cancel(delay, cancel_rx).await {
                        return None;
                    }
                }
                Err(failure) => {
                    self.fail(job_id, &failure.reason, "dispatch_failed").await;
                    return None;
                }
            }
        }
    }

    /// Layer 2: poll the remote job until it finishes. A lost remote job is
    /// recovered by resubmitting the tape, on its own small budget.
    async fn poll(
        &self,
        job_id: Uuid,
        tape: &[u8],
        mut remote_id: String,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Option<(RemoteJob, RemoteEnvelope)> {
        let started = tokio::time::Instant::now();
        let mut polling_errors = 0u32;
        let mut recovery_attempts = 0u32;

        loop {
            if sleep_or_cancel(self.policy.poll_interval, cancel_rx).await {
                return None;
            }
            if started.elapsed() > self.prover_deadline {
                self.fail(
                    job_id,
                    "prover did not finish within the deadline",
                    "prover_timeout",
                )
                .await;
                return None;
            }

            match self.prover.fetch_job(&remote_id).await {
                Ok(remote) => {
                    polling_errors = 0;
                    self.slot
                        .update(job_id, |job| {
                            job.prover.status = Some(remote.status.clone());
                            job.prover.last_polled_at_unix_s = Some(now_unix_s());
                            job.prover.polling_errors = 0;
                        })
                        .await?;

                    match remote.status.as_str() {
                        "succeeded" => {
                            let Some(envelope) = remote.result.clone() else {
                                self.fail(
                                    job_id,
                                    "prover reported success without a proof payload",
                                    "prover_malformed",
                                )
                                .await;
                                return None;
                            };
                            return Some((remote, envelope));
                        }
                        "failed" => {
                            let reason = remote
                                .error
                                .as_deref()
                                .unwrap_or("prover job failed without detail");
                            let code = remote.error_code.as_deref().unwrap_or("prover_failed");
                            self.fail(job_id, &describe_failure(reason), code).await;
                            return None;
                        }
                        _ => {}
                    }
                }
                Err(failure) => {
                    polling_errors += 1;
                    self.slot
                        .update(job_id, |job| {
                            job.prover.polling_errors = polling_errors;
                            job.queue.last_error = Some(failure.reason.clone());
                        })
                        .await?;

                    let lost = !failure.retryable || polling_errors > self.policy.poll_error_limit;
                    if !lost {
                        continue;
                    }
                    if recovery_attempts >= self.policy.recovery_max_attempts {
                        self.fail(
                            job_id,
                            "lost contact with the prover job and recovery budget is spent",
                            "prover_lost",
                        )
                        .await;
                        return None;
                    }

                    // The remote job is gone (evicted or the prover
                    // restarted); the tape is still ours, so start it over.
                    recovery_attempts += 1;
                    polling_errors = 0;
                    self.slot
                        .update(job_id, |job| {
                            job.status = JobStatus::Retrying;
                            job.prover.recovery_attempts = recovery_attempts;
                        })
                        .await?;
                    tracing::warn!(
                        job_id = %job_id,
                        recovery_attempts,
                        "remote job lost, resubmitting tape"
                    );
                    match self.prover.submit_tape(tape, ReceiptKind::default()).await {
                        Ok(created) => {
                            remote_id = created.job_id.clone();
                            self.slot
                                .update(job_id, |job| {
                                    job.status = JobStatus::ProverRunning;
                                    job.prover.job_id = Some(created.job_id.clone());
                                    job.prover.status = Some(created.status.clone());
                                    job.prover.status_url = created.status_url.clone();
                                })
                                .await?;
                        }
                        Err(failure) => {
                            self.fail(job_id, &failure.reason, "prover_lost").await;
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Decode and cross-check the journal, then pin the result on the job.
    /// The result survives any later settlement failure.
    async fn record_result(
        &self,
        job_id: Uuid,
        envelope: &RemoteEnvelope,
    ) -> Option<ScoreJournal> {
        let journal = match ScoreJournal::decode_raw(&envelope.proof.journal) {
            Ok(journal) => journal,
            Err(err) => {
                self.fail(job_id, &format!("invalid journal: {err}"), "journal_invalid")
                    .await;
                return None;
            }
        };

        if journal.rules_digest != RULES_DIGEST {
            self.fail(
                job_id,
                &format!(
                    "journal rules digest {:#010x} does not match the pinned {:#010x}",
                    journal.rules_digest, RULES_DIGEST
                ),
                "rules_digest_mismatch",
            )
            .await;
            return None;
        }

        let job = self.slot.get(job_id).await?;
        if journal.claimant_address != job.tape.metadata.claimant_address {
            self.fail(
                job_id,
                "journal claimant does not match the tape's claimant",
                "claimant_mismatch",
            )
            .await;
            return None;
        }
        if journal.tape_checksum != job.tape.metadata.checksum {
            self.fail(
                job_id,
                "journal tape checksum does not match the submitted tape",
                "tape_checksum_mismatch",
            )
            .await;
            return None;
        }

        let artifact_key = job
            .prover
            .status_url
            .clone()
            .or_else(|| job.prover.job_id.clone())
            .unwrap_or_default();
        let summary = ResultSummary {
            elapsed_ms: envelope.elapsed_ms,
            requested_receipt_kind: envelope.proof.requested_receipt_kind,
            produced_receipt_kind: envelope.proof.produced_receipt_kind,
            journal: journal.clone(),
            stats: envelope.proof.stats.clone(),
        };
        self.slot
            .update(job_id, |job| {
                job.result = Some(JobResult {
                    artifact_key: artifact_key.clone(),
                    summary: summary.clone(),
                });
            })
            .await?;
        Some(journal)
    }

    /// Layer 3: push the journal through the settlement submitter.
    async fn settle(
        &self,
        job_id: Uuid,
        journal: ScoreJournal,
        remote: RemoteJob,
        envelope: RemoteEnvelope,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        let journal_raw = journal.encode_raw();
        let submission = ClaimSubmission {
            job_id,
            claimant_address: journal.claimant_address.clone(),
            journal_digest: journal_digest(&journal_raw),
            journal_raw,
            seal: envelope.proof.receipt.clone(),
            prover_response: serde_json::to_value(&remote).unwrap_or_default(),
        };

        let mut attempt = 0;
        loop {
            if *cancel_rx.borrow() {
                return;
            }
            attempt += 1;
            match self.settler.settle(&submission).await {
                Ok(outcome) => {
                    tracing::info!(job_id = %job_id, tx_hash = %outcome.tx_hash, "claim settled");
                    self.slot
                        .update(job_id, |job| {
                            job.status = JobStatus::Succeeded;
                            job.tx_hash = Some(outcome.tx_hash.clone());
                            job.error = None;
                            job.error_code = None;
                        })
                        .await;
                    return;
                }
                Err(failure) if failure.retryable && attempt < self.policy.settle_max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %failure,
                        "settlement failed, will retry"
                    );
                    if self
                        .slot
                        .update(job_id, |job| {
                            job.status = JobStatus::Retrying;
                            job.queue.last_error = Some(failure.reason.clone());
                            job.queue.next_retry_at_unix_s =
                                Some(now_unix_s() + delay.as_secs());
                        })
                        .await
                        .is_none()
                    {
                        return;
                    }
                    if sleep_or_cancel(delay, cancel_rx).await {
                        return;
                    }
                }
                Err(failure) => {
                    // The proof result stays on the job for manual settlement.
                    self.fail(job_id, &failure.reason, "settlement_failed").await;
                    return;
                }
            }
        }
    }

    async fn fail(&self, job_id: Uuid, reason: &str, code: &str) {
        tracing::warn!(job_id = %job_id, code, reason, "proof job failed");
        self.slot
            .update(job_id, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(reason.to_string());
                job.error_code = Some(code.to_string());
            })
            .await;
    }
}

/// Sleep, returning early (true) when cancellation fires.
async fn sleep_or_cancel(delay: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *cancel_rx.borrow(),
        _ = cancel_rx.changed() => *cancel_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classify::CallFailure,
        config::SettleMode,
        prover::{RemoteHealth, RemoteJobCreated, RemoteProof},
        settle::{AssembledInvocation, DirectClaimBody, RelayError, TransactionRelay},
    };
    use asteroids_claim_core::constants::{
        MAX_FRAMES_DEFAULT, RULES_TAG, TAPE_FOOTER_SIZE, TAPE_HEADER_SIZE, TAPE_MAGIC, TAPE_VERSION,
    };
    use asteroids_claim_core::crc32;
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    const CLAIMANT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

    fn build_tape(seed: u32, frame_count: u32, final_score: u32) -> Vec<u8> {
        let total = TAPE_HEADER_SIZE + frame_count as usize + TAPE_FOOTER_SIZE;
        let mut tape = vec![0u8; total];
        tape[0..4].copy_from_slice(&TAPE_MAGIC.to_le_bytes());
        tape[4] = TAPE_VERSION;
        tape[5] = RULES_TAG;
        tape[8..12].copy_from_slice(&seed.to_le_bytes());
        tape[12..16].copy_from_slice(&frame_count.to_le_bytes());
        tape[16..16 + CLAIMANT.len()].copy_from_slice(CLAIMANT.as_bytes());

        let footer_at = TAPE_HEADER_SIZE + frame_count as usize;
        tape[footer_at..footer_at + 4].copy_from_slice(&final_score.to_le_bytes());
        tape[footer_at + 4..footer_at + 8].copy_from_slice(&1u32.to_le_bytes());
        let checksum = crc32(&tape[..footer_at]);
        tape[footer_at + 8..footer_at + 12].copy_from_slice(&checksum.to_le_bytes());
        tape
    }

    fn journal_for(tape: &[u8], seed: u32, frame_count: u32, final_score: u32) -> ScoreJournal {
        ScoreJournal {
            seed,
            frame_count,
            final_score,
            final_rng_state: 1,
            tape_checksum: crc32(&tape[..tape.len() - TAPE_FOOTER_SIZE]),
            rules_digest: RULES_DIGEST,
            claimant_address: CLAIMANT.to_string(),
        }
    }

    struct ScriptedProver {
        submit_failures_before_success: AtomicU32,
        polls_until_done: AtomicU32,
        journal: Mutex<Vec<u8>>,
        fail_remote_job: bool,
        /// Initial polls that report the remote job as gone.
        lost_polls: AtomicU32,
        submits: AtomicU32,
        cancels: Mutex<Vec<String>>,
    }

    impl ScriptedProver {
        fn succeeding(journal: Vec<u8>) -> Self {
            Self {
                submit_failures_before_success: AtomicU32::new(0),
                polls_until_done: AtomicU32::new(2),
                journal: Mutex::new(journal),
                fail_remote_job: false,
                lost_polls: AtomicU32::new(0),
                submits: AtomicU32::new(0),
                cancels: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProverApi for ScriptedProver {
        async fn submit_tape(
            &self,
            _tape: &[u8],
            _receipt_kind: ReceiptKind,
        ) -> Result<RemoteJobCreated, CallFailure> {
            let remaining = self.submit_failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.submit_failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(CallFailure::retryable("prover busy"));
            }
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteJobCreated {
                job_id: "remote-1".to_string(),
                status: "queued".to_string(),
                status_url: Some("/api/jobs/remote-1".to_string()),
            })
        }

        async fn fetch_job(&self, job_id: &str) -> Result<RemoteJob, CallFailure> {
            let lost = self.lost_polls.load(Ordering::SeqCst);
            if lost > 0 {
                self.lost_polls.store(lost - 1, Ordering::SeqCst);
                return Err(CallFailure::fatal(format!("job not found: {job_id}")));
            }
            let remaining = self.polls_until_done.load(Ordering::SeqCst);
            if remaining > 0 {
                self.polls_until_done.store(remaining - 1, Ordering::SeqCst);
                return Ok(RemoteJob {
                    job_id: job_id.to_string(),
                    status: "running".to_string(),
                    result: None,
                    error: None,
                    error_code: None,
                });
            }
            if self.fail_remote_job {
                return Ok(RemoteJob {
                    job_id: job_id.to_string(),
                    status: "failed".to_string(),
                    result: None,
                    error: Some("guest panicked".to_string()),
                    error_code: Some("proof_failed".to_string()),
                });
            }
            Ok(RemoteJob {
                job_id: job_id.to_string(),
                status: "succeeded".to_string(),
                result: Some(RemoteEnvelope {
                    proof: RemoteProof {
                        journal: self.journal.lock().unwrap().clone(),
                        receipt: vec![0xAB; 16],
                        requested_receipt_kind: ReceiptKind::Groth16,
                        produced_receipt_kind: Some(ReceiptKind::Groth16),
                        stats: None,
                    },
                    elapsed_ms: 1234,
                }),
                error: None,
                error_code: None,
            })
        }

        async fn cancel_job(&self, job_id: &str) -> Result<(), CallFailure> {
            self.cancels.lock().unwrap().push(job_id.to_string());
            Ok(())
        }

        async fn fetch_health(&self) -> Result<RemoteHealth, CallFailure> {
            Err(CallFailure::retryable("not probed in tests"))
        }
    }

    struct ScriptedRelay {
        failures_before_success: AtomicU32,
        fatal: bool,
    }

    #[async_trait]
    impl TransactionRelay for ScriptedRelay {
        async fn submit_claim(&self, _body: &DirectClaimBody) -> Result<String, RelayError> {
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                if self.fatal {
                    return Err(RelayError::Execution {
                        message: "Error(Contract, #3)".to_string(),
                    });
                }
                return Err(RelayError::Transport {
                    status: Some(503),
                    message: "relay busy".to_string(),
                });
            }
            Ok("deadbeef".to_string())
        }

        async fn submit_assembled(&self, _tx: &AssembledInvocation) -> Result<String, RelayError> {
            Ok("deadbeef".to_string())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            dispatch_max_attempts: 3,
            dispatch_base_delay: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            poll_error_limit: 3,
            recovery_max_attempts: 1,
            settle_max_attempts: 3,
        }
    }

    fn orchestrator(
        prover: Arc<dyn ProverApi>,
        relay: ScriptedRelay,
    ) -> (Arc<Orchestrator>, Arc<JobSlot>) {
        let slot = Arc::new(JobSlot::new());
        let mode = SettleMode::DirectRelay {
            url: "https://relay.test".to_string(),
            api_key: None,
        };
        let settler = Arc::new(SettlementSubmitter::new(Some(mode), Box::new(relay)));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&slot),
            prover,
            settler,
            Arc::new(HealthState::new()),
            fast_policy(),
            2 * 1024 * 1024,
            MAX_FRAMES_DEFAULT,
            Duration::from_secs(5),
        ));
        (orchestrator, slot)
    }

    async fn wait_terminal(slot: &JobSlot, job_id: Uuid) -> ProofJob {
        for _ in 0..500 {
            if let Some(job) = slot.get(job_id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn full_flight_ends_succeeded_with_tx_hash() {
        let tape = build_tape(0xDEAD_BEEF, 200, 50_000);
        let journal = journal_for(&tape, 0xDEAD_BEEF, 200, 50_000);
        let prover = Arc::new(ScriptedProver::succeeding(journal.encode_raw()));
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover, relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        assert_eq!(admitted.status, JobStatus::Queued);

        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.tx_hash.as_deref(), Some("deadbeef"));
        let result = done.result.unwrap();
        assert_eq!(result.summary.journal.final_score, 50_000);
        assert_eq!(result.summary.journal.claimant_address, CLAIMANT);
    }

    #[tokio::test]
    async fn second_submission_is_rejected_with_active_snapshot() {
        let tape = build_tape(1, 300, 10);
        let journal = journal_for(&tape, 1, 300, 10);
        let prover = Arc::new(ScriptedProver::succeeding(journal.encode_raw()));
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, _slot) = orchestrator(prover, relay);

        let first = orchestrator.submit(tape.clone()).await.unwrap();
        match orchestrator.submit(tape).await {
            Err(SubmitError::JobActive(active)) => assert_eq!(active.job_id, first.job_id),
            other => panic!("expected JobActive, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_retries_transients_then_succeeds() {
        let tape = build_tape(2, 50, 777);
        let journal = journal_for(&tape, 2, 50, 777);
        let prover = Arc::new(ScriptedProver {
            submit_failures_before_success: AtomicU32::new(2),
            polls_until_done: AtomicU32::new(0),
            journal: Mutex::new(journal.encode_raw()),
            fail_remote_job: false,
            lost_polls: AtomicU32::new(0),
            submits: AtomicU32::new(0),
            cancels: Mutex::new(Vec::new()),
        });
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover, relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.queue.attempts, 3);
    }

    #[tokio::test]
    async fn remote_failure_maps_to_operator_text() {
        let tape = build_tape(3, 40, 1);
        let prover = Arc::new(ScriptedProver {
            submit_failures_before_success: AtomicU32::new(0),
            polls_until_done: AtomicU32::new(1),
            journal: Mutex::new(Vec::new()),
            fail_remote_job: true,
            lost_polls: AtomicU32::new(0),
            submits: AtomicU32::new(0),
            cancels: Mutex::new(Vec::new()),
        });
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover, relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("guest panicked"));
        assert_eq!(done.error_code.as_deref(), Some("proof_failed"));
    }

    #[tokio::test]
    async fn wrong_rules_digest_in_journal_fails_before_settlement() {
        let tape = build_tape(4, 60, 900);
        let mut journal = journal_for(&tape, 4, 60, 900);
        journal.rules_digest ^= 1;
        let prover = Arc::new(ScriptedProver::succeeding(journal.encode_raw()));
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover, relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_code.as_deref(), Some("rules_digest_mismatch"));
        assert!(done.tx_hash.is_none());
    }

    #[tokio::test]
    async fn settlement_transient_retries_then_succeeds() {
        let tape = build_tape(5, 70, 4_000);
        let journal = journal_for(&tape, 5, 70, 4_000);
        let prover = Arc::new(ScriptedProver::succeeding(journal.encode_raw()));
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(2),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover, relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.tx_hash.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn fatal_settlement_keeps_the_proof_result() {
        let tape = build_tape(6, 80, 123);
        let journal = journal_for(&tape, 6, 80, 123);
        let prover = Arc::new(ScriptedProver::succeeding(journal.encode_raw()));
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(10),
            fatal: true,
        };
        let (orchestrator, slot) = orchestrator(prover, relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_code.as_deref(), Some("settlement_failed"));
        assert_eq!(
            done.error.as_deref(),
            Some("this journal has already been claimed")
        );
        assert!(done.result.is_some());
    }

    #[tokio::test]
    async fn oversized_and_garbage_tapes_are_rejected_at_admission() {
        let journal = Vec::new();
        let prover = Arc::new(ScriptedProver::succeeding(journal));
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, _slot) = orchestrator(prover, relay);

        assert!(matches!(
            orchestrator.submit(vec![0u8; 3 * 1024 * 1024]).await,
            Err(SubmitError::TapeTooLarge { .. })
        ));
        assert!(matches!(
            orchestrator.submit(vec![0u8; 100]).await,
            Err(SubmitError::InvalidTape(_))
        ));
        assert!(matches!(
            orchestrator.submit(build_tape(1, 10, 0)).await,
            Err(SubmitError::ZeroScore)
        ));
    }

    #[tokio::test]
    async fn lost_remote_job_is_retried_by_resubmitting_the_tape() {
        let tape = build_tape(7, 90, 2_500);
        let journal = journal_for(&tape, 7, 90, 2_500);
        let prover = Arc::new(ScriptedProver {
            submit_failures_before_success: AtomicU32::new(0),
            polls_until_done: AtomicU32::new(1),
            journal: Mutex::new(journal.encode_raw()),
            fail_remote_job: false,
            lost_polls: AtomicU32::new(1),
            submits: AtomicU32::new(0),
            cancels: Mutex::new(Vec::new()),
        });
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover.clone(), relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        let done = wait_terminal(&slot, admitted.job_id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.prover.recovery_attempts, 1);
        assert_eq!(prover.submits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_tells_the_remote_prover_to_stop() {
        let tape = build_tape(8, 120, 3_000);
        let journal = journal_for(&tape, 8, 120, 3_000);
        let prover = Arc::new(ScriptedProver {
            submit_failures_before_success: AtomicU32::new(0),
            polls_until_done: AtomicU32::new(u32::MAX),
            journal: Mutex::new(journal.encode_raw()),
            fail_remote_job: false,
            lost_polls: AtomicU32::new(0),
            submits: AtomicU32::new(0),
            cancels: Mutex::new(Vec::new()),
        });
        let relay = ScriptedRelay {
            failures_before_success: AtomicU32::new(0),
            fatal: false,
        };
        let (orchestrator, slot) = orchestrator(prover.clone(), relay);

        let admitted = orchestrator.submit(tape).await.unwrap();
        for _ in 0..500 {
            let dispatched = slot
                .get(admitted.job_id)
                .await
                .is_some_and(|job| job.prover.job_id.is_some());
            if dispatched {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            orchestrator.cancel(admitted.job_id).await,
            CancelResult::Cancelled
        );
        let after = slot.get(admitted.job_id).await.unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.error_code.as_deref(), Some("cancelled"));

        // the remote abandon is fired off the cancel path
        for _ in 0..500 {
            if !prover.cancels.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            *prover.cancels.lock().unwrap(),
            vec!["remote-1".to_string()]
        );
    }
}
