//! End-to-end flow through the HTTP surface: admit a tape, watch the job
//! cross dispatch and proving, and land a settled claim. External services
//! are mocked at the seam traits.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use actix_web::{http::StatusCode, test as awtest, web::Data, App};
use asteroids_claim_core::constants::{
    RULES_DIGEST, RULES_TAG, TAPE_FOOTER_SIZE, TAPE_HEADER_SIZE, TAPE_MAGIC, TAPE_VERSION,
};
use asteroids_claim_core::{crc32, parse_tape_summary, ScoreJournal};
use async_trait::async_trait;
use claim_gateway::{
    classify::CallFailure,
    config::{GatewayConfig, SettleMode},
    handlers,
    health::HealthState,
    jobs::{Orchestrator, RetryPolicy},
    ledger::{LedgerResolver, LedgerRpc},
    prover::{ProverApi, RemoteEnvelope, RemoteHealth, RemoteJob, RemoteJobCreated, RemoteProof},
    settle::{AssembledInvocation, DirectClaimBody, RelayError, TransactionRelay},
    slot::JobSlot,
    types::ReceiptKind,
    AppState,
};
use serde_json::Value;

const CLAIMANT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";
const CONTRACT: &str = "CA7QYNF7SOWQ3GLR2BGMZEHXAVIRZA4KVWLTJJFC7MGXUA74P7UJUWDA";

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
    tape[footer_at + 4..footer_at + 8].copy_from_slice(&7u32.to_le_bytes());
    let checksum = crc32(&tape[..footer_at]);
    tape[footer_at + 8..footer_at + 12].copy_from_slice(&checksum.to_le_bytes());
    tape
}

/// Proves whatever tape it is handed: two `running` polls, then a journal
/// derived from the tape itself. Set `polls_until_done` high to keep the
/// job in flight.
struct FlowProver {
    polls_until_done: AtomicU32,
    journal: Mutex<Option<Vec<u8>>>,
    cancels: Mutex<Vec<String>>,
}

impl FlowProver {
    fn new(polls_until_done: u32) -> Self {
        Self {
            polls_until_done: AtomicU32::new(polls_until_done),
            journal: Mutex::new(None),
            cancels: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProverApi for FlowProver {
    async fn submit_tape(
        &self,
        tape: &[u8],
        _receipt_kind: ReceiptKind,
    ) -> Result<RemoteJobCreated, CallFailure> {
        let summary = parse_tape_summary(tape, 0)
            .map_err(|err| CallFailure::fatal(format!("bad tape: {err}")))?;
        let journal = ScoreJournal {
            seed: summary.seed,
            frame_count: summary.frame_count,
            final_score: summary.final_score,
            final_rng_state: summary.final_rng_state,
            tape_checksum: summary.checksum,
            rules_digest: RULES_DIGEST,
            claimant_address: summary.claimant_address,
        };
        *self.journal.lock().unwrap() = Some(journal.encode_raw());
        Ok(RemoteJobCreated {
            job_id: "remote-flow".to_string(),
            status: "queued".to_string(),
            status_url: Some("/api/jobs/remote-flow".to_string()),
        })
    }

    async fn fetch_job(&self, job_id: &str) -> Result<RemoteJob, CallFailure> {
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
        let journal = self
            .journal
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CallFailure::fatal("no tape was submitted"))?;
        Ok(RemoteJob {
            job_id: job_id.to_string(),
            status: "succeeded".to_string(),
            result: Some(RemoteEnvelope {
                proof: RemoteProof {
                    journal,
                    receipt: vec![0xCD; 32],
                    requested_receipt_kind: ReceiptKind::Groth16,
                    produced_receipt_kind: Some(ReceiptKind::Groth16),
                    stats: None,
                },
                elapsed_ms: 4321,
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
        Err(CallFailure::retryable("not probed"))
    }
}

#[derive(Default)]
struct FlowRelay {
    claims: Mutex<Vec<DirectClaimBody>>,
}

/// Orphan-rule workaround: `TransactionRelay` can't be implemented for
/// `Arc<FlowRelay>` outside the defining crate, so wrap the shared handle.
struct FlowRelayHandle(Arc<FlowRelay>);

#[async_trait]
impl TransactionRelay for FlowRelayHandle {
    async fn submit_claim(&self, body: &DirectClaimBody) -> Result<String, RelayError> {
        self.0.claims.lock().unwrap().push(body.clone());
        Ok("a1b2c3".to_string())
    }

    async fn submit_assembled(&self, _tx: &AssembledInvocation) -> Result<String, RelayError> {
        Ok("a1b2c3".to_string())
    }
}

struct EmptyRpc;

#[async_trait]
impl LedgerRpc for EmptyRpc {
    async fn get_ledger_entry(&self, _key: &str) -> Result<Option<Value>, CallFailure> {
        Ok(None)
    }
}

fn flow_state(prover: Arc<dyn ProverApi>, relay: Arc<FlowRelay>) -> AppState {
    let config = Arc::new(GatewayConfig {
        prover_url: "http://127.0.0.1:8787".to_string(),
        prover_api_key: None,
        rpc_url: "http://127.0.0.1:8000".to_string(),
        contract_id: CONTRACT.to_string(),
        settle: Some(SettleMode::DirectRelay {
            url: "https://relay.test".to_string(),
            api_key: None,
        }),
        max_tape_bytes: 2 * 1024 * 1024,
        max_frames: 108_000,
        api_key: None,
        prover_deadline: Duration::from_secs(30),
        health_refresh: Duration::from_secs(60),
        http_keep_alive_secs: 75,
        http_workers: None,
    });
    let slot = Arc::new(JobSlot::new());
    let settler = Arc::new(claim_gateway::settle::SettlementSubmitter::new(
        config.settle.clone(),
        Box::new(FlowRelayHandle(relay)),
    ));
    let health = Arc::new(HealthState::new());
    let policy = RetryPolicy {
        dispatch_base_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        ..RetryPolicy::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&slot),
        prover,
        settler,
        Arc::clone(&health),
        policy,
        config.max_tape_bytes,
        config.max_frames,
        config.prover_deadline,
    ));
    AppState {
        config,
        slot,
        orchestrator,
        ledger: Arc::new(LedgerResolver::new(Box::new(EmptyRpc))),
        health,
    }
}

macro_rules! poll_until_terminal {
    ($app:expr, $job_id:expr) => {{
        let mut terminal: Option<Value> = None;
        for _ in 0..500 {
            let resp = awtest::call_service(
                $app,
                awtest::TestRequest::get()
                    .uri(&format!("/api/proofs/jobs/{}", $job_id))
                    .to_request(),
            )
            .await;
            let body: Value = awtest::read_body_json(resp).await;
            if body["status"] == "succeeded" || body["status"] == "failed" {
                terminal = Some(body);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        terminal.expect("job never reached a terminal state")
    }};
}

#[actix_web::test]
async fn full_hour_tape_proves_and_settles() {
    let relay = Arc::new(FlowRelay::default());
    let state = flow_state(Arc::new(FlowProver::new(2)), relay.clone());
    let app = awtest::init_service(
        App::new()
            .app_data(Data::new(state))
            .configure(handlers::routes),
    )
    .await;

    let tape = build_tape(0xDEAD_BEEF, 108_000, 50_000);
    let created = awtest::call_service(
        &app,
        awtest::TestRequest::post()
            .uri("/api/proofs/jobs")
            .set_payload(tape.clone())
            .to_request(),
    )
    .await;
    assert_eq!(created.status(), StatusCode::ACCEPTED);
    let created_body: Value = awtest::read_body_json(created).await;
    let job_id = created_body["job_id"].as_str().unwrap().to_string();

    // A second tape is turned away while the first is in flight.
    let second = awtest::call_service(
        &app,
        awtest::TestRequest::post()
            .uri("/api/proofs/jobs")
            .set_payload(tape)
            .to_request(),
    )
    .await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let second_body: Value = awtest::read_body_json(second).await;
    assert_eq!(second_body["error_code"], "job_active");
    assert_eq!(second_body["active_job"]["job_id"].as_str().unwrap(), job_id);

    let done = poll_until_terminal!(&app, job_id);
    assert_eq!(done["status"], "succeeded", "job body: {done}");
    assert_eq!(done["tx_hash"], "a1b2c3");
    let journal = &done["result"]["summary"]["journal"];
    assert_eq!(journal["final_score"], 50_000);
    assert_eq!(journal["seed"], 0xDEAD_BEEFu32);
    assert_eq!(journal["claimant_address"], CLAIMANT);

    let claims = relay.claims.lock().unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].claimant_address, CLAIMANT);
    assert!(!claims[0].journal_raw_hex.is_empty());
}

#[actix_web::test]
async fn cancelling_an_in_flight_job_frees_the_slot() {
    let relay = Arc::new(FlowRelay::default());
    // effectively never finishes on its own
    let prover = Arc::new(FlowProver::new(u32::MAX));
    let state = flow_state(prover.clone(), relay);
    let app = awtest::init_service(
        App::new()
            .app_data(Data::new(state))
            .configure(handlers::routes),
    )
    .await;

    let tape = build_tape(1, 600, 9_000);
    let created: Value = awtest::read_body_json(
        awtest::call_service(
            &app,
            awtest::TestRequest::post()
                .uri("/api/proofs/jobs")
                .set_payload(tape.clone())
                .to_request(),
        )
        .await,
    )
    .await;
    let job_id = created["job_id"].as_str().unwrap().to_string();

    // wait for dispatch so the remote job id is on the record
    for _ in 0..500 {
        let body: Value = awtest::read_body_json(
            awtest::call_service(
                &app,
                awtest::TestRequest::get()
                    .uri(&format!("/api/proofs/jobs/{job_id}"))
                    .to_request(),
            )
            .await,
        )
        .await;
        if body["prover"]["job_id"].is_string() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = awtest::call_service(
        &app,
        awtest::TestRequest::delete()
            .uri(&format!("/api/proofs/jobs/{job_id}"))
            .to_request(),
    )
    .await;
    assert_eq!(cancelled.status(), StatusCode::OK);

    // the prover is told to abandon the remote job
    for _ in 0..500 {
        if !prover.cancels.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        *prover.cancels.lock().unwrap(),
        vec!["remote-flow".to_string()]
    );

    let readmitted = awtest::call_service(
        &app,
        awtest::TestRequest::post()
            .uri("/api/proofs/jobs")
            .set_payload(tape)
            .to_request(),
    )
    .await;
    assert_eq!(readmitted.status(), StatusCode::ACCEPTED);
    let body: Value = awtest::read_body_json(readmitted).await;
    assert_ne!(body["job_id"].as_str().unwrap(), job_id);
}
