use actix_web::{
    http::StatusCode,
    web::{self, Bytes, Data, Path},
    HttpRequest, HttpResponse, Responder,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::caller_may_mutate,
    jobs::SubmitError,
    ledger::{AssetIdentity, LedgerError},
    response::error_response,
    slot::CancelResult,
    types::{JobCreatedResponse, JobStatus},
    AppState,
};

#[derive(Debug, Serialize)]
struct GatewayHealthResponse {
    status: &'static str,
    service: &'static str,
    prover: crate::health::HealthSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_job_status: Option<JobStatus>,
    settlement_configured: bool,
    max_tape_bytes: usize,
    max_frames: u32,
    auth_required: bool,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    success: bool,
    contract_id: String,
    address: String,
    asset: AssetIdentity,
    /// i128 token units, decimal string.
    balance: String,
}

pub(crate) async fn health(state: Data<AppState>) -> impl Responder {
    let slotted = state.slot.snapshot().await;
    HttpResponse::Ok().json(GatewayHealthResponse {
        status: "ok",
        service: "asteroids-claim-gateway",
        prover: state.health.snapshot().await,
        active_job_id: slotted.as_ref().map(|job| job.job_id),
        active_job_status: slotted.as_ref().map(|job| job.status),
        settlement_configured: state.config.settle.is_some(),
        max_tape_bytes: state.config.max_tape_bytes,
        max_frames: state.config.max_frames,
        auth_required: state.config.api_key.is_some(),
    })
}

pub(crate) async fn create_proof_job(
    req: HttpRequest,
    state: Data<AppState>,
    body: Bytes,
) -> impl Responder {
    if !caller_may_mutate(req.headers(), state.config.api_key.as_deref()) {
        return unauthorized().await;
    }
    if body.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "tape payload is empty",
            Some("tape_empty"),
        );
    }

    match state.orchestrator.submit(body.to_vec()).await {
        Ok(job) => HttpResponse::Accepted().json(JobCreatedResponse {
            success: true,
            job_id: job.job_id,
            status: job.status,
            status_url: format!("/api/proofs/jobs/{}", job.job_id),
        }),
        Err(err @ SubmitError::TapeTooLarge { .. }) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string(), Some("tape_too_large"))
        }
        Err(err @ SubmitError::InvalidTape(_)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string(), Some("invalid_tape"))
        }
        Err(err @ SubmitError::ZeroScore) => error_response(
            StatusCode::BAD_REQUEST,
            err.to_string(),
            Some("zero_score_not_allowed"),
        ),
        Err(SubmitError::JobActive(active)) => HttpResponse::Conflict().json(serde_json::json!({
            "success": false,
            "error": "a proof job is already in flight",
            "error_code": "job_active",
            "active_job": *active,
        })),
        Err(err @ SubmitError::ProverDegraded { .. }) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            err.to_string(),
            Some("prover_degraded"),
        ),
    }
}

pub(crate) async fn get_proof_job(state: Data<AppState>, path: Path<Uuid>) -> impl Responder {
    let job_id = path.into_inner();
    match state.slot.get(job_id).await {
        Some(job) => HttpResponse::Ok().json(job),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("job not found: {job_id}"),
            Some("job_not_found"),
        ),
    }
}

pub(crate) async fn cancel_proof_job(
    req: HttpRequest,
    state: Data<AppState>,
    path: Path<Uuid>,
) -> impl Responder {
    if !caller_may_mutate(req.headers(), state.config.api_key.as_deref()) {
        return unauthorized().await;
    }

    let job_id = path.into_inner();
    match state.orchestrator.cancel(job_id).await {
        CancelResult::Cancelled => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "job_id": job_id,
            "status": "cancelled",
        })),
        CancelResult::AlreadyTerminal => error_response(
            StatusCode::CONFLICT,
            "job already reached a terminal state",
            Some("job_terminal"),
        ),
        CancelResult::NotFound => error_response(
            StatusCode::NOT_FOUND,
            format!("job not found: {job_id}"),
            Some("job_not_found"),
        ),
    }
}

pub(crate) async fn get_balance(state: Data<AppState>, path: Path<String>) -> impl Responder {
    let address = path.into_inner();
    let contract_id = state.config.contract_id.clone();
    if contract_id.is_empty() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "no score contract configured",
            Some("contract_unconfigured"),
        );
    }

    let asset = match state.ledger.asset_identity(&contract_id).await {
        Ok(asset) => asset,
        Err(err) => return ledger_error_response(err),
    };
    match state.ledger.balance(&contract_id, &address).await {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse {
            success: true,
            contract_id,
            address,
            asset,
            balance: balance.to_string(),
        }),
        Err(err) => ledger_error_response(err),
    }
}

fn ledger_error_response(err: LedgerError) -> HttpResponse {
    match err {
        LedgerError::BadAddress(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string(), Some("invalid_address"))
        }
        LedgerError::NotAToken { .. } => {
            error_response(StatusCode::BAD_REQUEST, err.to_string(), Some("not_a_token"))
        }
        LedgerError::Rpc(_) => error_response(
            StatusCode::BAD_GATEWAY,
            err.to_string(),
            Some("ledger_unavailable"),
        ),
        LedgerError::MalformedEntry(_) | LedgerError::BadAssetName(_) => error_response(
            StatusCode::BAD_GATEWAY,
            err.to_string(),
            Some("ledger_malformed"),
        ),
    }
}

pub(crate) async fn unauthorized() -> HttpResponse {
    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        Some("unauthorized"),
    )
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/health", web::get().to(health))
        .route("/api/proofs/jobs", web::post().to(create_proof_job))
        .route("/api/proofs/jobs/{job_id}", web::get().to(get_proof_job))
        .route(
            "/api/proofs/jobs/{job_id}",
            web::delete().to(cancel_proof_job),
        )
        .route("/api/balances/{address}", web::get().to(get_balance));
}
