use std::{env, sync::Arc, time::Duration};

use asteroids_claim_core::constants::MAX_FRAMES_DEFAULT;

use crate::{
    health::HealthState,
    jobs::{Orchestrator, RetryPolicy},
    ledger::LedgerResolver,
    slot::JobSlot,
};

pub(crate) const DEFAULT_MAX_TAPE_BYTES: usize = 2 * 1024 * 1024;
pub(crate) const DEFAULT_DISPATCH_MAX_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_DISPATCH_BASE_DELAY_MS: u64 = 2_000;
pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
pub(crate) const DEFAULT_POLL_ERROR_LIMIT: u32 = 10;
pub(crate) const DEFAULT_RECOVERY_MAX_ATTEMPTS: u32 = 2;
pub(crate) const DEFAULT_SETTLE_MAX_ATTEMPTS: u32 = 4;
// Typical remote proofs land in ~5 min; give the prover double before giving up.
pub(crate) const DEFAULT_PROVER_DEADLINE_SECS: u64 = 10 * 60;
pub(crate) const DEFAULT_HEALTH_REFRESH_SECS: u64 = 60;
pub(crate) const DEFAULT_HTTP_KEEP_ALIVE_SECS: u64 = 75;

/// How the signed claim reaches the network.
#[derive(Debug, Clone)]
pub enum SettleMode {
    /// POST the journal to a hosted relay that assembles and submits the
    /// transaction itself.
    DirectRelay { url: String, api_key: Option<String> },
    /// Assemble the `submit_score` invocation locally and hand the envelope
    /// to a wallet-backed relay for signing and submission.
    WalletAssembled {
        relay_url: String,
        contract_id: String,
        source_account: String,
        network_passphrase: String,
    },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub prover_url: String,
    pub prover_api_key: Option<String>,
    pub rpc_url: String,
    pub contract_id: String,
    pub settle: Option<SettleMode>,
    pub max_tape_bytes: usize,
    pub max_frames: u32,
    pub api_key: Option<String>,
    pub prover_deadline: Duration,
    pub health_refresh: Duration,
    pub http_keep_alive_secs: u64,
    pub http_workers: Option<usize>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            prover_url: read_env_string("PROVER_URL", "http://127.0.0.1:8787"),
            prover_api_key: read_env_optional_string("PROVER_API_KEY"),
            rpc_url: read_env_string("STELLAR_RPC_URL", "https://soroban-testnet.stellar.org"),
            contract_id: read_env_string("SCORE_CONTRACT_ID", ""),
            settle: settle_mode_from_env(),
            max_tape_bytes: read_env_usize("MAX_TAPE_BYTES", DEFAULT_MAX_TAPE_BYTES),
            max_frames: read_env_u32("MAX_FRAMES", MAX_FRAMES_DEFAULT),
            api_key: read_env_optional_string("GATEWAY_API_KEY"),
            prover_deadline: Duration::from_secs(read_env_u64(
                "PROVER_DEADLINE_SECS",
                DEFAULT_PROVER_DEADLINE_SECS,
            )),
            health_refresh: Duration::from_secs(read_env_u64(
                "HEALTH_REFRESH_SECS",
                DEFAULT_HEALTH_REFRESH_SECS,
            )),
            http_keep_alive_secs: read_env_u64("HTTP_KEEP_ALIVE_SECS", DEFAULT_HTTP_KEEP_ALIVE_SECS),
            http_workers: read_env_optional_usize("HTTP_WORKERS"),
        }
    }

    pub fn retry_policy_from_env() -> RetryPolicy {
        RetryPolicy {
            dispatch_max_attempts: read_env_u32(
                "DISPATCH_MAX_ATTEMPTS",
                DEFAULT_DISPATCH_MAX_ATTEMPTS,
            ),
            dispatch_base_delay: Duration::from_millis(read_env_u64(
                "DISPATCH_BASE_DELAY_MS",
                DEFAULT_DISPATCH_BASE_DELAY_MS,
            )),
            poll_interval: Duration::from_millis(read_env_u64(
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            poll_error_limit: read_env_u32("POLL_ERROR_LIMIT", DEFAULT_POLL_ERROR_LIMIT),
            recovery_max_attempts: read_env_u32(
                "RECOVERY_MAX_ATTEMPTS",
                DEFAULT_RECOVERY_MAX_ATTEMPTS,
            ),
            settle_max_attempts: read_env_u32("SETTLE_MAX_ATTEMPTS", DEFAULT_SETTLE_MAX_ATTEMPTS),
        }
    }
}

/// Choose the settlement path from the environment. `RELAY_URL` alone selects
/// the hosted relay; adding `SOURCE_ACCOUNT` switches to locally assembled
/// transactions. Neither set means settlement is unconfigured and every job
/// that reaches the settle layer fails fast with a config error.
fn settle_mode_from_env() -> Option<SettleMode> {
    let relay_url = read_env_optional_string("RELAY_URL")?;

    if let Some(source_account) = read_env_optional_string("SOURCE_ACCOUNT") {
        return Some(SettleMode::WalletAssembled {
            relay_url,
            contract_id: read_env_string("SCORE_CONTRACT_ID", ""),
            source_account,
            network_passphrase: read_env_string(
                "NETWORK_PASSPHRASE",
                "Test SDF Network ; September 2015",
            ),
        });
    }

    Some(SettleMode::DirectRelay {
        url: relay_url,
        api_key: read_env_optional_string("RELAY_API_KEY"),
    })
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub slot: Arc<JobSlot>,
    pub orchestrator: Arc<Orchestrator>,
    pub ledger: Arc<LedgerResolver>,
    pub health: Arc<HealthState>,
}

pub(crate) fn read_env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn read_env_optional_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_optional_usize(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

pub(crate) fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
