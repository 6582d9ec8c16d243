use std::{env, sync::Arc, time::Duration};

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};

use claim_gateway::{
    config::SettleMode,
    handlers,
    health::{self, HealthState},
    jobs::Orchestrator,
    ledger::{LedgerResolver, StellarRpcClient},
    prover::HttpProverClient,
    settle::{HttpRelayClient, SettlementSubmitter},
    slot::JobSlot,
    AppState, GatewayConfig,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let bind_addr = env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
    let config = Arc::new(GatewayConfig::from_env());
    let policy = GatewayConfig::retry_policy_from_env();

    tracing::info!(
        bind_addr,
        prover_url = %config.prover_url,
        rpc_url = %config.rpc_url,
        contract_id = %config.contract_id,
        settlement_configured = config.settle.is_some(),
        max_tape_bytes = config.max_tape_bytes,
        max_frames = config.max_frames,
        auth_required = config.api_key.is_some(),
        "starting asteroids claim gateway"
    );

    let prover = Arc::new(
        HttpProverClient::new(config.prover_url.clone(), config.prover_api_key.clone())
            .map_err(std::io::Error::other)?,
    );
    let rpc = StellarRpcClient::new(config.rpc_url.clone()).map_err(std::io::Error::other)?;
    let ledger = Arc::new(LedgerResolver::new(Box::new(rpc)));

    let (relay_url, relay_api_key) = match &config.settle {
        Some(SettleMode::DirectRelay { url, api_key }) => (url.clone(), api_key.clone()),
        Some(SettleMode::WalletAssembled { relay_url, .. }) => (relay_url.clone(), None),
        // Never contacted: the submitter fails fast when unconfigured.
        None => ("http://127.0.0.1:0".to_string(), None),
    };
    let relay = HttpRelayClient::new(relay_url, relay_api_key).map_err(std::io::Error::other)?;
    let settler = Arc::new(SettlementSubmitter::new(
        config.settle.clone(),
        Box::new(relay),
    ));

    let health_state = Arc::new(HealthState::new());
    health::spawn_refresh_task(
        Arc::clone(&health_state),
        prover.clone(),
        config.health_refresh,
    );

    let slot = Arc::new(JobSlot::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&slot),
        prover,
        settler,
        Arc::clone(&health_state),
        policy,
        config.max_tape_bytes,
        config.max_frames,
        config.prover_deadline,
    ));

    let state = AppState {
        config: Arc::clone(&config),
        slot,
        orchestrator,
        ledger,
        health: health_state,
    };

    let max_tape_bytes = config.max_tape_bytes;
    let keep_alive = Duration::from_secs(config.http_keep_alive_secs);
    let http_workers = config.http_workers;

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(max_tape_bytes))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(handlers::routes)
    })
    .keep_alive(keep_alive);
    if let Some(workers) = http_workers {
        server = server.workers(workers);
    }

    server.bind(bind_addr)?.run().await
}
