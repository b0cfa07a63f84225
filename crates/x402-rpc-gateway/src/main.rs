use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x402_batch::{
    parse_caip2_chain_id, FacilitatorKind, InMemoryTokenStore, LocalFacilitator,
    RemoteFacilitator, TokenManager,
};
use x402_rpc_gateway::config::GatewayConfig;
use x402_rpc_gateway::middleware::{self, GateConfig, PaymentGate};
use x402_rpc_gateway::proxy::RpcProxy;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env if present; production uses real environment variables.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = match GatewayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "config error");
            std::process::exit(1);
        }
    };

    let proxy = match RpcProxy::new(&cfg.upstream_rpc_url) {
        Ok(proxy) => proxy,
        Err(e) => {
            tracing::error!(error = %e, "failed to create RPC proxy");
            std::process::exit(1);
        }
    };

    // Payment mode selection:
    //   FACILITATOR_URL set      -> remote facilitator
    //   GATEWAY_PRIVATE_KEY set  -> self-hosted local facilitator
    //   neither                  -> plain pass-through proxy
    let facilitator = if let Some(ref url) = cfg.facilitator_url {
        tracing::info!(url = %url, "payment mode: remote facilitator");
        Some(FacilitatorKind::Remote(RemoteFacilitator::new(url)))
    } else if let Some(ref key) = cfg.gateway_private_key {
        let chain_id = match parse_caip2_chain_id(&cfg.network) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(network = %cfg.network, error = %e, "invalid NETWORK for local facilitator");
                std::process::exit(1);
            }
        };
        let local = match LocalFacilitator::new(&cfg.settlement_rpc_url, key, chain_id) {
            Ok(local) => local,
            Err(e) => {
                tracing::error!(error = %e, "local facilitator init failed");
                std::process::exit(1);
            }
        };
        tracing::info!(
            settlement_rpc = %cfg.settlement_rpc_url,
            relayer = %local.relayer_address(),
            "payment mode: local facilitator"
        );
        Some(FacilitatorKind::Local(local))
    } else {
        tracing::info!("payment mode: disabled (set FACILITATOR_URL or GATEWAY_PRIVATE_KEY to enable)");
        None
    };

    let payments = facilitator.map(|facilitator| {
        let store = Arc::new(InMemoryTokenStore::new());
        let tokens = TokenManager::new(&cfg.jwt_secret, cfg.token_expiry, store);
        (facilitator, tokens)
    });

    let gate_cfg = GateConfig {
        network: cfg.network.clone(),
        pay_to: cfg.gateway_pay_to,
        asset: cfg.usdc_address,
        asset_domain_name: cfg.usdc_domain_name.clone(),
        asset_domain_version: cfg.usdc_domain_version.clone(),
        gateway_url: cfg.gateway_url.clone(),
        max_amount_required: cfg.max_amount_required,
        credits_per_payment: cfg.requests_per_payment(),
    };

    let gate = match PaymentGate::new(&gate_cfg, payments, proxy) {
        Ok(gate) => web::Data::new(gate),
        Err(e) => {
            tracing::error!(error = %e, "failed to create payment gate");
            std::process::exit(1);
        }
    };

    tracing::info!(
        port = cfg.port,
        upstream = %cfg.upstream_rpc_url,
        network = %cfg.network,
        pay_to = %cfg.gateway_pay_to,
        price_per_request = cfg.price_per_request,
        requests_per_payment = cfg.requests_per_payment(),
        "gateway starting"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(gate.clone())
            .default_service(web::to(middleware::entry::<FacilitatorKind, RpcProxy>))
    })
    .bind(("0.0.0.0", cfg.port))?
    .run()
    .await
}
