use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use dotenvy::dotenv;
use grants_core::config::Config;
use grants_core::jobs::{JobRunner, JobSpec};
use grants_core::safemode::{Breaker, FailureBreaker, MemoryBreaker, RedemptionGate};
use grants_core::store::Store;
use grants_core::voucher::Ed25519Signer;
use grants_core::wallet::{HotWalletHandle, UpholdClient, UpholdFactory};
use grants_core::{RedeemEngine, RedeemEngineConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = install_metrics();
    let config = Config::from_env()?;

    let store = Store::connect(&config.database_url, config.ro_database_url.as_deref()).await?;
    store.migrate().await?;

    let breaker: Arc<dyn Breaker> = match &config.redis_url {
        Some(url) => Arc::new(
            grants_core::safemode::RedisBreaker::connect(url)
                .await
                .context("connect to breaker store")?,
        ),
        None => Arc::new(MemoryBreaker::new()),
    };
    let gate = RedemptionGate::new();
    let failure_breaker = FailureBreaker::new(
        breaker,
        gate.clone(),
        config.breaker_error_threshold,
        config.breaker_ttl_seconds,
    );

    let hot_wallet_signer = if config.grant_wallet_private_key_hex.is_empty() {
        Ed25519Signer::generate()
    } else {
        let secret_bytes = hex::decode(&config.grant_wallet_private_key_hex)?;
        let secret: [u8; 32] = secret_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("GRANT_WALLET_PRIVATE_KEY_HEX must be 32 bytes"))?;
        Ed25519Signer::from_bytes(&secret, "hot-wallet")
    };
    let hot_wallet_client = UpholdClient::for_hot_wallet(
        config.uphold_base_url.clone(),
        config.grant_wallet_card_id.clone(),
        config.uphold_access_token.clone(),
        hot_wallet_signer,
    );
    let hot_wallet = HotWalletHandle::new(Arc::new(hot_wallet_client));
    let wallet_factory = Arc::new(UpholdFactory::new(
        config.uphold_base_url.clone(),
        config.uphold_access_token.clone(),
    ));

    let redeem_engine = Arc::new(RedeemEngine::new(
        store.clone(),
        hot_wallet.clone(),
        wallet_factory,
        gate,
        failure_breaker,
        RedeemEngineConfig {
            nominal_currency: config.nominal_currency.clone(),
            settlement_destination: config.settlement_destination.clone(),
            lower_tx_limit: config.lower_tx_limit,
            upper_tx_limit: config.upper_tx_limit,
        },
    ));

    let app_state = state::AppState {
        metrics: metrics_handle.clone(),
        redeem_engine,
    };

    let (job_runner, job_handles) = spawn_jobs(store.clone(), hot_wallet.clone());

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = format!("{host}:{port}");
    info!("listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    job_runner.shutdown();
    for handle in job_handles {
        let _ = handle.await;
    }
    Ok(())
}

fn install_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("install metrics recorder")
}

/// Populates the default jobs: a promotion-expiry sweep, an active-claims
/// gauge refresh, and a hot-wallet balance gauge refresh.
fn spawn_jobs(
    store: Store,
    hot_wallet: HotWalletHandle,
) -> (JobRunner, Vec<tokio::task::JoinHandle<()>>) {
    let expiry_store = store.clone();
    let expiry_job = JobSpec {
        name: "deactivate-expired-promotions",
        worker_count: 1,
        cadence: Duration::from_secs(60),
        func: Arc::new(move || {
            let store = expiry_store.clone();
            Box::pin(async move {
                match store.deactivate_expired_promotions().await {
                    Ok(n) => (n > 0, None),
                    Err(e) => (false, Some(anyhow::anyhow!(e))),
                }
            })
        }),
    };

    let gauge_store = store;
    let gauge_job = JobSpec {
        name: "publish-active-claims-gauge",
        worker_count: 1,
        cadence: Duration::from_secs(30),
        func: Arc::new(move || {
            let store = gauge_store.clone();
            Box::pin(async move {
                match store.count_active_claims().await {
                    Ok(count) => {
                        grants_core::metrics::publish_active_claims(count);
                        (true, None)
                    }
                    Err(e) => (false, Some(anyhow::anyhow!(e))),
                }
            })
        }),
    };

    let balance_job = JobSpec {
        name: "publish-hot-wallet-balance-gauge",
        worker_count: 1,
        cadence: Duration::from_secs(30),
        func: Arc::new(move || {
            let client = hot_wallet.client();
            Box::pin(async move {
                match client.balance(true).await {
                    Ok(balance) => {
                        grants_core::metrics::publish_hot_wallet_spendable(balance.spendable);
                        (true, None)
                    }
                    Err(e) => (false, Some(anyhow::anyhow!(e))),
                }
            })
        }),
    };

    JobRunner::start(vec![expiry_job, gauge_job, balance_job])
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
