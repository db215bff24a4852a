use anyhow::Result;
use payments_reconciler::config::AppConfig;
use payments_reconciler::gateways::client::GatewayClient;
use payments_reconciler::ratelimit::limiter::RateLimiter;
use payments_reconciler::repo::pg_store::PgLedgerStore;
use payments_reconciler::service::sync_service::SyncService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let limiter = Arc::new(RateLimiter::new(cfg.rate_limits, cfg.rate_limit_max_wait));
    let sync = SyncService {
        store: Arc::new(PgLedgerStore::new(pool)),
        gateway: Arc::new(GatewayClient::new(
            &cfg.gateway.base_url,
            &cfg.gateway.api_key,
            &cfg.gateway.secret_key,
            cfg.gateway.timeout_ms,
            limiter,
        )),
        alert_policy: cfg.alert_policy,
    };

    tracing::info!(interval_secs = cfg.sync_interval.as_secs(), "payment sync worker started");
    loop {
        if let Err(e) = sync.run(cfg.sync).await {
            tracing::error!(error = %format!("{e:#}"), "scheduled payment sync failed");
        }
        if let Err(e) = sync.detect_stuck_payments().await {
            tracing::error!(error = %format!("{e:#}"), "stuck payment check failed");
        }

        tokio::time::sleep(cfg.sync_interval).await;
    }
}
