use payments_reconciler::config::AppConfig;
use payments_reconciler::gateways::client::GatewayClient;
use payments_reconciler::gateways::PaymentGateway;
use payments_reconciler::http::routes::router;
use payments_reconciler::ratelimit::limiter::RateLimiter;
use payments_reconciler::repo::ledger_store::LedgerStore;
use payments_reconciler::repo::pg_store::PgLedgerStore;
use payments_reconciler::service::reconciliation::ReconciliationService;
use payments_reconciler::service::sync_service::SyncService;
use payments_reconciler::AppState;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limits, cfg.rate_limit_max_wait));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(GatewayClient::new(
        &cfg.gateway.base_url,
        &cfg.gateway.api_key,
        &cfg.gateway.secret_key,
        cfg.gateway.timeout_ms,
        limiter.clone(),
    ));

    let state = AppState {
        sync_service: SyncService {
            store: store.clone(),
            gateway: gateway.clone(),
            alert_policy: cfg.alert_policy,
        },
        reconciliation_service: ReconciliationService {
            store: store.clone(),
            gateway,
        },
        store,
        limiter,
        sync_params: cfg.sync,
        callback_secret: cfg.callback_secret.clone(),
    };

    if state.callback_secret.is_none() {
        tracing::warn!("CALLBACK_SECRET not set, gateway callbacks are accepted unsigned");
    }

    let app = router(state, cfg.internal_api_key.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
