pub mod config;
pub mod error;
pub mod domain {
    pub mod alert;
    pub mod entitlement;
    pub mod payment;
    pub mod run_log;
    pub mod transaction;
}
pub mod gateways;
pub mod http {
    pub mod handlers {
        pub mod ops;
        pub mod reconciliation;
        pub mod runs;
        pub mod sync;
        pub mod webhooks;
    }
    pub mod middleware {
        pub mod admin_auth;
    }
    pub mod routes;
}
pub mod ratelimit {
    pub mod limiter;
}
pub mod repo {
    pub mod alerts_repo;
    pub mod entitlements_repo;
    pub mod ledger_store;
    pub mod memory_store;
    pub mod payments_repo;
    pub mod pg_store;
    pub mod run_log_repo;
}
pub mod service {
    pub mod alerting;
    pub mod callback;
    pub mod entitlements;
    pub mod export_import;
    pub mod reconciliation;
    pub mod report;
    pub mod sync_service;
}

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub sync_service: service::sync_service::SyncService,
    pub reconciliation_service: service::reconciliation::ReconciliationService,
    pub store: Arc<dyn repo::ledger_store::LedgerStore>,
    pub limiter: Arc<ratelimit::limiter::RateLimiter>,
    pub sync_params: service::sync_service::SyncParams,
    pub callback_secret: Option<String>,
}
