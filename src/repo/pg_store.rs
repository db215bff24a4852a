use crate::domain::alert::{Alert, AlertStatus};
use crate::domain::entitlement::{Entitlement, PassType};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::run_log::RunLog;
use crate::repo::alerts_repo::AlertsRepo;
use crate::repo::entitlements_repo::EntitlementsRepo;
use crate::repo::ledger_store::{GrantWrite, LedgerStore, TransitionWrite};
use crate::repo::payments_repo::PaymentsRepo;
use crate::repo::run_log_repo::RunLogRepo;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgLedgerStore {
    pub pool: PgPool,
    pub payments_repo: PaymentsRepo,
    pub entitlements_repo: EntitlementsRepo,
    pub run_log_repo: RunLogRepo,
    pub alerts_repo: AlertsRepo,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            payments_repo: PaymentsRepo { pool: pool.clone() },
            entitlements_repo: EntitlementsRepo { pool: pool.clone() },
            run_log_repo: RunLogRepo { pool: pool.clone() },
            alerts_repo: AlertsRepo { pool: pool.clone() },
            pool,
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn pending_payments_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>> {
        self.payments_repo.pending_since(since, limit).await
    }

    async fn pending_payments_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>> {
        self.payments_repo.pending_before(cutoff).await
    }

    async fn payments_created_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Payment>> {
        self.payments_repo.created_between(from, to).await
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        self.payments_repo.get(payment_id).await
    }

    async fn transition_payment(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
        grant: Option<&Entitlement>,
    ) -> Result<TransitionWrite> {
        let mut tx = self.pool.begin().await?;
        if !PaymentsRepo::compare_and_set_status(&mut *tx, payment_id, from, to, completed_at).await? {
            tx.rollback().await?;
            return Ok(TransitionWrite::Stale);
        }

        let mut granted = false;
        let mut revoked = 0;
        if to == PaymentStatus::Completed {
            if let Some(entitlement) = grant {
                granted = EntitlementsRepo::insert_locked(&mut *tx, entitlement).await?;
            }
        } else {
            revoked = EntitlementsRepo::delete_locked(&mut *tx, payment_id).await?;
        }
        tx.commit().await?;
        Ok(TransitionWrite::Applied { granted, revoked })
    }

    async fn pass_type(&self, pass_type_id: &str) -> Result<Option<PassType>> {
        self.entitlements_repo.pass_type(pass_type_id).await
    }

    async fn insert_entitlement_if_absent(&self, entitlement: &Entitlement) -> Result<GrantWrite> {
        self.entitlements_repo.insert_if_absent(entitlement).await
    }

    async fn entitlements_for_payment(&self, payment_id: &str) -> Result<Vec<Entitlement>> {
        self.entitlements_repo.for_payment(payment_id).await
    }

    async fn open_run_log(&self, run: &RunLog) -> Result<()> {
        self.run_log_repo.insert(run).await
    }

    async fn finalize_run_log(&self, run: &RunLog) -> Result<()> {
        self.run_log_repo.finalize(run).await
    }

    async fn recent_run_logs(&self, limit: i64) -> Result<Vec<RunLog>> {
        self.run_log_repo.recent(limit).await
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts_repo.insert(alert).await
    }

    async fn alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>> {
        self.alerts_repo.list(status).await
    }
}
