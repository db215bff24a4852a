use crate::domain::payment::{Payment, PaymentStatus, TransitionOrigin, TRANSACTION_UID_KEY};
use crate::domain::run_log::{RunCounts, RunKind, RunLog, RunStatus};
use crate::error::DataIntegrityError;
use crate::gateways::{PaymentGateway, TransactionStatus};
use crate::repo::ledger_store::LedgerStore;
use crate::service::alerting::{self, AlertPolicy};
use crate::service::entitlements::{self, GrantOutcome};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn default_max_age_hours() -> i64 {
    72
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncParams {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcomeKind {
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSyncOutcome {
    pub payment_id: String,
    pub outcome: SyncOutcomeKind,
    pub previous_status: PaymentStatus,
    pub new_status: Option<PaymentStatus>,
    pub gateway_status_code: Option<String>,
    pub entitlement: Option<GrantOutcome>,
    pub message: String,
}

impl PaymentSyncOutcome {
    fn skipped(payment: &Payment, status_code: Option<&str>, message: &str) -> Self {
        Self {
            payment_id: payment.id.clone(),
            outcome: SyncOutcomeKind::Skipped,
            previous_status: payment.status,
            new_status: None,
            gateway_status_code: status_code.map(str::to_string),
            entitlement: None,
            message: message.to_string(),
        }
    }

    fn failed(payment: &Payment, status_code: Option<&str>, message: String) -> Self {
        Self {
            payment_id: payment.id.clone(),
            outcome: SyncOutcomeKind::Failed,
            previous_status: payment.status,
            new_status: None,
            gateway_status_code: status_code.map(str::to_string),
            entitlement: None,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub checked: i32,
    pub updated: i32,
    pub failed: i32,
    pub skipped: i32,
    pub duration_ms: i64,
    pub outcomes: Vec<PaymentSyncOutcome>,
    pub alert_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StuckPayment {
    pub payment_id: String,
    pub created_at: DateTime<Utc>,
    pub age_hours: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StuckPaymentReport {
    pub threshold_hours: i64,
    /// Oldest first.
    pub payments: Vec<StuckPayment>,
    pub alert_id: Option<Uuid>,
}

/// Re-checks pending payments against the gateway's live status.
#[derive(Clone)]
pub struct SyncService {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub alert_policy: AlertPolicy,
}

impl SyncService {
    pub async fn run(&self, params: SyncParams) -> Result<SyncSummary> {
        let gateway = self.gateway.name();
        let run = RunLog::start(RunKind::Sync, json!({ "gateway": gateway, "params": params }));
        self.store.open_run_log(&run).await?;
        tracing::info!(run_id = %run.id, gateway, max_age_hours = params.max_age_hours, limit = params.limit, "payment sync started");

        let since = Utc::now() - Duration::hours(params.max_age_hours);
        let pending = match self.store.pending_payments_since(since, params.limit).await {
            Ok(p) => p,
            Err(e) => {
                let failed = run.fail(RunCounts::default(), &e.to_string());
                if let Err(fe) = self.store.finalize_run_log(&failed).await {
                    tracing::error!(run_id = %failed.id, error = %fe, "failed to finalize run log");
                }
                tracing::error!(run_id = %failed.id, error = %e, "payment sync aborted");
                return Err(e.context("loading pending payments"));
            }
        };

        let mut counts = RunCounts::default();
        let mut outcomes = Vec::with_capacity(pending.len());
        for payment in &pending {
            let outcome = self.sync_one(payment).await;
            counts.checked += 1;
            match outcome.outcome {
                SyncOutcomeKind::Updated => counts.updated += 1,
                SyncOutcomeKind::Skipped => counts.skipped += 1,
                SyncOutcomeKind::Failed => counts.failed += 1,
            }
            outcomes.push(outcome);
        }

        let run = run.finish(
            RunStatus::from_failures(counts.failed),
            counts,
            json!({ "gateway": gateway, "params": params, "outcomes": outcomes }),
        );
        self.store.finalize_run_log(&run).await?;

        let mut summary = SyncSummary {
            run_id: run.id,
            status: run.status,
            checked: counts.checked,
            updated: counts.updated,
            failed: counts.failed,
            skipped: counts.skipped,
            duration_ms: run.duration_ms,
            outcomes,
            alert_id: None,
        };
        let alert = alerting::sync_failure_alert(&self.alert_policy, &summary);
        summary.alert_id = alerting::raise(self.store.as_ref(), alert).await.map(|a| a.id);

        tracing::info!(
            run_id = %summary.run_id,
            checked = summary.checked,
            updated = summary.updated,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.duration_ms,
            "payment sync finished"
        );
        Ok(summary)
    }

    async fn sync_one(&self, payment: &Payment) -> PaymentSyncOutcome {
        let Some(uid) = payment.metadata.transaction_uid() else {
            if let Some(keys) = payment.metadata.malformed_among(&[TRANSACTION_UID_KEY]) {
                let err = DataIntegrityError::MalformedMetadata {
                    payment_id: payment.id.clone(),
                    keys,
                };
                tracing::warn!(payment_id = %payment.id, error = %err, "payment skipped");
                return PaymentSyncOutcome::failed(payment, None, err.to_string());
            }
            return PaymentSyncOutcome::skipped(payment, None, "no gateway transaction uid yet");
        };
        self.check_payment(payment, uid).await
    }

    /// Asks the gateway for the status of `uid` and applies it to `payment`.
    pub async fn check_payment(&self, payment: &Payment, uid: &str) -> PaymentSyncOutcome {
        match self.gateway.check_transaction_status(uid).await {
            Ok(status) => self.apply_gateway_status(payment, &status).await,
            Err(e) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    transaction_uid = uid,
                    retryable = e.is_retryable(),
                    error = %e,
                    "status check failed"
                );
                PaymentSyncOutcome::failed(payment, None, e.to_string())
            }
        }
    }

    /// Brings `payment` in line with an authoritative gateway status. Shared by
    /// the sync loop and the verified callback path.
    pub async fn apply_gateway_status(&self, payment: &Payment, status: &TransactionStatus) -> PaymentSyncOutcome {
        let code = Some(status.status_code.as_str());
        let derived = status.derived_status();
        if derived == payment.status {
            return PaymentSyncOutcome::skipped(payment, code, "unchanged");
        }

        match entitlements::apply_status_change(
            self.store.as_ref(),
            payment,
            derived,
            TransitionOrigin::GatewayStatus,
        )
        .await
        {
            Ok(change) if change.applied => PaymentSyncOutcome {
                payment_id: payment.id.clone(),
                outcome: SyncOutcomeKind::Updated,
                previous_status: payment.status,
                new_status: Some(derived),
                gateway_status_code: Some(status.status_code.clone()),
                entitlement: Some(change.grant),
                message: status.description.clone(),
            },
            Ok(_) => PaymentSyncOutcome::skipped(payment, code, "payment changed concurrently"),
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "payment update failed");
                PaymentSyncOutcome::failed(payment, code, e.to_string())
            }
        }
    }

    /// Lists pending payments older than the stuck threshold and raises an
    /// alert naming the oldest. Does not change any payment.
    pub async fn detect_stuck_payments(&self) -> Result<StuckPaymentReport> {
        let now = Utc::now();
        let threshold_hours = self.alert_policy.stuck_after_hours;
        let pending = self
            .store
            .pending_payments_before(now - Duration::hours(threshold_hours))
            .await?;

        let mut report = StuckPaymentReport {
            threshold_hours,
            payments: pending
                .iter()
                .map(|p| StuckPayment {
                    payment_id: p.id.clone(),
                    created_at: p.created_at,
                    age_hours: p.age_hours(now),
                })
                .collect(),
            alert_id: None,
        };
        report.payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let alert = alerting::stuck_payments_alert(&report);
        report.alert_id = alerting::raise(self.store.as_ref(), alert).await.map(|a| a.id);

        if !report.payments.is_empty() {
            tracing::warn!(count = report.payments.len(), threshold_hours, "stuck pending payments detected");
        }
        Ok(report)
    }
}
