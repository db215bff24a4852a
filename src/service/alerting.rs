use crate::domain::alert::{Alert, AlertSeverity};
use crate::repo::ledger_store::LedgerStore;
use crate::service::reconciliation::ReconciliationResult;
use crate::service::sync_service::{StuckPaymentReport, SyncSummary};
use serde_json::json;

pub const SYNC_FAILURE_RATE: &str = "sync_failure_rate";
pub const STUCK_PAYMENTS: &str = "stuck_payments";
pub const RECONCILIATION_ISSUES: &str = "reconciliation_issues";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    pub sync_failure_ratio: f64,
    pub stuck_after_hours: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            sync_failure_ratio: 0.3,
            stuck_after_hours: 24,
        }
    }
}

pub fn sync_failure_alert(policy: &AlertPolicy, summary: &SyncSummary) -> Option<Alert> {
    if summary.checked == 0 {
        return None;
    }
    let ratio = summary.failed as f64 / summary.checked as f64;
    if ratio <= policy.sync_failure_ratio {
        return None;
    }

    Some(Alert::new(
        SYNC_FAILURE_RATE,
        AlertSeverity::Warning,
        format!("Payment sync failure rate {:.0}%", ratio * 100.0),
        format!(
            "{} of {} pending payments could not be checked against the gateway",
            summary.failed, summary.checked
        ),
        json!({
            "checked": summary.checked,
            "failed": summary.failed,
            "failure_ratio": ratio,
            "threshold": policy.sync_failure_ratio,
        }),
        Some(summary.run_id),
    ))
}

pub fn stuck_payments_alert(report: &StuckPaymentReport) -> Option<Alert> {
    let oldest = report.payments.first()?;

    Some(Alert::new(
        STUCK_PAYMENTS,
        AlertSeverity::Warning,
        format!(
            "{} payments pending for more than {}h",
            report.payments.len(),
            report.threshold_hours
        ),
        format!(
            "Oldest pending payment {} has been waiting {}h",
            oldest.payment_id, oldest.age_hours
        ),
        json!({
            "count": report.payments.len(),
            "oldest_payment_id": oldest.payment_id,
            "oldest_age_hours": oldest.age_hours,
            "payment_ids": report.payments.iter().map(|p| p.payment_id.as_str()).collect::<Vec<_>>(),
        }),
        None,
    ))
}

pub fn reconciliation_alert(result: &ReconciliationResult) -> Option<Alert> {
    let critical = result.critical_issues();
    if critical == 0 {
        return None;
    }

    Some(Alert::new(
        RECONCILIATION_ISSUES,
        AlertSeverity::Warning,
        format!("Reconciliation found {critical} issues"),
        format!(
            "missing in system: {}, extra in system: {}, status mismatches: {}, fixed: {}",
            result.missing_in_system.len(),
            result.extra_in_system.len(),
            result.status_mismatches.len(),
            result.fixed
        ),
        json!({
            "missing_in_system": result.missing_in_system,
            "extra_in_system": result.extra_in_system,
            "status_mismatches": result.status_mismatches.len(),
            "fixed": result.fixed,
            "errors": result.errors.len(),
        }),
        Some(result.run_id),
    ))
}

/// Persists `alert` if there is one. A failed write is logged, not raised: the
/// run it belongs to has already been recorded.
pub async fn raise(store: &dyn LedgerStore, alert: Option<Alert>) -> Option<Alert> {
    let alert = alert?;
    match store.insert_alert(&alert).await {
        Ok(()) => {
            tracing::warn!(alert_type = %alert.alert_type, title = %alert.title, "alert raised");
            Some(alert)
        }
        Err(e) => {
            tracing::error!(alert_type = %alert.alert_type, error = %e, "failed to store alert");
            None
        }
    }
}
