use crate::domain::alert::{Alert, AlertStatus};
use crate::domain::entitlement::{Entitlement, PassType};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::run_log::RunLog;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Result of [`LedgerStore::insert_entitlement_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantWrite {
    Created,
    AlreadyGranted,
    /// The payment is gone or no longer completed; nothing was written.
    PaymentNotCompleted,
}

/// Result of [`LedgerStore::transition_payment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionWrite {
    /// The payment was no longer in the expected status; nothing was written.
    Stale,
    Applied { granted: bool, revoked: u64 },
}

/// Transactional store the sync and reconciliation services work against.
///
/// `transition_payment` is a compare-and-set on the current status that moves
/// the entitlement in the same transaction, and `insert_entitlement_if_absent`
/// only writes for a payment that is completed at that moment. Concurrent runs
/// rely on both to avoid double updates and double grants.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Pending payments created at or after `since`, newest first.
    async fn pending_payments_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>>;

    /// Pending payments created before `cutoff`, oldest first.
    async fn pending_payments_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>>;

    async fn payments_created_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Payment>>;

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>>;

    /// Moves the payment from `from` to `to`. Moving into completed inserts
    /// `grant` unless an entitlement exists; any other target deletes the
    /// payment's entitlements.
    async fn transition_payment(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
        grant: Option<&Entitlement>,
    ) -> Result<TransitionWrite>;

    async fn pass_type(&self, pass_type_id: &str) -> Result<Option<PassType>>;

    async fn insert_entitlement_if_absent(&self, entitlement: &Entitlement) -> Result<GrantWrite>;

    async fn entitlements_for_payment(&self, payment_id: &str) -> Result<Vec<Entitlement>>;

    async fn open_run_log(&self, run: &RunLog) -> Result<()>;

    async fn finalize_run_log(&self, run: &RunLog) -> Result<()>;

    async fn recent_run_logs(&self, limit: i64) -> Result<Vec<RunLog>>;

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;

    async fn alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>>;
}
