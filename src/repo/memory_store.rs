use crate::domain::alert::{Alert, AlertStatus};
use crate::domain::entitlement::{Entitlement, PassType};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::run_log::{RunLog, RunStatus};
use crate::repo::ledger_store::{GrantWrite, LedgerStore, TransitionWrite};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Ledger {
    payments: BTreeMap<String, Payment>,
    pass_types: HashMap<String, PassType>,
    entitlements: BTreeMap<String, Entitlement>,
    run_logs: Vec<RunLog>,
    alerts: Vec<Alert>,
    reads_unavailable: bool,
}

/// Process-local ledger with the same atomicity guarantees as the Postgres
/// store: one lock covers every read-modify-write.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<Ledger>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_payment(&self, payment: Payment) {
        self.inner.lock().await.payments.insert(payment.id.clone(), payment);
    }

    pub async fn insert_pass_type(&self, pass_type: PassType) {
        self.inner
            .lock()
            .await
            .pass_types
            .insert(pass_type.id.clone(), pass_type);
    }

    pub async fn entitlement_count(&self) -> usize {
        self.inner.lock().await.entitlements.len()
    }

    pub async fn run_logs(&self) -> Vec<RunLog> {
        self.inner.lock().await.run_logs.clone()
    }

    /// Makes payment listing queries fail, for exercising batch-level aborts.
    pub async fn set_reads_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.reads_unavailable = unavailable;
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn pending_payments_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>> {
        let ledger = self.inner.lock().await;
        if ledger.reads_unavailable {
            bail!("ledger store unavailable");
        }
        let mut out: Vec<Payment> = ledger
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn pending_payments_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>> {
        let ledger = self.inner.lock().await;
        if ledger.reads_unavailable {
            bail!("ledger store unavailable");
        }
        let mut out: Vec<Payment> = ledger
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn payments_created_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Payment>> {
        let ledger = self.inner.lock().await;
        if ledger.reads_unavailable {
            bail!("ledger store unavailable");
        }
        let mut out: Vec<Payment> = ledger
            .payments
            .values()
            .filter(|p| p.created_at >= from && p.created_at <= to)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        Ok(self.inner.lock().await.payments.get(payment_id).cloned())
    }

    async fn transition_payment(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
        grant: Option<&Entitlement>,
    ) -> Result<TransitionWrite> {
        let mut ledger = self.inner.lock().await;
        match ledger.payments.get_mut(payment_id) {
            Some(p) if p.status == from => {
                p.status = to;
                p.completed_at = completed_at;
            }
            _ => return Ok(TransitionWrite::Stale),
        }

        let mut granted = false;
        let mut revoked = 0;
        if to == PaymentStatus::Completed {
            if let Some(entitlement) = grant {
                if let Entry::Vacant(slot) = ledger.entitlements.entry(payment_id.to_string()) {
                    slot.insert(entitlement.clone());
                    granted = true;
                }
            }
        } else if ledger.entitlements.remove(payment_id).is_some() {
            revoked = 1;
        }
        Ok(TransitionWrite::Applied { granted, revoked })
    }

    async fn pass_type(&self, pass_type_id: &str) -> Result<Option<PassType>> {
        Ok(self.inner.lock().await.pass_types.get(pass_type_id).cloned())
    }

    async fn insert_entitlement_if_absent(&self, entitlement: &Entitlement) -> Result<GrantWrite> {
        let mut ledger = self.inner.lock().await;
        let payment_id = entitlement.payment_id();
        let completed = ledger
            .payments
            .get(payment_id)
            .is_some_and(|p| p.status == PaymentStatus::Completed);
        if !completed {
            return Ok(GrantWrite::PaymentNotCompleted);
        }
        match ledger.entitlements.entry(payment_id.to_string()) {
            Entry::Occupied(_) => Ok(GrantWrite::AlreadyGranted),
            Entry::Vacant(slot) => {
                slot.insert(entitlement.clone());
                Ok(GrantWrite::Created)
            }
        }
    }

    async fn entitlements_for_payment(&self, payment_id: &str) -> Result<Vec<Entitlement>> {
        Ok(self
            .inner
            .lock()
            .await
            .entitlements
            .get(payment_id)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn open_run_log(&self, run: &RunLog) -> Result<()> {
        self.inner.lock().await.run_logs.push(run.clone());
        Ok(())
    }

    async fn finalize_run_log(&self, run: &RunLog) -> Result<()> {
        let mut ledger = self.inner.lock().await;
        match ledger
            .run_logs
            .iter_mut()
            .find(|r| r.id == run.id && r.status == RunStatus::Running)
        {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => bail!("run log {} is missing or already finalized", run.id),
        }
    }

    async fn recent_run_logs(&self, limit: i64) -> Result<Vec<RunLog>> {
        let ledger = self.inner.lock().await;
        let mut out = ledger.run_logs.clone();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.inner.lock().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>> {
        let ledger = self.inner.lock().await;
        Ok(ledger
            .alerts
            .iter()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect())
    }
}
