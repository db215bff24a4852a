use crate::domain::payment::{Payment, PaymentStatus, TransitionOrigin};
use crate::domain::run_log::{RunCounts, RunKind, RunLog, RunStatus};
use crate::domain::transaction::{ExternalTransaction, TransactionType};
use crate::error::DataIntegrityError;
use crate::gateways::{DateRange, PaymentGateway};
use crate::repo::ledger_store::LedgerStore;
use crate::service::alerting;
use crate::service::entitlements::{self, GrantOutcome};
use crate::service::export_import::parse_transaction_export;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationSource {
    GatewayFetch,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconciliationWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl ReconciliationWindow {
    pub fn last_days(days_back: i64, now: DateTime<Utc>) -> Self {
        Self {
            from: now - Duration::days(days_back.max(0)),
            to: now,
        }
    }

    /// Smallest window holding every transaction in `transactions`.
    pub fn covering(transactions: &[ExternalTransaction]) -> Option<Self> {
        let from = transactions.iter().map(|t| t.created_at).min()?;
        let to = transactions.iter().map(|t| t.last_activity()).max()?;
        Some(Self { from, to })
    }

    pub fn date_range(&self) -> DateRange {
        DateRange {
            from: self.from.date_naive(),
            to: self.to.date_naive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMismatch {
    pub payment_id: String,
    pub transaction_uid: String,
    pub transaction_type: TransactionType,
    pub previous_status: PaymentStatus,
    pub expected_status: PaymentStatus,
    pub fixed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub payment_id: Option<String>,
    pub transaction_uid: Option<String>,
    pub message: String,
}

impl RowError {
    pub fn new(payment_id: Option<&str>, transaction_uid: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            payment_id: payment_id.map(str::to_string),
            transaction_uid: transaction_uid.map(str::to_string),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    pub source: ReconciliationSource,
    pub window: ReconciliationWindow,
    pub auto_fix: bool,
    pub total_in_report: usize,
    pub matched_in_system: usize,
    pub missing_in_system: Vec<String>,
    pub extra_in_system: Vec<String>,
    pub status_mismatches: Vec<StatusMismatch>,
    pub entitlements_restored: Vec<String>,
    pub multi_transaction_payments: Vec<String>,
    pub fixed: usize,
    pub errors: Vec<RowError>,
    pub duration_ms: i64,
    pub alert_id: Option<Uuid>,
}

impl ReconciliationResult {
    pub fn critical_issues(&self) -> usize {
        self.missing_in_system.len() + self.extra_in_system.len() + self.status_mismatches.len()
    }
}

#[derive(Debug, Clone)]
pub struct DivergentPayment {
    pub payment: Payment,
    pub transaction_uid: String,
    pub transaction_type: TransactionType,
    pub expected_status: PaymentStatus,
}

/// Outcome of diffing a transaction set against the ledger, before any repair.
#[derive(Debug, Clone, Default)]
pub struct Comparison {
    pub total_in_report: usize,
    pub matched_in_system: usize,
    pub missing_in_system: Vec<String>,
    pub mismatches: Vec<DivergentPayment>,
    /// Matched, completed on both sides.
    pub settled: Vec<Payment>,
    /// Completed locally, with no transaction referencing them.
    pub extra: Vec<Payment>,
    pub multi_transaction_payments: Vec<String>,
    pub errors: Vec<RowError>,
}

/// Two-way diff. `known` holds every local payment a transaction refers to
/// (as far as it exists); `window_payments` are the local payments created in
/// the reporting window.
pub fn compare(
    transactions: &[ExternalTransaction],
    known: &HashMap<String, Payment>,
    window_payments: &[Payment],
) -> Comparison {
    let mut out = Comparison {
        total_in_report: transactions.len(),
        ..Default::default()
    };

    let mut by_payment: BTreeMap<&str, Vec<&ExternalTransaction>> = BTreeMap::new();
    for tx in transactions {
        match tx.payment_id() {
            Some(pid) => by_payment.entry(pid).or_default().push(tx),
            None => {
                let err = DataIntegrityError::MissingBackReference {
                    transaction_uid: tx.transaction_uid.clone(),
                };
                out.errors
                    .push(RowError::new(None, Some(tx.transaction_uid.as_str()), err.to_string()));
            }
        }
    }

    for (pid, txs) in &by_payment {
        if txs.len() > 1 {
            out.multi_transaction_payments.push(pid.to_string());
        }
        // Latest activity wins; on ties the later row in the report.
        let Some(authoritative) = txs
            .iter()
            .enumerate()
            .max_by_key(|(i, t)| (t.last_activity(), *i))
            .map(|(_, t)| *t)
        else {
            continue;
        };

        let Some(payment) = known.get(*pid) else {
            out.missing_in_system.push(pid.to_string());
            let err = DataIntegrityError::MissingPayment {
                payment_id: pid.to_string(),
            };
            out.errors.push(RowError::new(
                Some(*pid),
                Some(authoritative.transaction_uid.as_str()),
                err.to_string(),
            ));
            continue;
        };

        out.matched_in_system += txs.len();
        let expected = authoritative.transaction_type.expected_status();
        if expected != payment.status {
            out.mismatches.push(DivergentPayment {
                payment: payment.clone(),
                transaction_uid: authoritative.transaction_uid.clone(),
                transaction_type: authoritative.transaction_type,
                expected_status: expected,
            });
        } else if payment.status == PaymentStatus::Completed {
            out.settled.push(payment.clone());
        }
    }

    out.extra = window_payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed && !by_payment.contains_key(p.id.as_str()))
        .cloned()
        .collect();

    out
}

/// Bulk diff between the gateway's transaction log and the ledger, with
/// optional repair.
#[derive(Clone)]
pub struct ReconciliationService {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl ReconciliationService {
    pub async fn reconcile_recent(&self, days_back: i64, auto_fix: bool) -> Result<ReconciliationResult> {
        let window = ReconciliationWindow::last_days(days_back, Utc::now());
        let run = self.open_run(ReconciliationSource::GatewayFetch, window, auto_fix).await?;

        let transactions = match self.gateway.fetch_transactions(&window.date_range()).await {
            Ok(t) => t,
            Err(e) => return Err(self.abort(run, anyhow::Error::new(e).context("fetching gateway transactions")).await),
        };

        self.execute(run, ReconciliationSource::GatewayFetch, window, transactions, Vec::new(), auto_fix)
            .await
    }

    /// Same comparison, fed from an exported transaction file. The window
    /// defaults to the span of the exported transactions.
    pub async fn reconcile_import(
        &self,
        export: &str,
        window: Option<ReconciliationWindow>,
        auto_fix: bool,
    ) -> Result<ReconciliationResult> {
        let parsed = parse_transaction_export(export);
        let provisional = window.unwrap_or_else(|| {
            let now = Utc::now();
            ReconciliationWindow { from: now, to: now }
        });
        let run = self.open_run(ReconciliationSource::Import, provisional, auto_fix).await?;

        let parsed = match parsed {
            Ok(p) => p,
            Err(e) => return Err(self.abort(run, anyhow::Error::new(e).context("parsing transaction export")).await),
        };
        let window = window
            .or_else(|| ReconciliationWindow::covering(&parsed.transactions))
            .unwrap_or(provisional);

        self.execute(
            run,
            ReconciliationSource::Import,
            window,
            parsed.transactions,
            parsed.row_errors,
            auto_fix,
        )
        .await
    }

    async fn open_run(
        &self,
        source: ReconciliationSource,
        window: ReconciliationWindow,
        auto_fix: bool,
    ) -> Result<RunLog> {
        let run = RunLog::start(
            RunKind::Reconciliation,
            json!({ "source": source, "window": window, "auto_fix": auto_fix }),
        );
        self.store.open_run_log(&run).await?;
        tracing::info!(run_id = %run.id, ?source, from = %window.from, to = %window.to, auto_fix, "reconciliation started");
        Ok(run)
    }

    async fn abort(&self, run: RunLog, error: anyhow::Error) -> anyhow::Error {
        let failed = run.fail(RunCounts::default(), &format!("{error:#}"));
        if let Err(fe) = self.store.finalize_run_log(&failed).await {
            tracing::error!(run_id = %failed.id, error = %fe, "failed to finalize run log");
        }
        tracing::error!(run_id = %failed.id, error = %format!("{error:#}"), "reconciliation aborted");
        error
    }

    async fn load_known_payments(
        &self,
        transactions: &[ExternalTransaction],
        window_payments: &[Payment],
    ) -> Result<HashMap<String, Payment>> {
        let mut known: HashMap<String, Payment> = window_payments
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();

        let outside: HashSet<&str> = transactions
            .iter()
            .filter_map(|t| t.payment_id())
            .filter(|pid| !known.contains_key(*pid))
            .collect();
        for pid in outside {
            if let Some(p) = self.store.get_payment(pid).await? {
                known.insert(p.id.clone(), p);
            }
        }
        Ok(known)
    }

    async fn execute(
        &self,
        run: RunLog,
        source: ReconciliationSource,
        window: ReconciliationWindow,
        transactions: Vec<ExternalTransaction>,
        preliminary_errors: Vec<RowError>,
        auto_fix: bool,
    ) -> Result<ReconciliationResult> {
        let window_payments = match self.store.payments_created_between(window.from, window.to).await {
            Ok(p) => p,
            Err(e) => return Err(self.abort(run, e.context("loading local payments")).await),
        };
        let known = match self.load_known_payments(&transactions, &window_payments).await {
            Ok(k) => k,
            Err(e) => return Err(self.abort(run, e.context("looking up referenced payments")).await),
        };

        let comparison = compare(&transactions, &known, &window_payments);

        // Rows rejected while parsing an export still count as reported.
        let rejected_rows = preliminary_errors.len();
        let mut errors = preliminary_errors;
        errors.extend(comparison.errors.iter().cloned());
        let mut result = ReconciliationResult {
            run_id: run.id,
            source,
            window,
            auto_fix,
            total_in_report: comparison.total_in_report + rejected_rows,
            matched_in_system: comparison.matched_in_system,
            missing_in_system: comparison.missing_in_system.clone(),
            extra_in_system: comparison.extra.iter().map(|p| p.id.clone()).collect(),
            status_mismatches: comparison
                .mismatches
                .iter()
                .map(|m| StatusMismatch {
                    payment_id: m.payment.id.clone(),
                    transaction_uid: m.transaction_uid.clone(),
                    transaction_type: m.transaction_type,
                    previous_status: m.payment.status,
                    expected_status: m.expected_status,
                    fixed: false,
                })
                .collect(),
            entitlements_restored: Vec::new(),
            multi_transaction_payments: comparison.multi_transaction_payments.clone(),
            fixed: 0,
            errors,
            duration_ms: 0,
            alert_id: None,
        };

        if auto_fix {
            self.repair(&comparison, &mut result).await;
        }

        let counts = RunCounts {
            checked: result.total_in_report as i32,
            updated: result.fixed as i32,
            failed: result.errors.len() as i32,
            skipped: result
                .matched_in_system
                .saturating_sub(result.status_mismatches.len()) as i32,
        };
        let status = RunStatus::from_failures(counts.failed);
        let mut run = run.finish(status, counts, serde_json::Value::Null);
        result.duration_ms = run.duration_ms;
        run.details = serde_json::to_value(&result)?;
        self.store.finalize_run_log(&run).await?;

        let alert = alerting::reconciliation_alert(&result);
        result.alert_id = alerting::raise(self.store.as_ref(), alert).await.map(|a| a.id);

        tracing::info!(
            run_id = %result.run_id,
            total = result.total_in_report,
            matched = result.matched_in_system,
            missing = result.missing_in_system.len(),
            extra = result.extra_in_system.len(),
            mismatches = result.status_mismatches.len(),
            fixed = result.fixed,
            errors = result.errors.len(),
            "reconciliation finished"
        );
        Ok(result)
    }

    async fn repair(&self, comparison: &Comparison, result: &mut ReconciliationResult) {
        let store = self.store.as_ref();

        for (divergent, reported) in comparison
            .mismatches
            .iter()
            .zip(result.status_mismatches.iter_mut())
        {
            let payment = &divergent.payment;
            match entitlements::apply_status_change(
                store,
                payment,
                divergent.expected_status,
                TransitionOrigin::GatewayStatus,
            )
            .await
            {
                Ok(change) if change.applied => {
                    reported.fixed = true;
                    result.fixed += 1;
                }
                Ok(_) => result.errors.push(RowError::new(
                    Some(payment.id.as_str()),
                    Some(divergent.transaction_uid.as_str()),
                    "payment changed during reconciliation, not fixed",
                )),
                Err(e) => result.errors.push(RowError::new(
                    Some(payment.id.as_str()),
                    Some(divergent.transaction_uid.as_str()),
                    e.to_string(),
                )),
            }
        }

        for payment in &comparison.settled {
            match entitlements::grant_for_payment(store, payment, Utc::now()).await {
                Ok(GrantOutcome::Created(_)) => {
                    result.entitlements_restored.push(payment.id.clone());
                    result.fixed += 1;
                }
                Ok(GrantOutcome::PaymentNotCompleted) => result.errors.push(RowError::new(
                    Some(payment.id.as_str()),
                    None,
                    "payment changed during reconciliation, entitlement not restored",
                )),
                Ok(_) => {}
                Err(e) => result
                    .errors
                    .push(RowError::new(Some(payment.id.as_str()), None, e.to_string())),
            }
        }

        for payment in &comparison.extra {
            match entitlements::apply_status_change(
                store,
                payment,
                PaymentStatus::Failed,
                TransitionOrigin::PhantomReversal,
            )
            .await
            {
                Ok(change) if change.applied => {
                    tracing::warn!(payment_id = %payment.id, revoked = change.revoked, "phantom completed payment reversed");
                    result.fixed += 1;
                }
                Ok(_) => result.errors.push(RowError::new(
                    Some(payment.id.as_str()),
                    None,
                    "payment changed during reconciliation, not reversed",
                )),
                Err(e) => result
                    .errors
                    .push(RowError::new(Some(payment.id.as_str()), None, e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentMetadata;

    fn payment(id: &str, status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            id: id.to_string(),
            owner_id: "acct_1".to_string(),
            amount_minor: 5000,
            currency: "ILS".to_string(),
            status,
            payment_type: "event_ticket".to_string(),
            metadata: PaymentMetadata::default(),
            created_at: now - Duration::hours(1),
            completed_at: Payment::completed_at_for(status, now),
        }
    }

    fn tx(uid: &str, ty: TransactionType, reference: Option<&str>, minutes_ago: i64) -> ExternalTransaction {
        ExternalTransaction {
            transaction_uid: uid.to_string(),
            transaction_type: ty,
            amount_minor: 5000,
            currency: "ILS".to_string(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            updated_at: None,
            payment_reference: reference.map(str::to_string),
        }
    }

    fn index(payments: &[Payment]) -> HashMap<String, Payment> {
        payments.iter().map(|p| (p.id.clone(), p.clone())).collect()
    }

    #[test]
    fn later_refund_decides_expected_status() {
        let local = vec![payment("pay_1", PaymentStatus::Completed)];
        let txs = vec![
            tx("tx_a", TransactionType::Charge, Some("pay_1"), 30),
            tx("tx_b", TransactionType::Refund, Some("pay_1"), 5),
        ];
        let c = compare(&txs, &index(&local), &local);
        assert_eq!(c.multi_transaction_payments, vec!["pay_1".to_string()]);
        assert_eq!(c.matched_in_system, 2);
        assert_eq!(c.mismatches.len(), 1);
        assert_eq!(c.mismatches[0].expected_status, PaymentStatus::Refunded);
        assert_eq!(c.mismatches[0].transaction_uid, "tx_b");
    }

    #[test]
    fn transaction_without_reference_is_an_error_not_a_drop() {
        let c = compare(&[tx("tx_x", TransactionType::Charge, None, 1)], &HashMap::new(), &[]);
        assert_eq!(c.total_in_report, 1);
        assert_eq!(c.matched_in_system, 0);
        assert!(c.missing_in_system.is_empty());
        assert_eq!(c.errors.len(), 1);
        assert_eq!(c.errors[0].transaction_uid.as_deref(), Some("tx_x"));
    }

    #[test]
    fn pending_payment_without_transaction_is_not_extra() {
        let local = vec![
            payment("pay_p", PaymentStatus::Pending),
            payment("pay_c", PaymentStatus::Completed),
        ];
        let c = compare(&[], &index(&local), &local);
        let extra: Vec<&str> = c.extra.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(extra, vec!["pay_c"]);
    }
}
