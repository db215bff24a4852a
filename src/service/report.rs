use crate::service::reconciliation::{ReconciliationResult, ReconciliationSource};
use std::fmt::Write;

/// Operator-facing plain text summary of a reconciliation run.
pub fn render_report(result: &ReconciliationResult) -> String {
    let mut out = String::new();
    let source = match result.source {
        ReconciliationSource::GatewayFetch => "gateway transaction history",
        ReconciliationSource::Import => "imported export",
    };

    let _ = writeln!(out, "Reconciliation report {}", result.run_id);
    let _ = writeln!(
        out,
        "Window: {} .. {} ({source})",
        result.window.from.format("%Y-%m-%d %H:%M UTC"),
        result.window.to.format("%Y-%m-%d %H:%M UTC"),
    );
    let _ = writeln!(out, "Auto-fix: {}", if result.auto_fix { "on" } else { "off" });
    let _ = writeln!(out);
    let _ = writeln!(out, "Transactions in report: {}", result.total_in_report);
    let _ = writeln!(out, "Matched in system:      {}", result.matched_in_system);
    let _ = writeln!(out, "Missing in system:      {}", result.missing_in_system.len());
    let _ = writeln!(out, "Extra in system:        {}", result.extra_in_system.len());
    let _ = writeln!(out, "Status mismatches:      {}", result.status_mismatches.len());
    let _ = writeln!(out, "Fixed:                  {}", result.fixed);
    let _ = writeln!(out, "Errors:                 {}", result.errors.len());

    if result.critical_issues() == 0 && result.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Ledger and gateway agree.");
        return out;
    }

    if !result.missing_in_system.is_empty() {
        let _ = writeln!(out, "\nPaid at the gateway, no local payment:");
        for id in &result.missing_in_system {
            let _ = writeln!(out, "  - {id}");
        }
    }

    if !result.extra_in_system.is_empty() {
        let action = if result.auto_fix { "reversed" } else { "review" };
        let _ = writeln!(out, "\nCompleted locally, no gateway transaction ({action}):");
        for id in &result.extra_in_system {
            let _ = writeln!(out, "  - {id}");
        }
    }

    if !result.status_mismatches.is_empty() {
        let _ = writeln!(out, "\nStatus mismatches:");
        for m in &result.status_mismatches {
            let _ = writeln!(
                out,
                "  - {} ({}): local {} vs gateway {}{}",
                m.payment_id,
                m.transaction_uid,
                m.previous_status,
                m.expected_status,
                if m.fixed { " [fixed]" } else { "" }
            );
        }
    }

    if !result.entitlements_restored.is_empty() {
        let _ = writeln!(out, "\nEntitlements restored:");
        for id in &result.entitlements_restored {
            let _ = writeln!(out, "  - {id}");
        }
    }

    if !result.multi_transaction_payments.is_empty() {
        let _ = writeln!(out, "\nPayments with several transactions (latest used):");
        for id in &result.multi_transaction_payments {
            let _ = writeln!(out, "  - {id}");
        }
    }

    if !result.errors.is_empty() {
        let _ = writeln!(out, "\nErrors:");
        for e in &result.errors {
            let subject = e
                .payment_id
                .as_deref()
                .or(e.transaction_uid.as_deref())
                .unwrap_or("-");
            let _ = writeln!(out, "  - {subject}: {}", e.message);
        }
    }

    out
}
