use crate::domain::entitlement::{Entitlement, EntitlementKind, Pass, Registration, RegistrationStatus};
use crate::domain::payment::{Payment, PaymentStatus, TransitionOrigin, ENTITLEMENT_KEYS};
use crate::error::DataIntegrityError;
use crate::repo::ledger_store::{GrantWrite, LedgerStore, TransitionWrite};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

const DEFAULT_TICKET_TYPE: &str = "regular";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    Created(EntitlementKind),
    AlreadyGranted,
    NotApplicable,
    /// The payment stopped being completed before the grant was written.
    PaymentNotCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// False when another writer moved the payment first.
    pub applied: bool,
    pub grant: GrantOutcome,
    pub revoked: u64,
}

/// The entitlement a completed `payment` should carry, if its metadata names one.
pub async fn entitlement_for(
    store: &dyn LedgerStore,
    payment: &Payment,
    now: DateTime<Utc>,
) -> Result<Option<Entitlement>> {
    let meta = &payment.metadata;
    if let Some(keys) = meta.malformed_among(ENTITLEMENT_KEYS) {
        return Err(DataIntegrityError::MalformedMetadata {
            payment_id: payment.id.clone(),
            keys,
        }
        .into());
    }

    if let Some(event_id) = meta.event_id.as_deref().filter(|s| !s.is_empty()) {
        return Ok(Some(Entitlement::Registration(Registration {
            id: Uuid::new_v4(),
            payment_id: payment.id.clone(),
            owner_id: payment.owner_id.clone(),
            event_id: event_id.to_string(),
            ticket_type: meta
                .ticket_type
                .clone()
                .unwrap_or_else(|| DEFAULT_TICKET_TYPE.to_string()),
            quantity: meta.quantity.unwrap_or(1).max(1),
            status: RegistrationStatus::Confirmed,
            created_at: now,
        })));
    }

    if let Some(pass_type_id) = meta.pass_type_id.as_deref().filter(|s| !s.is_empty()) {
        let pass_type = store.pass_type(pass_type_id).await?.ok_or_else(|| {
            DataIntegrityError::UnknownPassType {
                payment_id: payment.id.clone(),
                pass_type_id: pass_type_id.to_string(),
            }
        })?;
        return Ok(Some(Entitlement::Pass(Pass {
            id: Uuid::new_v4(),
            payment_id: payment.id.clone(),
            owner_id: payment.owner_id.clone(),
            pass_type_id: pass_type.id.clone(),
            total_entries: pass_type.total_entries,
            remaining_entries: pass_type.total_entries,
            expires_at: pass_type
                .validity_days
                .map(|days| now + Duration::days(i64::from(days))),
            created_at: now,
        })));
    }

    Ok(None)
}

/// Creates the payment's entitlement unless one already exists. Writes
/// nothing once the payment is no longer completed in the store.
pub async fn grant_for_payment(
    store: &dyn LedgerStore,
    payment: &Payment,
    now: DateTime<Utc>,
) -> Result<GrantOutcome> {
    let Some(entitlement) = entitlement_for(store, payment, now).await? else {
        return Ok(GrantOutcome::NotApplicable);
    };

    let kind = entitlement.kind();
    match store.insert_entitlement_if_absent(&entitlement).await? {
        GrantWrite::Created => {
            tracing::info!(payment_id = %payment.id, ?kind, "entitlement granted");
            Ok(GrantOutcome::Created(kind))
        }
        GrantWrite::AlreadyGranted => Ok(GrantOutcome::AlreadyGranted),
        GrantWrite::PaymentNotCompleted => {
            tracing::info!(payment_id = %payment.id, "payment no longer completed, grant skipped");
            Ok(GrantOutcome::PaymentNotCompleted)
        }
    }
}

/// Moves `payment` to `to` and brings its entitlement in line: granted when it
/// becomes completed, removed when it stops being completed. Status and
/// entitlement are written together; an entitlement that cannot be built
/// leaves the payment untouched.
pub async fn apply_status_change(
    store: &dyn LedgerStore,
    payment: &Payment,
    to: PaymentStatus,
    origin: TransitionOrigin,
) -> Result<StatusChange> {
    if !payment.status.can_transition(to, origin) {
        return Err(DataIntegrityError::ForbiddenTransition {
            payment_id: payment.id.clone(),
            from: payment.status,
            to,
        }
        .into());
    }

    let now = Utc::now();
    let completed_at = Payment::completed_at_for(to, now);
    let entitlement = if to == PaymentStatus::Completed {
        let mut completed = payment.clone();
        completed.status = to;
        completed.completed_at = completed_at;
        entitlement_for(store, &completed, now).await?
    } else {
        None
    };

    let write = store
        .transition_payment(&payment.id, payment.status, to, completed_at, entitlement.as_ref())
        .await?;
    let TransitionWrite::Applied { granted, revoked } = write else {
        tracing::info!(payment_id = %payment.id, "payment changed concurrently, update skipped");
        return Ok(StatusChange {
            applied: false,
            grant: GrantOutcome::NotApplicable,
            revoked: 0,
        });
    };
    tracing::info!(payment_id = %payment.id, from = %payment.status, to = %to, "payment status updated");
    if revoked > 0 {
        tracing::info!(payment_id = %payment.id, revoked, "entitlement revoked");
    }

    let grant = match entitlement {
        Some(e) if granted => {
            tracing::info!(payment_id = %payment.id, kind = ?e.kind(), "entitlement granted");
            GrantOutcome::Created(e.kind())
        }
        Some(_) => GrantOutcome::AlreadyGranted,
        None => GrantOutcome::NotApplicable,
    };

    Ok(StatusChange {
        applied: true,
        grant,
        revoked,
    })
}
