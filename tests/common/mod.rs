#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use payments_reconciler::domain::entitlement::PassType;
use payments_reconciler::domain::payment::{Payment, PaymentMetadata, PaymentStatus};
use payments_reconciler::domain::transaction::{ExternalTransaction, TransactionType};
use payments_reconciler::gateways::mock::MockGateway;
use payments_reconciler::repo::memory_store::MemoryLedgerStore;
use payments_reconciler::service::alerting::AlertPolicy;
use payments_reconciler::service::reconciliation::ReconciliationService;
use payments_reconciler::service::sync_service::SyncService;
use std::sync::Arc;

pub fn pending_payment(id: &str, uid: Option<&str>, hours_ago: i64) -> Payment {
    Payment {
        id: id.to_string(),
        owner_id: "acct_1".to_string(),
        amount_minor: 8000,
        currency: "ILS".to_string(),
        status: PaymentStatus::Pending,
        payment_type: "entry_pass".to_string(),
        metadata: PaymentMetadata {
            gateway_transaction_uid: uid.map(str::to_string),
            ..Default::default()
        },
        created_at: Utc::now() - Duration::hours(hours_ago),
        completed_at: None,
    }
}

pub fn with_status(mut payment: Payment, status: PaymentStatus) -> Payment {
    payment.status = status;
    payment.completed_at = Payment::completed_at_for(status, payment.created_at + Duration::minutes(5));
    payment
}

pub fn for_pass(mut payment: Payment, pass_type_id: &str) -> Payment {
    payment.metadata.pass_type_id = Some(pass_type_id.to_string());
    payment
}

pub fn for_event(mut payment: Payment, event_id: &str, quantity: i32) -> Payment {
    payment.metadata.event_id = Some(event_id.to_string());
    payment.metadata.quantity = Some(quantity);
    payment.payment_type = "event_ticket".to_string();
    payment
}

pub fn pass_type(id: &str, total_entries: i32) -> PassType {
    PassType {
        id: id.to_string(),
        name: format!("{total_entries}-entry card"),
        total_entries,
        validity_days: Some(180),
    }
}

pub fn transaction(
    uid: &str,
    transaction_type: TransactionType,
    reference: Option<&str>,
    at: DateTime<Utc>,
) -> ExternalTransaction {
    ExternalTransaction {
        transaction_uid: uid.to_string(),
        transaction_type,
        amount_minor: 8000,
        currency: "ILS".to_string(),
        created_at: at,
        updated_at: None,
        payment_reference: reference.map(str::to_string),
    }
}

pub struct Harness {
    pub store: MemoryLedgerStore,
    pub gateway: Arc<MockGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryLedgerStore::new(),
            gateway: Arc::new(MockGateway::new("mock")),
        }
    }

    pub fn sync(&self) -> SyncService {
        SyncService {
            store: Arc::new(self.store.clone()),
            gateway: self.gateway.clone(),
            alert_policy: AlertPolicy::default(),
        }
    }

    pub fn reconciliation(&self) -> ReconciliationService {
        ReconciliationService {
            store: Arc::new(self.store.clone()),
            gateway: self.gateway.clone(),
        }
    }
}
