use crate::domain::transaction::{ExternalTransaction, TransactionType};
use crate::gateways::error::{GatewayCallError, GatewayError};
use crate::gateways::{
    CreatePaymentLinkRequest, DateRange, OperationStatus, PaymentGateway, PaymentLink, TransactionStatus,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Scripted in-memory gateway for local runs and tests.
pub struct MockGateway {
    pub gateway_name: String,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    statuses: HashMap<String, Result<TransactionStatus, GatewayCallError>>,
    transactions: Vec<ExternalTransaction>,
    fetch_failure: Option<GatewayCallError>,
    calls: Vec<String>,
}

impl MockGateway {
    pub fn new(gateway_name: &str) -> Self {
        Self {
            gateway_name: gateway_name.to_string(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_status(&self, transaction_uid: &str, status_code: &str, transaction_type: TransactionType) {
        let status = TransactionStatus {
            transaction_uid: transaction_uid.to_string(),
            status_code: status_code.to_string(),
            description: format!("mock status {status_code}"),
            transaction_type: Some(transaction_type),
            amount_minor: None,
        };
        self.state().statuses.insert(transaction_uid.to_string(), Ok(status));
    }

    pub fn set_status_error(&self, transaction_uid: &str, error: GatewayCallError) {
        self.state().statuses.insert(transaction_uid.to_string(), Err(error));
    }

    pub fn add_transaction(&self, transaction: ExternalTransaction) {
        self.state().transactions.push(transaction);
    }

    pub fn fail_fetch(&self, error: GatewayCallError) {
        self.state().fetch_failure = Some(error);
    }

    /// Operations invoked so far, as `"<operation>:<subject>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn note(&self, call: String) {
        self.state().calls.push(call);
    }
}

fn ok_status(description: &str) -> OperationStatus {
    OperationStatus {
        status: "success".to_string(),
        description: description.to_string(),
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        &self.gateway_name
    }

    async fn create_payment_link(
        &self,
        request: &CreatePaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayCallError> {
        self.note(format!("create_payment_link:{}", request.payment_id));
        let page_uid = format!("mock_page_{}", uuid::Uuid::new_v4());
        Ok(PaymentLink {
            payment_link: format!("https://pay.invalid/{page_uid}"),
            page_uid,
        })
    }

    async fn check_transaction_status(
        &self,
        transaction_uid: &str,
    ) -> Result<TransactionStatus, GatewayCallError> {
        self.note(format!("check_status:{transaction_uid}"));
        self.state()
            .statuses
            .get(transaction_uid)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError {
                    code: "NOT_FOUND".to_string(),
                    description: format!("unknown transaction {transaction_uid}"),
                }
                .into())
            })
    }

    async fn refund(
        &self,
        transaction_uid: &str,
        amount_minor: i64,
        _reason: &str,
    ) -> Result<OperationStatus, GatewayCallError> {
        self.note(format!("refund:{transaction_uid}:{amount_minor}"));
        Ok(ok_status("mock refund accepted"))
    }

    async fn cancel(&self, transaction_uid: &str) -> Result<OperationStatus, GatewayCallError> {
        self.note(format!("cancel:{transaction_uid}"));
        Ok(ok_status("mock cancel accepted"))
    }

    async fn fetch_transactions(
        &self,
        range: &DateRange,
    ) -> Result<Vec<ExternalTransaction>, GatewayCallError> {
        self.note(format!("fetch_transactions:{}:{}", range.from, range.to));
        let state = self.state();
        if let Some(err) = &state.fetch_failure {
            return Err(err.clone());
        }
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                let day = t.created_at.date_naive();
                day >= range.from && day <= range.to
            })
            .cloned()
            .collect())
    }
}
