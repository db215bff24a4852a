use crate::domain::payment::PaymentStatus;
use crate::domain::transaction::{ExternalTransaction, TransactionType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod error;
pub mod mock;

pub use error::{GatewayCallError, GatewayError, TransportError, TransportErrorKind};

/// Status code the gateway uses for an approved transaction.
pub const APPROVED_STATUS_CODE: &str = "000";

/// Codes for a transaction still in flight: "001" awaits cardholder
/// authentication, "002" is authorized but not yet captured.
pub const PENDING_STATUS_CODES: &[&str] = &["001", "002"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: i32,
    pub price_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentLinkRequest {
    pub payment_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub success_url: String,
    pub failure_url: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub page_uid: String,
    pub payment_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_uid: String,
    pub status_code: String,
    pub description: String,
    pub transaction_type: Option<TransactionType>,
    pub amount_minor: Option<i64>,
}

impl TransactionStatus {
    pub fn is_success(&self) -> bool {
        self.status_code == APPROVED_STATUS_CODE
    }

    pub fn is_in_progress(&self) -> bool {
        PENDING_STATUS_CODES.contains(&self.status_code.as_str())
    }

    /// Ledger status this gateway answer implies. Any code that is neither
    /// approved nor in progress is a decline.
    pub fn derived_status(&self) -> PaymentStatus {
        if self.is_in_progress() {
            return PaymentStatus::Pending;
        }
        match (self.is_success(), self.transaction_type) {
            (true, Some(TransactionType::Refund)) => PaymentStatus::Refunded,
            (true, _) => PaymentStatus::Completed,
            (false, _) => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn create_payment_link(
        &self,
        request: &CreatePaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayCallError>;

    async fn check_transaction_status(
        &self,
        transaction_uid: &str,
    ) -> Result<TransactionStatus, GatewayCallError>;

    async fn refund(
        &self,
        transaction_uid: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<OperationStatus, GatewayCallError>;

    async fn cancel(&self, transaction_uid: &str) -> Result<OperationStatus, GatewayCallError>;

    async fn fetch_transactions(
        &self,
        range: &DateRange,
    ) -> Result<Vec<ExternalTransaction>, GatewayCallError>;
}
