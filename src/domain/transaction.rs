use crate::domain::payment::PaymentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the field on gateway transactions that carries the local payment id.
pub const BACK_REFERENCE_FIELD: &str = "payment_reference";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Charge,
    Refund,
    Other,
}

impl TransactionType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "charge" | "sale" | "capture" => TransactionType::Charge,
            "refund" | "credit" => TransactionType::Refund,
            _ => TransactionType::Other,
        }
    }

    pub fn expected_status(&self) -> PaymentStatus {
        match self {
            TransactionType::Charge => PaymentStatus::Completed,
            TransactionType::Refund => PaymentStatus::Refunded,
            TransactionType::Other => PaymentStatus::Failed,
        }
    }
}

/// A transaction as the gateway reports it. Fetched or imported, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    pub transaction_uid: String,
    pub transaction_type: TransactionType,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
}

impl ExternalTransaction {
    pub fn payment_id(&self) -> Option<&str> {
        self.payment_reference
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at).max(self.created_at)
    }
}
