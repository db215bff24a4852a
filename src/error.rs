use crate::domain::payment::PaymentStatus;

/// Row-level problems. Recorded against the offending payment or transaction;
/// the surrounding batch keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataIntegrityError {
    #[error("transaction {transaction_uid} has no payment back-reference")]
    MissingBackReference { transaction_uid: String },
    #[error("gateway transaction for payment {payment_id} has no local payment record")]
    MissingPayment { payment_id: String },
    #[error("payment {payment_id} references unknown pass type {pass_type_id}")]
    UnknownPassType { payment_id: String, pass_type_id: String },
    #[error("payment {payment_id} cannot move from {from} to {to} automatically")]
    ForbiddenTransition {
        payment_id: String,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("payment {payment_id} has unreadable metadata keys: {keys}")]
    MalformedMetadata { payment_id: String, keys: String },
    #[error("callback payload rejected: {0}")]
    InvalidCallback(String),
}
