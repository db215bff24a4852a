use crate::domain::transaction::BACK_REFERENCE_FIELD;
use crate::error::DataIntegrityError;
use crate::service::sync_service::{PaymentSyncOutcome, SyncService};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The part of a gateway callback the ledger is willing to act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedCallback {
    pub transaction_uid: String,
    pub status_code: String,
    pub payment_id: String,
}

fn non_empty<'a>(tx: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| tx.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Accepts a payload only when it carries a `transaction` object with a uid, a
/// status code and the payment back-reference.
pub fn verify_callback(payload: &Value) -> Result<VerifiedCallback, DataIntegrityError> {
    let tx = payload
        .get("transaction")
        .and_then(Value::as_object)
        .ok_or_else(|| DataIntegrityError::InvalidCallback("missing transaction object".to_string()))?;

    let transaction_uid = non_empty(tx, &["uid", "transaction_uid"])
        .ok_or_else(|| DataIntegrityError::InvalidCallback("missing transaction uid".to_string()))?;
    let status_code = non_empty(tx, &["status_code"])
        .ok_or_else(|| DataIntegrityError::InvalidCallback("missing status_code".to_string()))?;
    let payment_id = non_empty(tx, &[BACK_REFERENCE_FIELD, "more_info"]).ok_or_else(|| {
        DataIntegrityError::InvalidCallback(format!("missing {BACK_REFERENCE_FIELD}"))
    })?;

    Ok(VerifiedCallback {
        transaction_uid: transaction_uid.to_string(),
        status_code: status_code.to_string(),
        payment_id: payment_id.to_string(),
    })
}

pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, DataIntegrityError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DataIntegrityError::InvalidCallback(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex HMAC-SHA256 of the raw body in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> Result<(), DataIntegrityError> {
    let expected = hex::decode(signature_hex.trim())
        .map_err(|_| DataIntegrityError::InvalidCallback("signature is not hex".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DataIntegrityError::InvalidCallback(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| DataIntegrityError::InvalidCallback("signature mismatch".to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error(transparent)]
    Rejected(#[from] DataIntegrityError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Runs a verified callback through the sync update path. The callback only
/// says which transaction to look at; its status is re-read from the gateway.
pub async fn process_callback(
    sync: &SyncService,
    callback: &VerifiedCallback,
) -> Result<PaymentSyncOutcome, CallbackError> {
    let payment = sync
        .store
        .get_payment(&callback.payment_id)
        .await?
        .ok_or_else(|| DataIntegrityError::MissingPayment {
            payment_id: callback.payment_id.clone(),
        })?;

    if let Some(known) = payment.metadata.transaction_uid() {
        if known != callback.transaction_uid {
            return Err(DataIntegrityError::InvalidCallback(format!(
                "transaction {} does not belong to payment {}",
                callback.transaction_uid, payment.id
            ))
            .into());
        }
    }

    let outcome = sync.check_payment(&payment, &callback.transaction_uid).await;
    tracing::info!(
        payment_id = %payment.id,
        transaction_uid = %callback.transaction_uid,
        callback_status_code = %callback.status_code,
        outcome = ?outcome.outcome,
        "gateway callback processed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_payload_without_back_reference() {
        let err = verify_callback(&json!({
            "transaction": {"uid": "tx_1", "status_code": "000"}
        }))
        .unwrap_err();
        assert!(matches!(err, DataIntegrityError::InvalidCallback(_)));
    }

    #[test]
    fn accepts_more_info_as_back_reference() {
        let cb = verify_callback(&json!({
            "transaction": {"uid": "tx_1", "status_code": "000", "more_info": "pay_1"}
        }))
        .unwrap();
        assert_eq!(cb.payment_id, "pay_1");
    }

    #[test]
    fn signature_round_trip() {
        let body = br#"{"transaction":{}}"#;
        let sig = sign_body("s3cret", body).unwrap();
        assert!(verify_signature("s3cret", body, &sig).is_ok());
        assert!(verify_signature("other", body, &sig).is_err());
    }
}
