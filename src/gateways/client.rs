use crate::domain::transaction::{ExternalTransaction, TransactionType};
use crate::gateways::error::{GatewayCallError, GatewayError, TransportError, TransportErrorKind};
use crate::gateways::{
    CreatePaymentLinkRequest, DateRange, OperationStatus, PaymentGateway, PaymentLink, TransactionStatus,
};
use crate::ratelimit::limiter::RateLimiter;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const REDACTED_KEYS: &[&str] = &[
    "api_key",
    "secret_key",
    "authorization",
    "token",
    "card_number",
    "cvv",
    "password",
];

/// HTTP client for the card gateway's JSON API. Every call goes through the
/// shared rate limiter and carries a request timeout.
pub struct GatewayClient {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub timeout_ms: u64,
    pub page_size: u32,
    /// Upper bound on history pages read in one call.
    pub max_pages: u32,
    pub client: reqwest::Client,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    results: ResultsBlock,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ResultsBlock {
    status: String,
    #[serde(default)]
    code: Value,
    #[serde(default)]
    description: String,
}

impl ResultsBlock {
    fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }

    fn code_string(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => "UNKNOWN".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(default)]
    transaction_uid: Option<String>,
    status_code: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "type")]
    transaction_type: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
    uid: String,
    #[serde(rename = "type")]
    transaction_type: String,
    amount: i64,
    #[serde(default)]
    currency: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "more_info")]
    payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireHistoryPage {
    #[serde(default)]
    transactions: Vec<WireTransaction>,
}

impl From<WireTransaction> for ExternalTransaction {
    fn from(w: WireTransaction) -> Self {
        ExternalTransaction {
            transaction_uid: w.uid,
            transaction_type: TransactionType::parse(&w.transaction_type),
            amount_minor: w.amount,
            currency: w.currency,
            created_at: w.created_at,
            updated_at: w.updated_at,
            payment_reference: w.payment_reference,
        }
    }
}

impl GatewayClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        secret_key: &str,
        timeout_ms: u64,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            timeout_ms,
            page_size: 100,
            max_pages: 500,
            client: reqwest::Client::new(),
            limiter,
        }
    }

    async fn call(&self, scope: &str, path: &str, body: Value) -> Result<Envelope, GatewayCallError> {
        self.limiter.run(scope, || self.post(path, body)).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Envelope, GatewayCallError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, request = %redact(&body), "gateway request");

        let resp = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Secret-Key", &self.secret_key)
            .json(&body)
            .timeout(Duration::from_millis(self.timeout_ms))
            .send()
            .await
            .map_err(|e| {
                let err = TransportError::from(e);
                tracing::warn!(%url, error = %err, "gateway call failed in transport");
                err
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(TransportError::from)?;
        tracing::debug!(
            %url,
            http_status = status.as_u16(),
            response = %redact_text(&text),
            "gateway response"
        );

        interpret_response(status, &text)
    }
}

fn interpret_response(status: StatusCode, body: &str) -> Result<Envelope, GatewayCallError> {
    let parsed = serde_json::from_str::<Envelope>(body);

    if let Ok(envelope) = &parsed {
        if !envelope.results.is_success() {
            return Err(GatewayError {
                code: envelope.results.code_string(),
                description: envelope.results.description.clone(),
            }
            .into());
        }
    }

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return Err(TransportError {
            kind: TransportErrorKind::Unavailable,
            message: format!("HTTP {}", status.as_u16()),
        }
        .into());
    }

    if !status.is_success() {
        return Err(GatewayError {
            code: format!("HTTP_{}", status.as_u16()),
            description: body.chars().take(200).collect(),
        }
        .into());
    }

    parsed.map_err(|e| GatewayCallError::Decode(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, GatewayCallError> {
    serde_json::from_value(data).map_err(|e| GatewayCallError::Decode(e.to_string()))
}

/// Copy of `value` with credential-like fields masked, for logging.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if REDACTED_KEYS.contains(&k.to_ascii_lowercase().as_str()) {
                        (k.clone(), Value::String("***".to_string()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn redact_text(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => redact(&v).to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}

#[async_trait::async_trait]
impl PaymentGateway for GatewayClient {
    fn name(&self) -> &str {
        "card_gateway"
    }

    async fn create_payment_link(
        &self,
        request: &CreatePaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayCallError> {
        let body = json!({
            "amount": request.amount_minor,
            "currency_code": request.currency,
            "customer": request.customer,
            "items": request.items,
            "success_url": request.success_url,
            "failure_url": request.failure_url,
            "callback_url": request.callback_url,
            "payment_reference": request.payment_id,
        });
        let envelope = self
            .call("create_payment_link", "/api/v1/payment-pages/generate-link", body)
            .await?;
        decode(envelope.data)
    }

    async fn check_transaction_status(
        &self,
        transaction_uid: &str,
    ) -> Result<TransactionStatus, GatewayCallError> {
        let envelope = self
            .call(
                "check_status",
                "/api/v1/transactions/status",
                json!({ "transaction_uid": transaction_uid }),
            )
            .await?;
        let wire: WireStatus = decode(envelope.data)?;
        Ok(TransactionStatus {
            transaction_uid: wire.transaction_uid.unwrap_or_else(|| transaction_uid.to_string()),
            status_code: wire.status_code,
            description: wire.description,
            transaction_type: wire.transaction_type.as_deref().map(TransactionType::parse),
            amount_minor: wire.amount,
        })
    }

    async fn refund(
        &self,
        transaction_uid: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<OperationStatus, GatewayCallError> {
        let envelope = self
            .call(
                "refund",
                "/api/v1/transactions/refund",
                json!({
                    "transaction_uid": transaction_uid,
                    "amount": amount_minor,
                    "reason": reason,
                }),
            )
            .await?;
        Ok(OperationStatus {
            status: envelope.results.status,
            description: envelope.results.description,
        })
    }

    async fn cancel(&self, transaction_uid: &str) -> Result<OperationStatus, GatewayCallError> {
        let envelope = self
            .call(
                "cancel",
                "/api/v1/transactions/cancel",
                json!({ "transaction_uid": transaction_uid }),
            )
            .await?;
        Ok(OperationStatus {
            status: envelope.results.status,
            description: envelope.results.description,
        })
    }

    async fn fetch_transactions(
        &self,
        range: &DateRange,
    ) -> Result<Vec<ExternalTransaction>, GatewayCallError> {
        if self.page_size == 0 {
            return Err(GatewayCallError::InvalidRequest("history page_size must be positive".to_string()));
        }

        let mut out = Vec::new();
        let mut complete = false;
        for page in 1..=self.max_pages {
            let envelope = self
                .call(
                    "fetch_transactions",
                    "/api/v1/transactions/history",
                    json!({
                        "from_date": range.from.format("%Y-%m-%d").to_string(),
                        "to_date": range.to.format("%Y-%m-%d").to_string(),
                        "page": page,
                        "page_size": self.page_size,
                    }),
                )
                .await?;
            let batch: WireHistoryPage = decode(envelope.data)?;
            let received = batch.transactions.len();
            out.extend(batch.transactions.into_iter().map(ExternalTransaction::from));
            if received < self.page_size as usize {
                complete = true;
                break;
            }
        }
        if !complete {
            tracing::error!(pages = self.max_pages, page_size = self.page_size, "transaction history truncated");
            return Err(GatewayCallError::HistoryTruncated {
                pages: self.max_pages,
                page_size: self.page_size,
            });
        }
        tracing::info!(count = out.len(), from = %range.from, to = %range.to, "fetched gateway transactions");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_envelope_is_gateway_error_even_on_200() {
        let body = r#"{"results":{"status":"error","code":7,"description":"card declined"}}"#;
        let err = interpret_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(
            err,
            GatewayCallError::Gateway(GatewayError {
                code: "7".to_string(),
                description: "card declined".to_string()
            })
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn bare_server_error_is_retryable_transport() {
        let err = interpret_response(StatusCode::BAD_GATEWAY, "<html>oops</html>").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn bare_client_error_is_gateway_error() {
        let err = interpret_response(StatusCode::NOT_FOUND, "no such route").unwrap_err();
        assert!(matches!(err, GatewayCallError::Gateway(ref g) if g.code == "HTTP_404"));
    }

    #[test]
    fn redact_masks_nested_secrets() {
        let v = json!({"api_key": "abc", "nested": {"Secret_Key": "s"}, "amount": 5});
        let r = redact(&v);
        assert_eq!(r["api_key"], "***");
        assert_eq!(r["nested"]["Secret_Key"], "***");
        assert_eq!(r["amount"], 5);
    }
}
