use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Who is asking for a status change. Only a reconciliation that proved a
/// completed payment has no gateway transaction may turn it into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    GatewayStatus,
    PhantomReversal,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn can_transition(self, to: PaymentStatus, origin: TransitionOrigin) -> bool {
        use PaymentStatus::*;
        match (self, to) {
            (from, to) if from == to => false,
            (Pending, Completed) | (Pending, Failed) | (Pending, Refunded) => true,
            (Completed, Refunded) => true,
            (Completed, Failed) => origin == TransitionOrigin::PhantomReversal,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys the engine reads out of the payment's metadata column. Anything else
/// stored there is preserved in `extra`.
///
/// Parsing is per key: a value of the wrong shape is kept verbatim in `extra`
/// and its key is listed in `malformed`, the rest of the map still loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct PaymentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_page_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,
    #[serde(skip)]
    pub malformed: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub const TRANSACTION_UID_KEY: &str = "gateway_transaction_uid";
const LEGACY_PASS_TYPE_KEY: &str = "card_type_id";

/// Keys an entitlement is derived from.
pub const ENTITLEMENT_KEYS: &[&str] = &["event_id", "pass_type_id", LEGACY_PASS_TYPE_KEY, "quantity", "ticket_type"];

fn read_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_count(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Removes `key` from `map` when it reads cleanly. Unreadable values stay in
/// the map and the key is recorded as malformed.
fn take<T>(
    map: &mut Map<String, Value>,
    key: &str,
    read: fn(&Value) -> Option<T>,
    malformed: &mut Vec<String>,
) -> Option<T> {
    let raw = map.get(key)?;
    if raw.is_null() {
        map.remove(key);
        return None;
    }
    match read(raw) {
        Some(v) => {
            map.remove(key);
            Some(v)
        }
        None => {
            malformed.push(key.to_string());
            None
        }
    }
}

impl From<Value> for PaymentMetadata {
    fn from(value: Value) -> Self {
        let mut meta = PaymentMetadata::default();
        let mut map = match value {
            Value::Object(map) => map,
            Value::Null => return meta,
            other => {
                meta.malformed.push("metadata".to_string());
                meta.extra.insert("metadata".to_string(), other);
                return meta;
            }
        };

        let malformed = &mut meta.malformed;
        meta.gateway_transaction_uid = take(&mut map, TRANSACTION_UID_KEY, read_text, malformed);
        meta.gateway_page_uid = take(&mut map, "gateway_page_uid", read_text, malformed);
        meta.event_id = take(&mut map, "event_id", read_text, malformed);
        meta.pass_type_id = take(&mut map, "pass_type_id", read_text, malformed);
        if meta.pass_type_id.is_none() {
            meta.pass_type_id = take(&mut map, LEGACY_PASS_TYPE_KEY, read_text, malformed);
        }
        meta.quantity = take(&mut map, "quantity", read_count, malformed);
        meta.ticket_type = take(&mut map, "ticket_type", read_text, malformed);
        meta.extra = map.into_iter().collect();
        meta
    }
}

impl PaymentMetadata {
    pub fn transaction_uid(&self) -> Option<&str> {
        self.gateway_transaction_uid
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn from_json(value: Value) -> Self {
        Self::from(value)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Malformed keys among `keys`, comma separated, if any.
    pub fn malformed_among(&self, keys: &[&str]) -> Option<String> {
        let hits: Vec<&str> = self
            .malformed
            .iter()
            .map(String::as_str)
            .filter(|k| *k == "metadata" || keys.contains(k))
            .collect();
        (!hits.is_empty()).then(|| hits.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub owner_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_type: String,
    pub metadata: PaymentMetadata,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// `completed_at` for a payment moving into `status`.
    pub fn completed_at_for(status: PaymentStatus, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if status == PaymentStatus::Completed {
            Some(now)
        } else {
            None
        }
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_hours()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accepts_card_type_alias() {
        let meta = PaymentMetadata::from_json(serde_json::json!({
            "gateway_transaction_uid": "tx_1",
            "card_type_id": "pass_10",
            "coupon": "SPRING"
        }));
        assert_eq!(meta.pass_type_id.as_deref(), Some("pass_10"));
        assert_eq!(meta.transaction_uid(), Some("tx_1"));
        assert_eq!(meta.extra.get("coupon"), Some(&serde_json::json!("SPRING")));
    }

    #[test]
    fn numeric_string_quantity_keeps_the_rest_of_the_map() {
        let meta = PaymentMetadata::from_json(serde_json::json!({
            "gateway_transaction_uid": "tx_1",
            "event_id": "evt_1",
            "quantity": "2"
        }));
        assert_eq!(meta.transaction_uid(), Some("tx_1"));
        assert_eq!(meta.quantity, Some(2));
        assert!(meta.malformed.is_empty());
    }

    #[test]
    fn both_pass_keys_prefer_pass_type_id() {
        let meta = PaymentMetadata::from_json(serde_json::json!({
            "gateway_transaction_uid": "tx_1",
            "pass_type_id": "pass_new",
            "card_type_id": "pass_old"
        }));
        assert_eq!(meta.transaction_uid(), Some("tx_1"));
        assert_eq!(meta.pass_type_id.as_deref(), Some("pass_new"));
        assert_eq!(meta.extra.get("card_type_id"), Some(&serde_json::json!("pass_old")));
    }

    #[test]
    fn unreadable_key_is_recorded_not_dropped() {
        let meta = PaymentMetadata::from_json(serde_json::json!({
            "gateway_transaction_uid": "tx_1",
            "event_id": "evt_1",
            "quantity": "two"
        }));
        assert_eq!(meta.transaction_uid(), Some("tx_1"));
        assert_eq!(meta.quantity, None);
        assert_eq!(meta.malformed, vec!["quantity".to_string()]);
        assert_eq!(meta.malformed_among(ENTITLEMENT_KEYS).as_deref(), Some("quantity"));
        assert_eq!(meta.malformed_among(&[TRANSACTION_UID_KEY]), None);
        assert_eq!(meta.to_json()["quantity"], serde_json::json!("two"));

        let odd = PaymentMetadata::from_json(serde_json::json!({"gateway_transaction_uid": {"id": 1}}));
        assert_eq!(odd.transaction_uid(), None);
        assert_eq!(odd.malformed_among(&[TRANSACTION_UID_KEY]).as_deref(), Some(TRANSACTION_UID_KEY));
    }

    #[test]
    fn blank_transaction_uid_counts_as_missing() {
        let meta = PaymentMetadata {
            gateway_transaction_uid: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.transaction_uid(), None);
    }

    #[test]
    fn refunded_and_failed_are_terminal() {
        use PaymentStatus::*;
        for to in [Pending, Completed, Failed] {
            assert!(!Refunded.can_transition(to, TransitionOrigin::PhantomReversal));
        }
        for to in [Pending, Completed, Refunded] {
            assert!(!Failed.can_transition(to, TransitionOrigin::GatewayStatus));
        }
    }

    #[test]
    fn completed_to_failed_needs_phantom_reversal() {
        use PaymentStatus::*;
        assert!(!Completed.can_transition(Failed, TransitionOrigin::GatewayStatus));
        assert!(Completed.can_transition(Failed, TransitionOrigin::PhantomReversal));
        assert!(Completed.can_transition(Refunded, TransitionOrigin::GatewayStatus));
    }
}
