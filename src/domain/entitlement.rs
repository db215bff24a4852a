use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementKind {
    Registration,
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Confirmed,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("cancelled") {
            RegistrationStatus::Cancelled
        } else {
            RegistrationStatus::Confirmed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub payment_id: String,
    pub owner_id: String,
    pub event_id: String,
    pub ticket_type: String,
    pub quantity: i32,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pass {
    pub id: Uuid,
    pub payment_id: String,
    pub owner_id: String,
    pub pass_type_id: String,
    pub total_entries: i32,
    pub remaining_entries: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Catalog entry a pass is issued from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassType {
    pub id: String,
    pub name: String,
    pub total_entries: i32,
    pub validity_days: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entitlement {
    Registration(Registration),
    Pass(Pass),
}

impl Entitlement {
    pub fn payment_id(&self) -> &str {
        match self {
            Entitlement::Registration(r) => &r.payment_id,
            Entitlement::Pass(p) => &p.payment_id,
        }
    }

    pub fn kind(&self) -> EntitlementKind {
        match self {
            Entitlement::Registration(_) => EntitlementKind::Registration,
            Entitlement::Pass(_) => EntitlementKind::Pass,
        }
    }
}
