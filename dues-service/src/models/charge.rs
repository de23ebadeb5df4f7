//! Periodic dues charge ("cuota") model.

use crate::models::BillingPeriod;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Charge lifecycle: `Pending -> Referenced -> Paid`.
///
/// `Referenced` falls back to `Pending` only when its reference expires or
/// is cancelled. `Paid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Pending,
    Referenced,
    Paid,
}

impl ChargeStatus {
    /// Statuses that count towards a resident's debt.
    pub const OUTSTANDING: [ChargeStatus; 2] = [ChargeStatus::Pending, ChargeStatus::Referenced];

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Referenced => "referenced",
            Self::Paid => "paid",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "referenced" => Some(Self::Referenced),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single amount owed by one resident for one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: Uuid,
    pub resident_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub period: BillingPeriod,
    pub status: ChargeStatus,
    pub reference_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a charge. The amount must already be normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCharge {
    pub resident_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub period: BillingPeriod,
}
