//! Single-use payment reference model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference lifecycle. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceStatus {
    Active,
    Redeemed,
    Expired,
    Cancelled,
}

impl ReferenceStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "redeemed" => Some(Self::Redeemed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReferenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A token presented at the cashier to settle the bound charges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub reference_id: Uuid,
    pub code: String,
    pub resident_id: Uuid,
    pub charge_ids: Vec<Uuid>,
    pub amount: Decimal,
    pub status: ReferenceStatus,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub closed_utc: Option<DateTime<Utc>>,
}

impl PaymentReference {
    /// Whether an active reference is past its expiry at `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc.is_some_and(|expires| expires <= now)
    }

    /// Format a reference code from its timestamp and sequence parts.
    pub fn format_code(issued_at: DateTime<Utc>, sequence: u64) -> String {
        format!("REF-{}-{:06}", issued_at.timestamp(), sequence)
    }
}

/// Input for creating a reference. `amount` is the face amount computed
/// from the charges at request time; the store rejects the insert if the
/// committed charges no longer add up to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReference {
    pub reference_id: Uuid,
    pub code: String,
    pub resident_id: Uuid,
    pub charge_ids: Vec<Uuid>,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn code_has_timestamp_and_padded_sequence() {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let code = PaymentReference::format_code(at, 42);
        assert_eq!(code, format!("REF-{}-000042", at.timestamp()));
    }

    #[test]
    fn code_matches_digits_pattern() {
        let code = PaymentReference::format_code(Utc::now(), 1_234_567);
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "REF");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }
}
