//! Completed payments: the audit trail.

use crate::models::Charge;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status marker shown for every history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "PAGADO")]
    Paid,
}

/// Immutable record of one successful redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub reference_id: Uuid,
    pub reference_code: String,
    pub resident_id: Uuid,
    pub amount: Decimal,
    pub cashier_id: String,
    pub paid_utc: DateTime<Utc>,
    pub charge_ids: Vec<Uuid>,
}

/// A payment joined with the charges it settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub payment: Payment,
    pub status: PaymentStatus,
    pub charges: Vec<Charge>,
}
