//! Request and response bodies for the HTTP surface.

use crate::models::{
    BillingPeriod, Charge, ChargeStatus, HistoryEntry, NewResident, PaymentStatus,
    ReferenceStatus,
};
use crate::services::{DebtItem, DebtSummary, GenerationFailure, ReferenceDetails};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

pub const DUES_GENERATED_MESSAGE: &str = "Cuotas mensuales generadas con éxito.";
pub const PAYMENT_RECORDED_MESSAGE: &str = "El pago en efectivo fue registrado con éxito.";

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: String,
    pub version: String,
}

// -----------------------------------------------------------------------------
// Admin
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterResidentRequest {
    #[validate(length(min = 1, max = 200, message = "Full name cannot be empty"))]
    pub full_name: String,
    #[validate(length(min = 1, max = 64, message = "National id cannot be empty"))]
    pub national_id: String,
    #[validate(length(min = 1, max = 32, message = "Phone cannot be empty"))]
    pub phone: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 64, message = "Key number cannot be empty"))]
    pub key_number: String,
}

impl From<RegisterResidentRequest> for NewResident {
    fn from(req: RegisterResidentRequest) -> Self {
        Self {
            full_name: req.full_name,
            national_id: req.national_id,
            phone: req.phone,
            email: req.email,
            key_number: req.key_number,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResidentResponse {
    pub message: String,
    pub resident_id: Uuid,
    pub key_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateDuesRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500, message = "Description cannot be empty"))]
    pub description: String,
    /// `YYYY-MM`; defaults to the current month.
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateDuesResponse {
    pub message: String,
    pub period: BillingPeriod,
    pub total_cuotas_creadas: u64,
    pub skipped: u64,
    pub failures: Vec<GenerationFailure>,
}

#[derive(Debug, Serialize)]
pub struct ExpireReferencesResponse {
    pub expired: usize,
    pub reference_codes: Vec<String>,
}

// -----------------------------------------------------------------------------
// Dues
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DebtItemResponse {
    pub id: Uuid,
    pub amount: Decimal,
    pub status: ChargeStatus,
    pub description: String,
    pub period: BillingPeriod,
    pub reference_code: Option<String>,
}

impl From<DebtItem> for DebtItemResponse {
    fn from(item: DebtItem) -> Self {
        Self {
            id: item.charge.charge_id,
            amount: item.charge.amount,
            status: item.charge.status,
            description: item.charge.description,
            period: item.charge.period,
            reference_code: item.reference_code,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DebtResponse {
    pub resident_id: Uuid,
    pub total_debt: Decimal,
    pub pending_count: usize,
    pub items: Vec<DebtItemResponse>,
}

impl From<DebtSummary> for DebtResponse {
    fn from(summary: DebtSummary) -> Self {
        Self {
            resident_id: summary.resident_id,
            total_debt: summary.total,
            pending_count: summary.pending_count,
            items: summary.items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueReferenceRequest {
    #[validate(length(min = 1, message = "At least one charge must be selected"))]
    pub charge_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct IssueReferenceResponse {
    pub message: String,
    pub reference_code: String,
    pub amount: Decimal,
    pub expires_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CancelReferenceResponse {
    pub message: String,
    pub reference_code: String,
    pub status: ReferenceStatus,
}

// -----------------------------------------------------------------------------
// Cashier
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CashierSearchRequest {
    #[validate(length(min = 1, message = "Reference code cannot be empty"))]
    pub reference_code: String,
}

#[derive(Debug, Serialize)]
pub struct ResidentSummary {
    pub resident_id: Uuid,
    pub full_name: String,
    pub national_id: String,
    pub key_number: String,
}

#[derive(Debug, Serialize)]
pub struct ChargeSummary {
    pub id: Uuid,
    pub description: String,
    pub period: BillingPeriod,
    pub amount: Decimal,
    pub status: ChargeStatus,
}

impl From<Charge> for ChargeSummary {
    fn from(charge: Charge) -> Self {
        Self {
            id: charge.charge_id,
            description: charge.description,
            period: charge.period,
            amount: charge.amount,
            status: charge.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CashierSearchResponse {
    pub reference_code: String,
    pub status: ReferenceStatus,
    pub amount: Decimal,
    pub expires_utc: Option<DateTime<Utc>>,
    pub resident: ResidentSummary,
    pub charges: Vec<ChargeSummary>,
}

impl From<ReferenceDetails> for CashierSearchResponse {
    fn from(details: ReferenceDetails) -> Self {
        Self {
            reference_code: details.reference.code,
            status: details.reference.status,
            amount: details.reference.amount,
            expires_utc: details.reference.expires_utc,
            resident: ResidentSummary {
                resident_id: details.resident.resident_id,
                full_name: details.resident.full_name,
                national_id: details.resident.national_id,
                key_number: details.resident.key_number,
            },
            charges: details.charges.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1, message = "Reference code cannot be empty"))]
    pub reference_code: String,
    #[validate(length(min = 1, max = 128, message = "Cashier id cannot be empty"))]
    pub cashier_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    pub message: String,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub charges_settled: usize,
}

// -----------------------------------------------------------------------------
// History
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HistoryItemResponse {
    pub payment_id: Uuid,
    pub reference_code: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
    pub cashier_id: String,
    pub charges: Vec<ChargeSummary>,
}

impl From<HistoryEntry> for HistoryItemResponse {
    fn from(entry: HistoryEntry) -> Self {
        Self {
            payment_id: entry.payment.payment_id,
            reference_code: entry.payment.reference_code,
            amount: entry.payment.amount,
            status: entry.status,
            timestamp: entry.payment.paid_utc,
            cashier_id: entry.payment.cashier_id,
            charges: entry.charges.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub resident_id: Uuid,
    pub items: Vec<HistoryItemResponse>,
}
