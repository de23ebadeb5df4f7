//! Domain models for dues-service.

mod charge;
mod money;
mod payment;
mod period;
mod reference;
mod resident;

pub use charge::{Charge, ChargeStatus, NewCharge};
pub use money::{normalize_amount, sum_amounts, zero_amount, MONEY_SCALE};
pub use payment::{HistoryEntry, Payment, PaymentStatus};
pub use period::BillingPeriod;
pub use reference::{NewReference, PaymentReference, ReferenceStatus};
pub use resident::{NewResident, Resident};
