//! Cashier-side lookup and exactly-once redemption of references.

use crate::error::DuesError;
use crate::models::{Charge, Payment, PaymentReference, Resident};
use crate::services::clock::Clock;
use crate::services::metrics::{record_amount_collected, record_reference_event, track};
use crate::services::store::DuesStore;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// What the cashier sees after typing a reference code.
#[derive(Debug, Clone)]
pub struct ReferenceDetails {
    pub reference: PaymentReference,
    pub resident: Resident,
    pub charges: Vec<Charge>,
}

#[derive(Clone)]
pub struct PaymentProcessor {
    store: Arc<dyn DuesStore>,
    clock: Arc<dyn Clock>,
}

impl PaymentProcessor {
    pub fn new(store: Arc<dyn DuesStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read-only lookup. References in any status are returned.
    #[instrument(skip(self), fields(reference_code = %code))]
    pub async fn lookup(&self, code: &str) -> Result<ReferenceDetails, DuesError> {
        track("lookup_reference", async {
            let code = code.trim();
            if code.is_empty() {
                return Err(DuesError::validation("reference_code is required"));
            }

            let reference = self
                .store
                .get_reference_by_code(code)
                .await?
                .ok_or_else(|| DuesError::ReferenceNotFound(code.to_string()))?;
            let resident = self
                .store
                .get_resident(reference.resident_id)
                .await?
                .ok_or(DuesError::ResidentNotFound(reference.resident_id))?;
            let charges = self.store.get_charges(&reference.charge_ids).await?;

            Ok(ReferenceDetails {
                reference,
                resident,
                charges,
            })
        })
        .await
    }

    /// Settle the charges bound to `code` as a cash payment taken by
    /// `cashier_id`. Succeeds at most once per reference.
    #[instrument(skip(self), fields(reference_code = %code, cashier_id = %cashier_id))]
    pub async fn redeem(&self, code: &str, cashier_id: &str) -> Result<Payment, DuesError> {
        track("redeem_reference", async {
            let code = code.trim();
            let cashier_id = cashier_id.trim();
            if code.is_empty() {
                return Err(DuesError::validation("reference_code is required"));
            }
            if cashier_id.is_empty() {
                return Err(DuesError::validation("cashier_id is required"));
            }

            let payment = self
                .store
                .redeem_reference(code, cashier_id, Uuid::new_v4(), self.clock.now())
                .await?;

            record_reference_event("redeemed", 1);
            record_amount_collected(payment.amount);

            info!(
                payment_id = %payment.payment_id,
                amount = %payment.amount,
                charges = payment.charge_ids.len(),
                "Cash payment recorded"
            );

            Ok(payment)
        })
        .await
    }
}
