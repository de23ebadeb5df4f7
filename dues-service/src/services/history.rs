use crate::error::DuesError;
use crate::models::{HistoryEntry, PaymentStatus};
use crate::services::metrics::track;
use crate::services::store::DuesStore;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read side of the payment log.
#[derive(Clone)]
pub struct PaymentHistory {
    store: Arc<dyn DuesStore>,
}

impl PaymentHistory {
    pub fn new(store: Arc<dyn DuesStore>) -> Self {
        Self { store }
    }

    /// Payments of a resident, newest first, each with the charges it settled.
    #[instrument(skip(self), fields(resident_id = %resident_id))]
    pub async fn get_payment_history(
        &self,
        resident_id: Uuid,
    ) -> Result<Vec<HistoryEntry>, DuesError> {
        track("get_payment_history", async {
            if self.store.get_resident(resident_id).await?.is_none() {
                return Err(DuesError::ResidentNotFound(resident_id));
            }

            let payments = self.store.list_payments(resident_id).await?;
            let mut entries = Vec::with_capacity(payments.len());
            for payment in payments {
                let charges = self.store.get_charges(&payment.charge_ids).await?;
                entries.push(HistoryEntry {
                    payment,
                    status: PaymentStatus::Paid,
                    charges,
                });
            }

            Ok(entries)
        })
        .await
    }
}
