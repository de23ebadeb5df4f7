//! Outstanding balance per resident, always computed from stored charges.

use crate::error::DuesError;
use crate::models::{sum_amounts, Charge, ChargeStatus};
use crate::services::metrics::track;
use crate::services::store::DuesStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// An unpaid charge and the code of the reference it is waiting on, if any.
#[derive(Debug, Clone)]
pub struct DebtItem {
    pub charge: Charge,
    pub reference_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DebtSummary {
    pub resident_id: Uuid,
    pub total: Decimal,
    pub pending_count: usize,
    pub items: Vec<DebtItem>,
}

#[derive(Clone)]
pub struct DebtLedger {
    store: Arc<dyn DuesStore>,
}

impl DebtLedger {
    pub fn new(store: Arc<dyn DuesStore>) -> Self {
        Self { store }
    }

    /// Sum of pending and referenced charges, oldest period first.
    #[instrument(skip(self), fields(resident_id = %resident_id))]
    pub async fn get_outstanding_debt(&self, resident_id: Uuid) -> Result<DebtSummary, DuesError> {
        track("get_outstanding_debt", async {
            if self.store.get_resident(resident_id).await?.is_none() {
                return Err(DuesError::ResidentNotFound(resident_id));
            }

            let charges = self
                .store
                .list_charges(resident_id, &ChargeStatus::OUTSTANDING)
                .await?;

            let total = sum_amounts(charges.iter().map(|c| &c.amount))?;

            let mut codes: HashMap<Uuid, String> = HashMap::new();
            for reference_id in charges.iter().filter_map(|c| c.reference_id) {
                if codes.contains_key(&reference_id) {
                    continue;
                }
                if let Some(reference) = self.store.get_reference(reference_id).await? {
                    codes.insert(reference_id, reference.code);
                }
            }

            let items: Vec<DebtItem> = charges
                .into_iter()
                .map(|charge| DebtItem {
                    reference_code: charge.reference_id.and_then(|id| codes.get(&id).cloned()),
                    charge,
                })
                .collect();

            Ok(DebtSummary {
                resident_id,
                total,
                pending_count: items.len(),
                items,
            })
        })
        .await
    }
}
