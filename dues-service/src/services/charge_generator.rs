//! Mass generation of periodic dues.
//!
//! Each resident's charge is inserted on its own, so one failing resident
//! never blocks the rest of the run. Re-running a period is a no-op for
//! residents that already have the charge.

use crate::error::DuesError;
use crate::models::{normalize_amount, BillingPeriod, NewCharge};
use crate::services::clock::Clock;
use crate::services::metrics::{record_charges_created, track};
use crate::services::store::DuesStore;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A resident whose charge could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationFailure {
    pub resident_id: Uuid,
    pub message: String,
}

/// Outcome of one generation run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub period: BillingPeriod,
    pub created: u64,
    pub skipped: u64,
    pub failures: Vec<GenerationFailure>,
}

#[derive(Clone)]
pub struct ChargeGenerator {
    store: Arc<dyn DuesStore>,
    clock: Arc<dyn Clock>,
}

impl ChargeGenerator {
    pub fn new(store: Arc<dyn DuesStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create one pending charge per active resident for `period`.
    #[instrument(skip(self, description), fields(period = %period, amount = %amount))]
    pub async fn generate_monthly_dues(
        &self,
        amount: Decimal,
        description: &str,
        period: BillingPeriod,
    ) -> Result<GenerationReport, DuesError> {
        track("generate_monthly_dues", async {
            let amount = normalize_amount(amount)?;
            let description = description.trim();
            if description.is_empty() {
                return Err(DuesError::validation("description is required"));
            }

            let residents = self.store.list_active_residents().await?;

            info!(residents = residents.len(), "Starting dues generation");

            let mut report = GenerationReport {
                period,
                created: 0,
                skipped: 0,
                failures: Vec::new(),
            };

            for resident in residents {
                let input = NewCharge {
                    resident_id: resident.resident_id,
                    amount,
                    description: description.to_string(),
                    period,
                };

                match self
                    .store
                    .insert_charge_if_absent(&input, self.clock.now())
                    .await
                {
                    Ok(Some(_)) => report.created += 1,
                    Ok(None) => report.skipped += 1,
                    Err(e) => {
                        warn!(
                            resident_id = %resident.resident_id,
                            error = %e,
                            "Failed to create charge"
                        );
                        report.failures.push(GenerationFailure {
                            resident_id: resident.resident_id,
                            message: e.to_string(),
                        });
                    }
                }
            }

            record_charges_created(report.created);

            info!(
                created = report.created,
                skipped = report.skipped,
                failed = report.failures.len(),
                "Dues generation completed"
            );

            Ok(report)
        })
        .await
    }
}
