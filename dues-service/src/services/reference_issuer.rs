//! Single-use payment references.
//!
//! Issuing validates the selected charges up front for a precise error, then
//! lets the store re-check them inside the same atomic unit that binds them.
//! Whoever commits first owns the charges; the other caller gets
//! `ConcurrentModification` and nothing is written for it.

use crate::error::DuesError;
use crate::models::{sum_amounts, ChargeStatus, NewReference, PaymentReference, ReferenceStatus};
use crate::services::clock::Clock;
use crate::services::metrics::{record_reference_event, track};
use crate::services::store::DuesStore;
use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Issuance settings.
#[derive(Debug, Clone)]
pub struct ReferencePolicy {
    /// Lifetime of an active reference. `None` means references never expire.
    pub ttl: Option<Duration>,
    /// Attempts at drawing a unique code before giving up.
    pub max_issue_attempts: u32,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            max_issue_attempts: 5,
        }
    }
}

#[derive(Clone)]
pub struct ReferenceIssuer {
    store: Arc<dyn DuesStore>,
    clock: Arc<dyn Clock>,
    policy: ReferencePolicy,
}

impl ReferenceIssuer {
    pub fn new(store: Arc<dyn DuesStore>, clock: Arc<dyn Clock>, policy: ReferencePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &ReferencePolicy {
        &self.policy
    }

    /// Bind `charge_ids` of one resident to a fresh reference.
    #[instrument(skip(self, charge_ids), fields(resident_id = %resident_id, charge_count = charge_ids.len()))]
    pub async fn issue(
        &self,
        resident_id: Uuid,
        charge_ids: Vec<Uuid>,
    ) -> Result<PaymentReference, DuesError> {
        track("issue_reference", async {
            if charge_ids.is_empty() {
                return Err(DuesError::validation("At least one charge must be selected"));
            }
            let mut seen = HashSet::with_capacity(charge_ids.len());
            if let Some(dup) = charge_ids.iter().find(|id| !seen.insert(**id)) {
                return Err(DuesError::validation(format!(
                    "Charge {} is selected more than once",
                    dup
                )));
            }

            if self.store.get_resident(resident_id).await?.is_none() {
                return Err(DuesError::ResidentNotFound(resident_id));
            }

            let charges = self.store.get_charges(&charge_ids).await?;
            for charge_id in &charge_ids {
                let charge = charges
                    .iter()
                    .find(|c| c.charge_id == *charge_id)
                    .ok_or(DuesError::ChargeNotFound(*charge_id))?;
                if charge.resident_id != resident_id {
                    return Err(DuesError::validation(format!(
                        "Charge {} belongs to another resident",
                        charge_id
                    )));
                }
                if charge.status != ChargeStatus::Pending {
                    return Err(DuesError::InvalidChargeState {
                        charge_id: *charge_id,
                        status: charge.status,
                    });
                }
            }

            let amount = sum_amounts(charges.iter().map(|c| &c.amount))?;
            let attempts = self.policy.max_issue_attempts.max(1);

            for attempt in 1..=attempts {
                let now = self.clock.now();
                let sequence = self.store.next_reference_sequence().await?;
                let input = NewReference {
                    reference_id: Uuid::new_v4(),
                    code: PaymentReference::format_code(now, sequence),
                    resident_id,
                    charge_ids: charge_ids.clone(),
                    amount,
                    created_utc: now,
                    expires_utc: self.policy.ttl.map(|ttl| now + ttl),
                };

                match self.store.create_reference(&input).await {
                    Ok(reference) => {
                        record_reference_event("issued", 1);
                        info!(
                            reference_code = %reference.code,
                            amount = %reference.amount,
                            "Reference issued"
                        );
                        return Ok(reference);
                    }
                    Err(DuesError::ReferenceCodeCollision(code)) => {
                        warn!(
                            reference_code = %code,
                            attempt = attempt,
                            "Reference code already in use, drawing a new one"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            Err(DuesError::ConcurrentModification(format!(
                "no unique reference code after {} attempts",
                attempts
            )))
        })
        .await
    }

    /// Cancel an active reference and release its charges.
    #[instrument(skip(self), fields(resident_id = %resident_id, reference_code = %code))]
    pub async fn cancel(
        &self,
        resident_id: Uuid,
        code: &str,
    ) -> Result<PaymentReference, DuesError> {
        track("cancel_reference", async {
            let reference = self
                .store
                .get_reference_by_code(code)
                .await?
                .filter(|r| r.resident_id == resident_id)
                .ok_or_else(|| DuesError::ReferenceNotFound(code.to_string()))?;

            let cancelled = self
                .store
                .release_reference(&reference.code, ReferenceStatus::Cancelled, self.clock.now())
                .await?;

            record_reference_event("cancelled", 1);
            info!(charges = cancelled.charge_ids.len(), "Reference cancelled");

            Ok(cancelled)
        })
        .await
    }

    /// Expire every active reference past its expiry and release its charges.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self) -> Result<Vec<PaymentReference>, DuesError> {
        track("expire_references", async {
            let expired = self.store.expire_references(self.clock.now()).await?;
            if !expired.is_empty() {
                record_reference_event("expired", expired.len());
                info!(count = expired.len(), "Expired stale references");
            }
            Ok(expired)
        })
        .await
    }
}
