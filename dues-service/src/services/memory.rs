//! In-process store: an arena of records keyed by id plus secondary indexes.
//!
//! All tables sit behind one `RwLock`. Mutations take the write guard,
//! validate the whole operation, and only then apply it, so a rejected
//! operation never leaves partial state and readers never observe one.

use crate::error::DuesError;
use crate::models::{
    sum_amounts, Charge, ChargeStatus, NewCharge, NewReference, NewResident, Payment,
    PaymentReference, ReferenceStatus, Resident,
};
use crate::services::store::DuesStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    residents: HashMap<Uuid, Resident>,
    resident_order: Vec<Uuid>,
    residents_by_national_id: HashMap<String, Uuid>,
    residents_by_key_number: HashMap<String, Uuid>,

    charges: HashMap<Uuid, Charge>,
    charges_by_resident: HashMap<Uuid, Vec<Uuid>>,
    charge_keys: HashMap<(Uuid, String, String), Uuid>,

    references: HashMap<Uuid, PaymentReference>,
    references_by_code: HashMap<String, Uuid>,

    payments: HashMap<Uuid, Payment>,
    payments_by_resident: HashMap<Uuid, Vec<Uuid>>,
    payments_by_reference: HashMap<Uuid, Uuid>,
}

impl Tables {
    fn reference_by_code(&self, code: &str) -> Result<&PaymentReference, DuesError> {
        self.references_by_code
            .get(code)
            .and_then(|id| self.references.get(id))
            .ok_or_else(|| DuesError::ReferenceNotFound(code.to_string()))
    }

    /// Move the referenced charges of `reference_id` back to pending.
    fn release_charges(&mut self, reference_id: Uuid, charge_ids: &[Uuid], at: DateTime<Utc>) {
        for charge_id in charge_ids {
            if let Some(charge) = self.charges.get_mut(charge_id) {
                if charge.status == ChargeStatus::Referenced
                    && charge.reference_id == Some(reference_id)
                {
                    charge.status = ChargeStatus::Pending;
                    charge.reference_id = None;
                    charge.updated_utc = at;
                }
            }
        }
    }
}

/// Non-durable `DuesStore` for tests and single-process deployments.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    sequence: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl DuesStore for MemoryStore {
    async fn health_check(&self) -> Result<(), DuesError> {
        Ok(())
    }

    #[instrument(skip(self, input), fields(key_number = %input.key_number))]
    async fn insert_resident(
        &self,
        input: &NewResident,
        at: DateTime<Utc>,
    ) -> Result<Resident, DuesError> {
        let mut tables = self.tables.write().await;

        if tables
            .residents_by_national_id
            .contains_key(&input.national_id)
        {
            return Err(DuesError::DuplicateResident {
                field: "national_id",
                value: input.national_id.clone(),
            });
        }
        if tables
            .residents_by_key_number
            .contains_key(&input.key_number)
        {
            return Err(DuesError::DuplicateResident {
                field: "key_number",
                value: input.key_number.clone(),
            });
        }

        let resident = Resident {
            resident_id: Uuid::new_v4(),
            full_name: input.full_name.clone(),
            national_id: input.national_id.clone(),
            phone: input.phone.clone(),
            email: input.email.clone(),
            key_number: input.key_number.clone(),
            active: true,
            created_utc: at,
            deactivated_utc: None,
        };

        tables
            .residents_by_national_id
            .insert(resident.national_id.clone(), resident.resident_id);
        tables
            .residents_by_key_number
            .insert(resident.key_number.clone(), resident.resident_id);
        tables.resident_order.push(resident.resident_id);
        tables
            .residents
            .insert(resident.resident_id, resident.clone());

        Ok(resident)
    }

    async fn get_resident(&self, resident_id: Uuid) -> Result<Option<Resident>, DuesError> {
        let tables = self.tables.read().await;
        Ok(tables.residents.get(&resident_id).cloned())
    }

    async fn list_active_residents(&self) -> Result<Vec<Resident>, DuesError> {
        let tables = self.tables.read().await;
        Ok(tables
            .resident_order
            .iter()
            .filter_map(|id| tables.residents.get(id))
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn deactivate_resident(
        &self,
        resident_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Resident>, DuesError> {
        let mut tables = self.tables.write().await;
        let Some(resident) = tables.residents.get_mut(&resident_id) else {
            return Ok(None);
        };
        if resident.active {
            resident.active = false;
            resident.deactivated_utc = Some(at);
        }
        Ok(Some(resident.clone()))
    }

    #[instrument(skip(self, input), fields(resident_id = %input.resident_id, period = %input.period))]
    async fn insert_charge_if_absent(
        &self,
        input: &NewCharge,
        at: DateTime<Utc>,
    ) -> Result<Option<Charge>, DuesError> {
        let mut tables = self.tables.write().await;

        if !tables.residents.contains_key(&input.resident_id) {
            return Err(DuesError::ResidentNotFound(input.resident_id));
        }

        let key = (
            input.resident_id,
            input.period.to_string(),
            input.description.clone(),
        );
        if tables.charge_keys.contains_key(&key) {
            debug!("Charge already exists for period");
            return Ok(None);
        }

        let charge = Charge {
            charge_id: Uuid::new_v4(),
            resident_id: input.resident_id,
            amount: input.amount,
            description: input.description.clone(),
            period: input.period,
            status: ChargeStatus::Pending,
            reference_id: None,
            payment_id: None,
            created_utc: at,
            updated_utc: at,
        };

        tables.charge_keys.insert(key, charge.charge_id);
        tables
            .charges_by_resident
            .entry(charge.resident_id)
            .or_default()
            .push(charge.charge_id);
        tables.charges.insert(charge.charge_id, charge.clone());

        Ok(Some(charge))
    }

    async fn list_charges(
        &self,
        resident_id: Uuid,
        statuses: &[ChargeStatus],
    ) -> Result<Vec<Charge>, DuesError> {
        let tables = self.tables.read().await;
        let mut charges: Vec<Charge> = tables
            .charges_by_resident
            .get(&resident_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.charges.get(id))
                    .filter(|c| statuses.contains(&c.status))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        charges.sort_by(|a, b| {
            (a.period, a.created_utc, a.charge_id).cmp(&(b.period, b.created_utc, b.charge_id))
        });
        Ok(charges)
    }

    async fn get_charges(&self, charge_ids: &[Uuid]) -> Result<Vec<Charge>, DuesError> {
        let tables = self.tables.read().await;
        Ok(charge_ids
            .iter()
            .filter_map(|id| tables.charges.get(id))
            .cloned()
            .collect())
    }

    async fn next_reference_sequence(&self) -> Result<u64, DuesError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[instrument(skip(self, input), fields(code = %input.code, resident_id = %input.resident_id))]
    async fn create_reference(
        &self,
        input: &NewReference,
    ) -> Result<PaymentReference, DuesError> {
        let mut tables = self.tables.write().await;

        if tables.references_by_code.contains_key(&input.code) {
            return Err(DuesError::ReferenceCodeCollision(input.code.clone()));
        }

        let mut amounts = Vec::with_capacity(input.charge_ids.len());
        for charge_id in &input.charge_ids {
            match tables.charges.get(charge_id) {
                Some(charge)
                    if charge.resident_id == input.resident_id
                        && charge.status == ChargeStatus::Pending =>
                {
                    amounts.push(charge.amount);
                }
                _ => {
                    return Err(DuesError::ConcurrentModification(format!(
                        "charge {} is no longer pending",
                        charge_id
                    )));
                }
            }
        }
        if sum_amounts(&amounts)? != input.amount {
            return Err(DuesError::ConcurrentModification(format!(
                "charges no longer add up to {}",
                input.amount
            )));
        }

        for charge_id in &input.charge_ids {
            if let Some(charge) = tables.charges.get_mut(charge_id) {
                charge.status = ChargeStatus::Referenced;
                charge.reference_id = Some(input.reference_id);
                charge.updated_utc = input.created_utc;
            }
        }

        let reference = PaymentReference {
            reference_id: input.reference_id,
            code: input.code.clone(),
            resident_id: input.resident_id,
            charge_ids: input.charge_ids.clone(),
            amount: input.amount,
            status: ReferenceStatus::Active,
            created_utc: input.created_utc,
            expires_utc: input.expires_utc,
            closed_utc: None,
        };
        tables
            .references_by_code
            .insert(reference.code.clone(), reference.reference_id);
        tables
            .references
            .insert(reference.reference_id, reference.clone());

        Ok(reference)
    }

    async fn get_reference_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PaymentReference>, DuesError> {
        let tables = self.tables.read().await;
        Ok(tables.reference_by_code(code).ok().cloned())
    }

    async fn get_reference(
        &self,
        reference_id: Uuid,
    ) -> Result<Option<PaymentReference>, DuesError> {
        let tables = self.tables.read().await;
        Ok(tables.references.get(&reference_id).cloned())
    }

    #[instrument(skip(self), fields(code = %code, to = %to))]
    async fn release_reference(
        &self,
        code: &str,
        to: ReferenceStatus,
        at: DateTime<Utc>,
    ) -> Result<PaymentReference, DuesError> {
        if !matches!(to, ReferenceStatus::Cancelled | ReferenceStatus::Expired) {
            return Err(DuesError::validation(format!(
                "A reference cannot be released to {}",
                to
            )));
        }

        let mut tables = self.tables.write().await;
        let reference = tables.reference_by_code(code)?;
        match reference.status {
            ReferenceStatus::Active => {}
            ReferenceStatus::Redeemed => return Err(DuesError::AlreadyRedeemed(code.to_string())),
            status => {
                return Err(DuesError::InvalidReferenceState {
                    code: code.to_string(),
                    status,
                })
            }
        }

        let reference_id = reference.reference_id;
        let charge_ids = reference.charge_ids.clone();
        tables.release_charges(reference_id, &charge_ids, at);

        let reference = tables
            .references
            .get_mut(&reference_id)
            .ok_or_else(|| DuesError::ReferenceNotFound(code.to_string()))?;
        reference.status = to;
        reference.closed_utc = Some(at);
        Ok(reference.clone())
    }

    #[instrument(skip(self))]
    async fn expire_references(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<PaymentReference>, DuesError> {
        let mut tables = self.tables.write().await;

        let stale: Vec<(Uuid, Vec<Uuid>)> = tables
            .references
            .values()
            .filter(|r| r.status == ReferenceStatus::Active && r.is_past_expiry(at))
            .map(|r| (r.reference_id, r.charge_ids.clone()))
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for (reference_id, charge_ids) in stale {
            tables.release_charges(reference_id, &charge_ids, at);
            if let Some(reference) = tables.references.get_mut(&reference_id) {
                reference.status = ReferenceStatus::Expired;
                reference.closed_utc = Some(at);
                expired.push(reference.clone());
            }
        }
        expired.sort_by(|a, b| a.code.cmp(&b.code));

        Ok(expired)
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn redeem_reference(
        &self,
        code: &str,
        cashier_id: &str,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Payment, DuesError> {
        let mut tables = self.tables.write().await;

        let reference = tables.reference_by_code(code)?.clone();
        match reference.status {
            ReferenceStatus::Active if reference.is_past_expiry(at) => {
                return Err(DuesError::ReferenceExpired(code.to_string()))
            }
            ReferenceStatus::Active => {}
            ReferenceStatus::Redeemed => return Err(DuesError::AlreadyRedeemed(code.to_string())),
            ReferenceStatus::Expired => return Err(DuesError::ReferenceExpired(code.to_string())),
            status @ ReferenceStatus::Cancelled => {
                return Err(DuesError::InvalidReferenceState {
                    code: code.to_string(),
                    status,
                })
            }
        }

        if tables
            .payments_by_reference
            .contains_key(&reference.reference_id)
        {
            return Err(DuesError::AlreadyRedeemed(code.to_string()));
        }

        let all_referenced = reference.charge_ids.iter().all(|id| {
            tables.charges.get(id).is_some_and(|c| {
                c.status == ChargeStatus::Referenced && c.reference_id == Some(reference.reference_id)
            })
        });
        if !all_referenced {
            return Err(DuesError::ConcurrentModification(format!(
                "charges bound to reference '{}' changed before redemption",
                code
            )));
        }

        for charge_id in &reference.charge_ids {
            if let Some(charge) = tables.charges.get_mut(charge_id) {
                charge.status = ChargeStatus::Paid;
                charge.payment_id = Some(payment_id);
                charge.updated_utc = at;
            }
        }
        if let Some(stored) = tables.references.get_mut(&reference.reference_id) {
            stored.status = ReferenceStatus::Redeemed;
            stored.closed_utc = Some(at);
        }

        let payment = Payment {
            payment_id,
            reference_id: reference.reference_id,
            reference_code: reference.code.clone(),
            resident_id: reference.resident_id,
            amount: reference.amount,
            cashier_id: cashier_id.to_string(),
            paid_utc: at,
            charge_ids: reference.charge_ids.clone(),
        };
        tables
            .payments_by_reference
            .insert(payment.reference_id, payment.payment_id);
        tables
            .payments_by_resident
            .entry(payment.resident_id)
            .or_default()
            .push(payment.payment_id);
        tables.payments.insert(payment.payment_id, payment.clone());

        Ok(payment)
    }

    async fn list_payments(&self, resident_id: Uuid) -> Result<Vec<Payment>, DuesError> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments_by_resident
            .get(&resident_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.payments.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        payments.sort_by(|a, b| {
            b.paid_utc
                .cmp(&a.paid_utc)
                .then_with(|| b.payment_id.cmp(&a.payment_id))
        });
        Ok(payments)
    }
}
