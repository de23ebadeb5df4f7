//! Storage boundary for the dues engine.
//!
//! Each mutating method is one atomic unit: it either applies completely or
//! leaves no trace. Status transitions are conditional on the expected prior
//! status, so two concurrent callers racing on the same charge or reference
//! get exactly one winner and one explicit error.

use crate::error::DuesError;
use crate::models::{
    Charge, ChargeStatus, NewCharge, NewReference, NewResident, Payment, PaymentReference,
    ReferenceStatus, Resident,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait DuesStore: Send + Sync {
    /// Check that the backing storage is reachable.
    async fn health_check(&self) -> Result<(), DuesError>;

    // -------------------------------------------------------------------------
    // Residents
    // -------------------------------------------------------------------------

    /// Insert a resident. Fails with `DuplicateResident` when the national id
    /// or key number is taken.
    async fn insert_resident(
        &self,
        input: &NewResident,
        at: DateTime<Utc>,
    ) -> Result<Resident, DuesError>;

    async fn get_resident(&self, resident_id: Uuid) -> Result<Option<Resident>, DuesError>;

    /// Active residents ordered by registration time.
    async fn list_active_residents(&self) -> Result<Vec<Resident>, DuesError>;

    /// Soft-deactivate a resident. Already inactive residents are returned as is.
    async fn deactivate_resident(
        &self,
        resident_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Resident>, DuesError>;

    // -------------------------------------------------------------------------
    // Charges
    // -------------------------------------------------------------------------

    /// Insert a pending charge unless the (resident, period, description)
    /// triple already exists, in which case `None` is returned.
    async fn insert_charge_if_absent(
        &self,
        input: &NewCharge,
        at: DateTime<Utc>,
    ) -> Result<Option<Charge>, DuesError>;

    /// Charges of a resident in any of `statuses`, ordered by period then
    /// creation time.
    async fn list_charges(
        &self,
        resident_id: Uuid,
        statuses: &[ChargeStatus],
    ) -> Result<Vec<Charge>, DuesError>;

    /// Charges by id. Unknown ids are omitted.
    async fn get_charges(&self, charge_ids: &[Uuid]) -> Result<Vec<Charge>, DuesError>;

    // -------------------------------------------------------------------------
    // References
    // -------------------------------------------------------------------------

    /// Next value of the reference sequence. Unique per store.
    async fn next_reference_sequence(&self) -> Result<u64, DuesError>;

    /// Create a reference and move its charges `Pending -> Referenced`.
    ///
    /// Fails with `ReferenceCodeCollision` if the code is taken and with
    /// `ConcurrentModification` if any charge is no longer pending for the
    /// resident at commit time.
    async fn create_reference(&self, input: &NewReference)
        -> Result<PaymentReference, DuesError>;

    async fn get_reference_by_code(&self, code: &str)
        -> Result<Option<PaymentReference>, DuesError>;

    async fn get_reference(&self, reference_id: Uuid)
        -> Result<Option<PaymentReference>, DuesError>;

    /// Move an active reference to `Cancelled` or `Expired` and release its
    /// charges back to `Pending`.
    async fn release_reference(
        &self,
        code: &str,
        to: ReferenceStatus,
        at: DateTime<Utc>,
    ) -> Result<PaymentReference, DuesError>;

    /// Expire every active reference whose expiry is at or before `at`,
    /// releasing their charges. Returns the references that were expired.
    async fn expire_references(&self, at: DateTime<Utc>)
        -> Result<Vec<PaymentReference>, DuesError>;

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    /// Redeem an active reference: mark it redeemed, mark its charges paid and
    /// record the payment, all at once.
    async fn redeem_reference(
        &self,
        code: &str,
        cashier_id: &str,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Payment, DuesError>;

    /// Payments of a resident, newest first.
    async fn list_payments(&self, resident_id: Uuid) -> Result<Vec<Payment>, DuesError>;
}
