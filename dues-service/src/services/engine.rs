//! The dues engine: every component wired over one store and one clock.

use crate::error::DuesError;
use crate::models::{
    BillingPeriod, HistoryEntry, NewResident, Payment, PaymentReference, Resident,
};
use crate::services::charge_generator::{ChargeGenerator, GenerationReport};
use crate::services::clock::{Clock, SystemClock};
use crate::services::debt_ledger::{DebtLedger, DebtSummary};
use crate::services::history::PaymentHistory;
use crate::services::payment_processor::{PaymentProcessor, ReferenceDetails};
use crate::services::reference_issuer::{ReferenceIssuer, ReferencePolicy};
use crate::services::residents::ResidentDirectory;
use crate::services::store::DuesStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Cheap to clone; all clones share the same store and clock.
#[derive(Clone)]
pub struct DuesEngine {
    store: Arc<dyn DuesStore>,
    clock: Arc<dyn Clock>,
    residents: ResidentDirectory,
    charges: ChargeGenerator,
    ledger: DebtLedger,
    references: ReferenceIssuer,
    payments: PaymentProcessor,
    history: PaymentHistory,
}

impl DuesEngine {
    pub fn new(
        store: Arc<dyn DuesStore>,
        clock: Arc<dyn Clock>,
        policy: ReferencePolicy,
    ) -> Self {
        Self {
            residents: ResidentDirectory::new(store.clone(), clock.clone()),
            charges: ChargeGenerator::new(store.clone(), clock.clone()),
            ledger: DebtLedger::new(store.clone()),
            references: ReferenceIssuer::new(store.clone(), clock.clone(), policy),
            payments: PaymentProcessor::new(store.clone(), clock.clone()),
            history: PaymentHistory::new(store.clone()),
            store,
            clock,
        }
    }

    /// Engine on wall-clock time.
    pub fn with_system_clock(store: Arc<dyn DuesStore>, policy: ReferencePolicy) -> Self {
        Self::new(store, Arc::new(SystemClock), policy)
    }

    pub fn store(&self) -> &Arc<dyn DuesStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn reference_policy(&self) -> &ReferencePolicy {
        self.references.policy()
    }

    // Resident Directory

    pub async fn register_resident(&self, input: NewResident) -> Result<Resident, DuesError> {
        self.residents.register(input).await
    }

    pub async fn get_resident(&self, resident_id: Uuid) -> Result<Resident, DuesError> {
        self.residents.get(resident_id).await
    }

    pub async fn deactivate_resident(&self, resident_id: Uuid) -> Result<Resident, DuesError> {
        self.residents.deactivate(resident_id).await
    }

    pub async fn list_active_residents(&self) -> Result<Vec<Resident>, DuesError> {
        self.residents.list_active().await
    }

    // Charge Generator

    pub async fn generate_monthly_dues(
        &self,
        amount: Decimal,
        description: &str,
        period: BillingPeriod,
    ) -> Result<GenerationReport, DuesError> {
        self.charges
            .generate_monthly_dues(amount, description, period)
            .await
    }

    // Debt Ledger

    pub async fn get_outstanding_debt(&self, resident_id: Uuid) -> Result<DebtSummary, DuesError> {
        self.ledger.get_outstanding_debt(resident_id).await
    }

    // Reference Issuer

    pub async fn issue_reference(
        &self,
        resident_id: Uuid,
        charge_ids: Vec<Uuid>,
    ) -> Result<PaymentReference, DuesError> {
        self.references.issue(resident_id, charge_ids).await
    }

    pub async fn cancel_reference(
        &self,
        resident_id: Uuid,
        code: &str,
    ) -> Result<PaymentReference, DuesError> {
        self.references.cancel(resident_id, code).await
    }

    pub async fn expire_stale_references(&self) -> Result<Vec<PaymentReference>, DuesError> {
        self.references.expire_stale().await
    }

    // Payment Processor

    pub async fn lookup_reference(&self, code: &str) -> Result<ReferenceDetails, DuesError> {
        self.payments.lookup(code).await
    }

    pub async fn redeem_reference(
        &self,
        code: &str,
        cashier_id: &str,
    ) -> Result<Payment, DuesError> {
        self.payments.redeem(code, cashier_id).await
    }

    // History Store

    pub async fn get_payment_history(
        &self,
        resident_id: Uuid,
    ) -> Result<Vec<HistoryEntry>, DuesError> {
        self.history.get_payment_history(resident_id).await
    }
}
