//! Common test utilities for dues-service integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use dues_service::config::DuesConfig;
use dues_service::models::{BillingPeriod, Charge, NewResident, Resident};
use dues_service::services::{
    Database, DuesEngine, DuesStore, ManualClock, MemoryStore, ReferencePolicy,
};
use dues_service::startup::Application;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,dues_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Fixed starting instant so generated periods and codes are predictable.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn period(year: i32, month: u32) -> BillingPeriod {
    BillingPeriod::new(year, month).unwrap()
}

/// Engine over a fresh memory store and a manual clock.
pub struct TestEngine {
    pub engine: DuesEngine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

/// References expire after 24 hours unless a test says otherwise.
pub fn default_policy() -> ReferencePolicy {
    ReferencePolicy {
        ttl: Some(Duration::hours(24)),
        max_issue_attempts: 5,
    }
}

pub fn test_engine() -> TestEngine {
    test_engine_with_policy(default_policy())
}

pub fn test_engine_with_policy(policy: ReferencePolicy) -> TestEngine {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let engine = DuesEngine::new(
        store.clone() as Arc<dyn DuesStore>,
        clock.clone(),
        policy,
    );

    TestEngine {
        engine,
        store,
        clock,
    }
}

pub fn new_resident(key_number: &str) -> NewResident {
    NewResident {
        full_name: format!("Resident {}", key_number),
        national_id: format!("ID-{}", key_number),
        phone: "+58 412 555 0100".to_string(),
        email: format!("{}@condo.test", key_number.to_lowercase()),
        key_number: key_number.to_string(),
    }
}

pub async fn register(engine: &DuesEngine, key_number: &str) -> Resident {
    engine
        .register_resident(new_resident(key_number))
        .await
        .expect("Failed to register resident")
}

/// Generate dues for `period` and return the resident's charge for it.
pub async fn charge_for(
    engine: &DuesEngine,
    resident: &Resident,
    amount: &str,
    description: &str,
    billing_period: BillingPeriod,
) -> Charge {
    engine
        .generate_monthly_dues(dec(amount), description, billing_period)
        .await
        .expect("Failed to generate dues");

    engine
        .get_outstanding_debt(resident.resident_id)
        .await
        .expect("Failed to read debt")
        .items
        .into_iter()
        .map(|item| item.charge)
        .find(|c| c.period == billing_period && c.description == description)
        .expect("Charge should exist after generation")
}

/// A running HTTP server over a memory store, sharing its clock with the test.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub engine: DuesEngine,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

/// Spawn a test application on an ephemeral port.
pub async fn spawn_app() -> TestApp {
    let TestEngine { engine, clock, .. } = test_engine();

    let app = Application::build_with_engine(DuesConfig::in_memory(), engine.clone())
        .await
        .expect("Failed to build application");
    let address = format!("http://127.0.0.1:{}", app.port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = reqwest::Client::new();

    // Wait for server to be ready with retry
    let mut attempts = 0;
    loop {
        match client.get(format!("{}/health", address)).send().await {
            Ok(resp) if resp.status().is_success() => break,
            _ if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            _ => panic!("Server did not become ready after 20 attempts"),
        }
    }

    TestApp {
        address,
        client,
        engine,
        clock,
    }
}

/// Memory store with injectable faults: a pinned reference sequence to force
/// code collisions, and residents whose charge inserts fail.
#[derive(Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    pinned_sequence: std::sync::Mutex<Option<u64>>,
    failing_residents: std::sync::Mutex<Vec<uuid::Uuid>>,
}

impl ScriptedStore {
    pub fn pin_sequence(&self, value: Option<u64>) {
        *self.pinned_sequence.lock().unwrap() = value;
    }

    pub fn fail_charges_for(&self, resident_id: uuid::Uuid) {
        self.failing_residents.lock().unwrap().push(resident_id);
    }
}

mod scripted {
    use super::ScriptedStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use dues_service::models::{
        Charge, ChargeStatus, NewCharge, NewReference, NewResident, Payment, PaymentReference,
        ReferenceStatus, Resident,
    };
    use dues_service::services::DuesStore;
    use dues_service::DuesError;
    use uuid::Uuid;

    #[async_trait]
    impl DuesStore for ScriptedStore {
        async fn health_check(&self) -> Result<(), DuesError> {
            self.inner.health_check().await
        }

        async fn insert_resident(
            &self,
            input: &NewResident,
            at: DateTime<Utc>,
        ) -> Result<Resident, DuesError> {
            self.inner.insert_resident(input, at).await
        }

        async fn get_resident(&self, resident_id: Uuid) -> Result<Option<Resident>, DuesError> {
            self.inner.get_resident(resident_id).await
        }

        async fn list_active_residents(&self) -> Result<Vec<Resident>, DuesError> {
            self.inner.list_active_residents().await
        }

        async fn deactivate_resident(
            &self,
            resident_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<Option<Resident>, DuesError> {
            self.inner.deactivate_resident(resident_id, at).await
        }

        async fn insert_charge_if_absent(
            &self,
            input: &NewCharge,
            at: DateTime<Utc>,
        ) -> Result<Option<Charge>, DuesError> {
            let failing = self
                .failing_residents
                .lock()
                .unwrap()
                .contains(&input.resident_id);
            if failing {
                return Err(DuesError::storage("Injected failure", "connection reset"));
            }
            self.inner.insert_charge_if_absent(input, at).await
        }

        async fn list_charges(
            &self,
            resident_id: Uuid,
            statuses: &[ChargeStatus],
        ) -> Result<Vec<Charge>, DuesError> {
            self.inner.list_charges(resident_id, statuses).await
        }

        async fn get_charges(&self, charge_ids: &[Uuid]) -> Result<Vec<Charge>, DuesError> {
            self.inner.get_charges(charge_ids).await
        }

        async fn next_reference_sequence(&self) -> Result<u64, DuesError> {
            let pinned = *self.pinned_sequence.lock().unwrap();
            match pinned {
                Some(value) => Ok(value),
                None => self.inner.next_reference_sequence().await,
            }
        }

        async fn create_reference(
            &self,
            input: &NewReference,
        ) -> Result<PaymentReference, DuesError> {
            self.inner.create_reference(input).await
        }

        async fn get_reference_by_code(
            &self,
            code: &str,
        ) -> Result<Option<PaymentReference>, DuesError> {
            self.inner.get_reference_by_code(code).await
        }

        async fn get_reference(
            &self,
            reference_id: Uuid,
        ) -> Result<Option<PaymentReference>, DuesError> {
            self.inner.get_reference(reference_id).await
        }

        async fn release_reference(
            &self,
            code: &str,
            to: ReferenceStatus,
            at: DateTime<Utc>,
        ) -> Result<PaymentReference, DuesError> {
            self.inner.release_reference(code, to, at).await
        }

        async fn expire_references(
            &self,
            at: DateTime<Utc>,
        ) -> Result<Vec<PaymentReference>, DuesError> {
            self.inner.expire_references(at).await
        }

        async fn redeem_reference(
            &self,
            code: &str,
            cashier_id: &str,
            payment_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<Payment, DuesError> {
            self.inner
                .redeem_reference(code, cashier_id, payment_id, at)
                .await
        }

        async fn list_payments(&self, resident_id: Uuid) -> Result<Vec<Payment>, DuesError> {
            self.inner.list_payments(resident_id).await
        }
    }
}

/// Engine over a `ScriptedStore`.
pub fn scripted_engine() -> (DuesEngine, Arc<ScriptedStore>, Arc<ManualClock>) {
    init_tracing();

    let store = Arc::new(ScriptedStore::default());
    let clock = Arc::new(ManualClock::new(start_time()));
    let engine = DuesEngine::new(
        store.clone() as Arc<dyn DuesStore>,
        clock.clone(),
        default_policy(),
    );
    (engine, store, clock)
}

/// Engine over the PostgreSQL store named by `TEST_DATABASE_URL`, migrated.
///
/// The database is shared between tests, so callers use unique key numbers
/// and descriptions and only assert on their own records.
pub async fn pg_engine(policy: ReferencePolicy) -> (DuesEngine, Arc<ManualClock>) {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run PostgreSQL tests");

    let db = Database::new(&database_url, 8, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    let clock = Arc::new(ManualClock::new(start_time()));
    let engine = DuesEngine::new(Arc::new(db) as Arc<dyn DuesStore>, clock.clone(), policy);
    (engine, clock)
}

/// Key number that does not clash with earlier runs against the same database.
pub fn unique_key(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}
