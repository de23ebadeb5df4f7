//! PostgreSQL store for dues-service.
//!
//! Every mutating operation runs in one transaction and guards each status
//! transition with `WHERE status = <expected>`; the affected row count
//! decides which of two racing requests wins.

use crate::error::DuesError;
use crate::models::{
    sum_amounts, BillingPeriod, Charge, ChargeStatus, NewCharge, NewReference, NewResident,
    Payment, PaymentReference, ReferenceStatus, Resident,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::DuesStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const RESIDENT_COLUMNS: &str = "resident_id, full_name, national_id, phone, email, key_number, active, created_utc, deactivated_utc";
const CHARGE_COLUMNS: &str = "charge_id, resident_id, amount, description, period, status, reference_id, payment_id, created_utc, updated_utc";
const REFERENCE_COLUMNS: &str = "reference_id, code, resident_id, amount, status, created_utc, expires_utc, closed_utc";
const PAYMENT_COLUMNS: &str = "payment_id, reference_id, reference_code, resident_id, amount, cashier_id, paid_utc";

#[derive(Debug, FromRow)]
struct ChargeRow {
    charge_id: Uuid,
    resident_id: Uuid,
    amount: Decimal,
    description: String,
    period: String,
    status: String,
    reference_id: Option<Uuid>,
    payment_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<ChargeRow> for Charge {
    type Error = DuesError;

    fn try_from(row: ChargeRow) -> Result<Self, Self::Error> {
        let status = ChargeStatus::from_db(&row.status).ok_or_else(|| {
            DuesError::storage("Unknown charge status", &row.status)
        })?;
        let period: BillingPeriod = row
            .period
            .parse()
            .map_err(|e| DuesError::storage("Corrupt billing period", e))?;

        Ok(Charge {
            charge_id: row.charge_id,
            resident_id: row.resident_id,
            amount: row.amount,
            description: row.description,
            period,
            status,
            reference_id: row.reference_id,
            payment_id: row.payment_id,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReferenceRow {
    reference_id: Uuid,
    code: String,
    resident_id: Uuid,
    amount: Decimal,
    status: String,
    created_utc: DateTime<Utc>,
    expires_utc: Option<DateTime<Utc>>,
    closed_utc: Option<DateTime<Utc>>,
}

impl ReferenceRow {
    fn into_reference(self, charge_ids: Vec<Uuid>) -> Result<PaymentReference, DuesError> {
        let status = ReferenceStatus::from_db(&self.status).ok_or_else(|| {
            DuesError::storage("Unknown reference status", &self.status)
        })?;

        Ok(PaymentReference {
            reference_id: self.reference_id,
            code: self.code,
            resident_id: self.resident_id,
            charge_ids,
            amount: self.amount,
            status,
            created_utc: self.created_utc,
            expires_utc: self.expires_utc,
            closed_utc: self.closed_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    reference_id: Uuid,
    reference_code: String,
    resident_id: Uuid,
    amount: Decimal,
    cashier_id: String,
    paid_utc: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self, charge_ids: Vec<Uuid>) -> Payment {
        Payment {
            payment_id: self.payment_id,
            reference_id: self.reference_id,
            reference_code: self.reference_code,
            resident_id: self.resident_id,
            amount: self.amount,
            cashier_id: self.cashier_id,
            paid_utc: self.paid_utc,
            charge_ids,
        }
    }
}

/// Map serialization failures and deadlocks to a lost race.
fn map_tx_error(context: &str, e: sqlx::Error) -> DuesError {
    if let sqlx::Error::Database(ref db_err) = e {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return DuesError::ConcurrentModification(format!("{} lost a race", context));
        }
    }
    DuesError::storage(context, e)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "dues-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, DuesError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| DuesError::storage("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), DuesError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DuesError::storage("Migration failed", e))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DuesError> {
        self.pool
            .begin()
            .await
            .map_err(|e| DuesError::storage("Failed to begin transaction", e))
    }

    async fn commit(tx: Transaction<'static, Postgres>, context: &str) -> Result<(), DuesError> {
        tx.commit().await.map_err(|e| map_tx_error(context, e))
    }

    async fn reference_charge_ids(
        executor: impl sqlx::PgExecutor<'_>,
        reference_id: Uuid,
    ) -> Result<Vec<Uuid>, DuesError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT charge_id FROM reference_charges WHERE reference_id = $1 ORDER BY position",
        )
        .bind(reference_id)
        .fetch_all(executor)
        .await
        .map_err(|e| DuesError::storage("Failed to load reference charges", e))
    }

    /// Load the current status of a reference that failed a guarded update.
    async fn reference_state(
        tx: &mut Transaction<'static, Postgres>,
        code: &str,
    ) -> Result<Option<(ReferenceStatus, Option<DateTime<Utc>>)>, DuesError> {
        let row: Option<(String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT status, expires_utc FROM payment_references WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DuesError::storage("Failed to load reference", e))?;

        row.map(|(status, expires)| {
            ReferenceStatus::from_db(&status)
                .map(|s| (s, expires))
                .ok_or_else(|| DuesError::storage("Unknown reference status", status))
        })
        .transpose()
    }
}

#[async_trait]
impl DuesStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), DuesError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DuesError::storage("Health check failed", e))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Resident Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(key_number = %input.key_number))]
    async fn insert_resident(
        &self,
        input: &NewResident,
        at: DateTime<Utc>,
    ) -> Result<Resident, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_resident"])
            .start_timer();

        let resident = sqlx::query_as::<_, Resident>(&format!(
            r#"
            INSERT INTO residents (resident_id, full_name, national_id, phone, email, key_number, active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
            RETURNING {RESIDENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.full_name)
        .bind(&input.national_id)
        .bind(&input.phone)
        .bind(&input.email)
        .bind(&input.key_number)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                if db_err.constraint() == Some("residents_key_number_key") {
                    DuesError::DuplicateResident {
                        field: "key_number",
                        value: input.key_number.clone(),
                    }
                } else {
                    DuesError::DuplicateResident {
                        field: "national_id",
                        value: input.national_id.clone(),
                    }
                }
            }
            _ => DuesError::storage("Failed to create resident", e),
        })?;

        timer.observe_duration();

        info!(resident_id = %resident.resident_id, "Resident created");

        Ok(resident)
    }

    #[instrument(skip(self), fields(resident_id = %resident_id))]
    async fn get_resident(&self, resident_id: Uuid) -> Result<Option<Resident>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_resident"])
            .start_timer();

        let resident = sqlx::query_as::<_, Resident>(&format!(
            "SELECT {RESIDENT_COLUMNS} FROM residents WHERE resident_id = $1"
        ))
        .bind(resident_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to get resident", e))?;

        timer.observe_duration();

        Ok(resident)
    }

    #[instrument(skip(self))]
    async fn list_active_residents(&self) -> Result<Vec<Resident>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_residents"])
            .start_timer();

        let residents = sqlx::query_as::<_, Resident>(&format!(
            "SELECT {RESIDENT_COLUMNS} FROM residents WHERE active ORDER BY created_utc, resident_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to list residents", e))?;

        timer.observe_duration();

        Ok(residents)
    }

    #[instrument(skip(self), fields(resident_id = %resident_id))]
    async fn deactivate_resident(
        &self,
        resident_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Resident>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deactivate_resident"])
            .start_timer();

        let resident = sqlx::query_as::<_, Resident>(&format!(
            r#"
            UPDATE residents
            SET active = FALSE, deactivated_utc = COALESCE(deactivated_utc, $2)
            WHERE resident_id = $1
            RETURNING {RESIDENT_COLUMNS}
            "#
        ))
        .bind(resident_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to deactivate resident", e))?;

        timer.observe_duration();

        Ok(resident)
    }

    // -------------------------------------------------------------------------
    // Charge Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(resident_id = %input.resident_id, period = %input.period))]
    async fn insert_charge_if_absent(
        &self,
        input: &NewCharge,
        at: DateTime<Utc>,
    ) -> Result<Option<Charge>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_charge"])
            .start_timer();

        let row = sqlx::query_as::<_, ChargeRow>(&format!(
            r#"
            INSERT INTO charges (charge_id, resident_id, amount, description, period, status, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
            ON CONFLICT ON CONSTRAINT charges_resident_period_description_key DO NOTHING
            RETURNING {CHARGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.resident_id)
        .bind(input.amount)
        .bind(&input.description)
        .bind(input.period.to_string())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                DuesError::ResidentNotFound(input.resident_id)
            }
            _ => DuesError::storage("Failed to create charge", e),
        })?;

        timer.observe_duration();

        row.map(Charge::try_from).transpose()
    }

    #[instrument(skip(self, statuses), fields(resident_id = %resident_id))]
    async fn list_charges(
        &self,
        resident_id: Uuid,
        statuses: &[ChargeStatus],
    ) -> Result<Vec<Charge>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_charges"])
            .start_timer();

        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query_as::<_, ChargeRow>(&format!(
            r#"
            SELECT {CHARGE_COLUMNS}
            FROM charges
            WHERE resident_id = $1 AND status = ANY($2)
            ORDER BY period, created_utc, charge_id
            "#
        ))
        .bind(resident_id)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to list charges", e))?;

        timer.observe_duration();

        rows.into_iter().map(Charge::try_from).collect()
    }

    #[instrument(skip(self, charge_ids), fields(charge_count = charge_ids.len()))]
    async fn get_charges(&self, charge_ids: &[Uuid]) -> Result<Vec<Charge>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_charges"])
            .start_timer();

        let rows = sqlx::query_as::<_, ChargeRow>(&format!(
            "SELECT {CHARGE_COLUMNS} FROM charges WHERE charge_id = ANY($1)"
        ))
        .bind(charge_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to get charges", e))?;

        timer.observe_duration();

        // Keep the caller's ordering
        let mut charges = rows
            .into_iter()
            .map(Charge::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        charges.sort_by_key(|c| {
            charge_ids
                .iter()
                .position(|id| *id == c.charge_id)
                .unwrap_or(usize::MAX)
        });
        Ok(charges)
    }

    // -------------------------------------------------------------------------
    // Reference Operations
    // -------------------------------------------------------------------------

    async fn next_reference_sequence(&self) -> Result<u64, DuesError> {
        let value: i64 = sqlx::query_scalar("SELECT nextval('payment_reference_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DuesError::storage("Failed to draw reference sequence", e))?;
        u64::try_from(value).map_err(|e| DuesError::storage("Negative reference sequence", e))
    }

    #[instrument(skip(self, input), fields(code = %input.code, resident_id = %input.resident_id))]
    async fn create_reference(
        &self,
        input: &NewReference,
    ) -> Result<PaymentReference, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_reference"])
            .start_timer();

        let mut tx = self.begin().await?;

        let row = sqlx::query_as::<_, ReferenceRow>(&format!(
            r#"
            INSERT INTO payment_references (reference_id, code, resident_id, amount, status, created_utc, expires_utc)
            VALUES ($1, $2, $3, $4, 'active', $5, $6)
            RETURNING {REFERENCE_COLUMNS}
            "#
        ))
        .bind(input.reference_id)
        .bind(&input.code)
        .bind(input.resident_id)
        .bind(input.amount)
        .bind(input.created_utc)
        .bind(input.expires_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some("payment_references_code_key") =>
            {
                DuesError::ReferenceCodeCollision(input.code.clone())
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                DuesError::ResidentNotFound(input.resident_id)
            }
            _ => map_tx_error("Failed to create reference", e),
        })?;

        // Commit-time guard: every charge must still be pending for this resident
        let amounts: Vec<Decimal> = sqlx::query_scalar(
            r#"
            UPDATE charges
            SET status = 'referenced', reference_id = $1, updated_utc = $2
            WHERE charge_id = ANY($3) AND resident_id = $4 AND status = 'pending'
            RETURNING amount
            "#,
        )
        .bind(input.reference_id)
        .bind(input.created_utc)
        .bind(&input.charge_ids)
        .bind(input.resident_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to reference charges", e))?;

        if amounts.len() != input.charge_ids.len() {
            tx.rollback().await.ok();
            warn!(
                expected = input.charge_ids.len(),
                updated = amounts.len(),
                "Charges changed before the reference was committed"
            );
            return Err(DuesError::ConcurrentModification(
                "one or more charges are no longer pending".to_string(),
            ));
        }
        if sum_amounts(&amounts)? != input.amount {
            tx.rollback().await.ok();
            return Err(DuesError::ConcurrentModification(format!(
                "charges no longer add up to {}",
                input.amount
            )));
        }

        let positions: Vec<i32> = (0..input.charge_ids.len() as i32).collect();
        sqlx::query(
            r#"
            INSERT INTO reference_charges (reference_id, charge_id, position)
            SELECT $1, charge_id, position
            FROM UNNEST($2::uuid[], $3::int4[]) AS t(charge_id, position)
            "#,
        )
        .bind(input.reference_id)
        .bind(&input.charge_ids)
        .bind(&positions)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to bind reference charges", e))?;

        Self::commit(tx, "Failed to commit reference").await?;

        timer.observe_duration();

        info!(reference_id = %input.reference_id, amount = %input.amount, "Reference created");

        row.into_reference(input.charge_ids.clone())
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn get_reference_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PaymentReference>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_reference"])
            .start_timer();

        let row = sqlx::query_as::<_, ReferenceRow>(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM payment_references WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to get reference", e))?;

        let reference = match row {
            Some(row) => {
                let charge_ids = Self::reference_charge_ids(&self.pool, row.reference_id).await?;
                Some(row.into_reference(charge_ids)?)
            }
            None => None,
        };

        timer.observe_duration();

        Ok(reference)
    }

    #[instrument(skip(self), fields(reference_id = %reference_id))]
    async fn get_reference(
        &self,
        reference_id: Uuid,
    ) -> Result<Option<PaymentReference>, DuesError> {
        let row = sqlx::query_as::<_, ReferenceRow>(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM payment_references WHERE reference_id = $1"
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to get reference", e))?;

        match row {
            Some(row) => {
                let charge_ids = Self::reference_charge_ids(&self.pool, row.reference_id).await?;
                Ok(Some(row.into_reference(charge_ids)?))
            }
            None => Ok(None),
        }
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

        let timer = DB_QUERY_DURATION
            .with_label_values(&["release_reference"])
            .start_timer();

        let mut tx = self.begin().await?;

        let row = sqlx::query_as::<_, ReferenceRow>(&format!(
            r#"
            UPDATE payment_references
            SET status = $2, closed_utc = $3
            WHERE code = $1 AND status = 'active'
            RETURNING {REFERENCE_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to release reference", e))?;

        let Some(row) = row else {
            let state = Self::reference_state(&mut tx, code).await?;
            tx.rollback().await.ok();
            return Err(match state {
                None => DuesError::ReferenceNotFound(code.to_string()),
                Some((ReferenceStatus::Redeemed, _)) => DuesError::AlreadyRedeemed(code.to_string()),
                Some((status, _)) => DuesError::InvalidReferenceState {
                    code: code.to_string(),
                    status,
                },
            });
        };

        sqlx::query(
            r#"
            UPDATE charges
            SET status = 'pending', reference_id = NULL, updated_utc = $2
            WHERE reference_id = $1 AND status = 'referenced'
            "#,
        )
        .bind(row.reference_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to release charges", e))?;

        let charge_ids = Self::reference_charge_ids(&mut *tx, row.reference_id).await?;

        Self::commit(tx, "Failed to commit reference release").await?;

        timer.observe_duration();

        row.into_reference(charge_ids)
    }

    #[instrument(skip(self))]
    async fn expire_references(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<PaymentReference>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_references"])
            .start_timer();

        let mut tx = self.begin().await?;

        let rows = sqlx::query_as::<_, ReferenceRow>(&format!(
            r#"
            UPDATE payment_references
            SET status = 'expired', closed_utc = $1
            WHERE status = 'active' AND expires_utc IS NOT NULL AND expires_utc <= $1
            RETURNING {REFERENCE_COLUMNS}
            "#
        ))
        .bind(at)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to expire references", e))?;

        if rows.is_empty() {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(Vec::new());
        }

        let reference_ids: Vec<Uuid> = rows.iter().map(|r| r.reference_id).collect();
        sqlx::query(
            r#"
            UPDATE charges
            SET status = 'pending', reference_id = NULL, updated_utc = $2
            WHERE reference_id = ANY($1) AND status = 'referenced'
            "#,
        )
        .bind(&reference_ids)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to release expired charges", e))?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in rows {
            let charge_ids = Self::reference_charge_ids(&mut *tx, row.reference_id).await?;
            expired.push(row.into_reference(charge_ids)?);
        }

        Self::commit(tx, "Failed to commit reference expiry").await?;

        timer.observe_duration();

        expired.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(expired)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(code = %code, cashier_id = %cashier_id))]
    async fn redeem_reference(
        &self,
        code: &str,
        cashier_id: &str,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Payment, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["redeem_reference"])
            .start_timer();

        let mut tx = self.begin().await?;

        // Compare-and-set on the reference row; a concurrent redeemer blocks on
        // the row lock and then sees status = 'redeemed'.
        let row = sqlx::query_as::<_, ReferenceRow>(&format!(
            r#"
            UPDATE payment_references
            SET status = 'redeemed', closed_utc = $2
            WHERE code = $1
              AND status = 'active'
              AND (expires_utc IS NULL OR expires_utc > $2)
            RETURNING {REFERENCE_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to redeem reference", e))?;

        let Some(row) = row else {
            let state = Self::reference_state(&mut tx, code).await?;
            tx.rollback().await.ok();
            return Err(match state {
                None => DuesError::ReferenceNotFound(code.to_string()),
                Some((ReferenceStatus::Redeemed, _)) => DuesError::AlreadyRedeemed(code.to_string()),
                Some((ReferenceStatus::Active, _)) | Some((ReferenceStatus::Expired, _)) => {
                    DuesError::ReferenceExpired(code.to_string())
                }
                Some((status, _)) => DuesError::InvalidReferenceState {
                    code: code.to_string(),
                    status,
                },
            });
        };

        let charge_ids = Self::reference_charge_ids(&mut *tx, row.reference_id).await?;

        let payment_row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (payment_id, reference_id, reference_code, resident_id, amount, cashier_id, paid_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment_id)
        .bind(row.reference_id)
        .bind(&row.code)
        .bind(row.resident_id)
        .bind(row.amount)
        .bind(cashier_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DuesError::AlreadyRedeemed(code.to_string())
            }
            _ => map_tx_error("Failed to record payment", e),
        })?;

        let settled = sqlx::query(
            r#"
            UPDATE charges
            SET status = 'paid', payment_id = $1, updated_utc = $2
            WHERE reference_id = $3 AND status = 'referenced' AND charge_id = ANY($4)
            "#,
        )
        .bind(payment_id)
        .bind(at)
        .bind(row.reference_id)
        .bind(&charge_ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_tx_error("Failed to settle charges", e))?
        .rows_affected();

        if settled != charge_ids.len() as u64 {
            tx.rollback().await.ok();
            warn!(
                expected = charge_ids.len(),
                settled = settled,
                "Bound charges changed before redemption"
            );
            return Err(DuesError::ConcurrentModification(format!(
                "charges bound to reference '{}' changed before redemption",
                code
            )));
        }

        Self::commit(tx, "Failed to commit payment").await?;

        timer.observe_duration();

        info!(
            payment_id = %payment_id,
            amount = %payment_row.amount,
            charges = charge_ids.len(),
            "Reference redeemed"
        );

        Ok(payment_row.into_payment(charge_ids))
    }

    #[instrument(skip(self), fields(resident_id = %resident_id))]
    async fn list_payments(&self, resident_id: Uuid) -> Result<Vec<Payment>, DuesError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE resident_id = $1
            ORDER BY paid_utc DESC, payment_id DESC
            "#
        ))
        .bind(resident_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DuesError::storage("Failed to list payments", e))?;

        let mut payments = Vec::with_capacity(rows.len());
        for row in rows {
            let charge_ids = Self::reference_charge_ids(&self.pool, row.reference_id).await?;
            payments.push(row.into_payment(charge_ids));
        }

        timer.observe_duration();

        Ok(payments)
    }
}
