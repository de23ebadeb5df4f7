//! Resident directory: identity records that charges hang off.

use crate::error::DuesError;
use crate::models::{NewResident, Resident};
use crate::services::clock::Clock;
use crate::services::metrics::track;
use crate::services::store::DuesStore;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct ResidentDirectory {
    store: Arc<dyn DuesStore>,
    clock: Arc<dyn Clock>,
}

impl ResidentDirectory {
    pub fn new(store: Arc<dyn DuesStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register a resident. Duplicate national ids and key numbers are rejected.
    #[instrument(skip(self, input), fields(key_number = %input.key_number))]
    pub async fn register(&self, input: NewResident) -> Result<Resident, DuesError> {
        track("register_resident", async {
            let input = input.trimmed();
            if let Some(field) = input.first_blank_field() {
                return Err(DuesError::validation(format!("{} is required", field)));
            }
            if !input.email.contains('@') {
                return Err(DuesError::validation("email is not a valid address"));
            }

            let resident = self.store.insert_resident(&input, self.clock.now()).await?;

            info!(resident_id = %resident.resident_id, "Resident registered");

            Ok(resident)
        })
        .await
    }

    pub async fn get(&self, resident_id: Uuid) -> Result<Resident, DuesError> {
        track("get_resident", async {
            self.store
                .get_resident(resident_id)
                .await?
                .ok_or(DuesError::ResidentNotFound(resident_id))
        })
        .await
    }

    /// Soft-deactivate a resident. Calling it twice is harmless.
    #[instrument(skip(self), fields(resident_id = %resident_id))]
    pub async fn deactivate(&self, resident_id: Uuid) -> Result<Resident, DuesError> {
        track("deactivate_resident", async {
            let resident = self
                .store
                .deactivate_resident(resident_id, self.clock.now())
                .await?
                .ok_or(DuesError::ResidentNotFound(resident_id))?;

            info!("Resident deactivated");

            Ok(resident)
        })
        .await
    }

    pub async fn list_active(&self) -> Result<Vec<Resident>, DuesError> {
        track("list_active_residents", self.store.list_active_residents()).await
    }
}
