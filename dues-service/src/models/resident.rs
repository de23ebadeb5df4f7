//! Resident identity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered resident. Never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Resident {
    pub resident_id: Uuid,
    pub full_name: String,
    pub national_id: String,
    pub phone: String,
    pub email: String,
    pub key_number: String,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub deactivated_utc: Option<DateTime<Utc>>,
}

/// Input for registering a resident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResident {
    pub full_name: String,
    pub national_id: String,
    pub phone: String,
    pub email: String,
    pub key_number: String,
}

impl NewResident {
    /// Trim every field in place.
    pub fn trimmed(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            national_id: self.national_id.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: self.email.trim().to_string(),
            key_number: self.key_number.trim().to_string(),
        }
    }

    /// Name of the first required field left blank, if any.
    pub fn first_blank_field(&self) -> Option<&'static str> {
        [
            ("full_name", &self.full_name),
            ("national_id", &self.national_id),
            ("phone", &self.phone),
            ("email", &self.email),
            ("key_number", &self.key_number),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}
