//! Billing period (calendar month) used to key generated dues.

use crate::error::DuesError;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, DuesError> {
        if !(1..=12).contains(&month) {
            return Err(DuesError::validation(format!(
                "Billing month must be between 1 and 12, got {}",
                month
            )));
        }
        if !(1970..=9999).contains(&year) {
            return Err(DuesError::validation(format!(
                "Billing year {} is out of range",
                year
            )));
        }
        Ok(Self { year, month })
    }

    /// The period containing the given instant.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingPeriod {
    type Err = DuesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DuesError::validation(format!(
                "Invalid billing period '{}', expected YYYY-MM",
                s
            ))
        };

        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = DuesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingPeriod> for String {
    fn from(period: BillingPeriod) -> Self {
        period.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_and_renders_year_month() {
        let period: BillingPeriod = "2026-03".parse().unwrap();
        assert_eq!(period.year(), 2026);
        assert_eq!(period.month(), 3);
        assert_eq!(period.to_string(), "2026-03");
    }

    #[test]
    fn rejects_malformed_periods() {
        for raw in ["2026-13", "2026-00", "26-01", "2026/01", "2026-1", ""] {
            assert!(raw.parse::<BillingPeriod>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn period_of_instant_uses_utc_month() {
        let at = Utc.with_ymd_and_hms(2026, 10, 31, 23, 59, 59).unwrap();
        assert_eq!(BillingPeriod::containing(at).to_string(), "2026-10");
    }

    #[test]
    fn orders_chronologically() {
        let earlier: BillingPeriod = "2025-12".parse().unwrap();
        let later: BillingPeriod = "2026-01".parse().unwrap();
        assert!(earlier < later);
    }
}
