//! Fixed-scale monetary amounts.

use crate::error::DuesError;
use rust_decimal::Decimal;

/// Number of fractional digits kept for every stored amount.
pub const MONEY_SCALE: u32 = 2;

/// Exclusive upper bound for a single charge, matching `NUMERIC(19, 2)`.
pub fn max_amount() -> Decimal {
    Decimal::from(100_000_000_000_000_000_i64)
}

/// A zero amount carrying the money scale, so it renders as `0.00`.
pub fn zero_amount() -> Decimal {
    Decimal::new(0, MONEY_SCALE)
}

/// Validate a charge amount and rescale it to exactly two decimals.
///
/// Rejects zero, negative, oversized and sub-cent amounts instead of
/// rounding them.
pub fn normalize_amount(amount: Decimal) -> Result<Decimal, DuesError> {
    if amount <= Decimal::ZERO {
        return Err(DuesError::validation(format!(
            "Amount must be greater than zero, got {}",
            amount
        )));
    }
    if amount >= max_amount() {
        return Err(DuesError::validation(format!(
            "Amount must be less than {}, got {}",
            max_amount(),
            amount
        )));
    }

    let mut normalized = amount.normalize();
    if normalized.scale() > MONEY_SCALE {
        return Err(DuesError::validation(format!(
            "Amount {} has more than {} decimal places",
            amount, MONEY_SCALE
        )));
    }
    normalized.rescale(MONEY_SCALE);
    Ok(normalized)
}

/// Sum amounts without leaving the money scale.
pub fn sum_amounts<'a>(
    amounts: impl IntoIterator<Item = &'a Decimal>,
) -> Result<Decimal, DuesError> {
    let mut total = zero_amount();
    for amount in amounts {
        total = total
            .checked_add(*amount)
            .ok_or_else(|| DuesError::validation("Amount total is too large"))?;
    }
    total.rescale(MONEY_SCALE);
    if total.scale() != MONEY_SCALE {
        return Err(DuesError::validation("Amount total is too large"));
    }
    Ok(total)
}
