//! Workflow services. Each one owns its tables and takes its collaborators
//! at construction.

pub mod batch_number;
pub mod catalog;
pub mod grn;
pub mod outward;
pub mod purchase_orders;
pub mod returns;
pub mod stock_ledger;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::ValidationError;

use crate::errors::ServiceError;

/// Largest magnitude a `DECIMAL(16, 4)` column holds: 999999999999.9999.
pub const MAX_DECIMAL: Decimal = Decimal::from_parts(1_874_919_423, 2_328_306, 0, false, 4);

/// Human-facing document number such as `GRN-20250307-3F9A1C2B`.
pub(crate) fn document_number(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", prefix, Utc::now().format("%Y%m%d"), random)
}

fn range_error(message: &'static str) -> ValidationError {
    let mut err = ValidationError::new("range");
    err.message = Some(message.into());
    err
}

pub(crate) fn validate_positive_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        Err(range_error("must be greater than 0"))
    } else if *value > MAX_DECIMAL {
        Err(range_error("must not exceed 999999999999.9999"))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_non_negative_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        Err(range_error("must not be negative"))
    } else if *value > MAX_DECIMAL {
        Err(range_error("must not exceed 999999999999.9999"))
    } else {
        Ok(())
    }
}

fn out_of_range(label: &str, what: &str) -> ServiceError {
    ServiceError::ValidationError(format!("{}: {} is out of range", label, what))
}

/// Rejects a value a stored quantity, rate or amount column cannot hold.
pub(crate) fn ensure_storable(label: &str, field: &str, value: Decimal) -> Result<Decimal, ServiceError> {
    if value.abs() > MAX_DECIMAL {
        return Err(out_of_range(label, field));
    }
    Ok(value)
}

/// `quantity × rate` as a storable amount.
pub(crate) fn line_amount(label: &str, quantity: Decimal, rate: Decimal) -> Result<Decimal, ServiceError> {
    let amount = quantity
        .checked_mul(rate)
        .ok_or_else(|| out_of_range(label, "amount"))?;
    ensure_storable(label, "amount", amount)
}

/// Overflow-checked `a + b`.
pub(crate) fn checked_sum(label: &str, what: &str, a: Decimal, b: Decimal) -> Result<Decimal, ServiceError> {
    a.checked_add(b).ok_or_else(|| out_of_range(label, what))
}
