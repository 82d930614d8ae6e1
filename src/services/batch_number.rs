//! Batch/lot code generation for received goods.
//!
//! Codes look like `BATCHURE250301042`: the literal `BATCH`, a three-letter
//! product prefix, the receipt date as `YYMMDD` and a random three-digit
//! suffix. Two receipts of the same product on the same day can draw the same
//! suffix; the ledger then merges them into one batch.

use chrono::{Datelike, NaiveDate};
use rand::Rng;

pub const BATCH_PREFIX: &str = "BATCH";
const PRODUCT_PREFIX_LEN: usize = 3;
const PREFIX_PAD: char = 'X';

/// First three ASCII alphanumerics of the product name, upper-cased and
/// padded with `X`.
pub fn product_prefix(product_name: &str) -> String {
    let mut prefix: String = product_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(PRODUCT_PREFIX_LEN)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    while prefix.len() < PRODUCT_PREFIX_LEN {
        prefix.push(PREFIX_PAD);
    }
    prefix
}

/// Builds a batch code from an explicit suffix (taken modulo 1000).
pub fn format_batch_number(product_name: &str, date: NaiveDate, suffix: u16) -> String {
    format!(
        "{}{}{:02}{:02}{:02}{:03}",
        BATCH_PREFIX,
        product_prefix(product_name),
        date.year().rem_euclid(100),
        date.month(),
        date.day(),
        suffix % 1000
    )
}

/// Generates a batch code with a caller-supplied RNG.
pub fn generate_with_rng<R: Rng + ?Sized>(rng: &mut R, product_name: &str, date: NaiveDate) -> String {
    format_batch_number(product_name, date, rng.gen_range(0..1000))
}

/// Generates a batch code using the thread-local RNG.
pub fn generate_batch_number(product_name: &str, date: NaiveDate) -> String {
    generate_with_rng(&mut rand::thread_rng(), product_name, date)
}

/// Returns the user's batch code when present, otherwise a generated one.
pub fn ensure_batch_number(current: &str, product_name: &str, date: NaiveDate) -> String {
    let trimmed = current.trim();
    if trimmed.is_empty() {
        generate_batch_number(product_name, date)
    } else {
        trimmed.to_string()
    }
}
