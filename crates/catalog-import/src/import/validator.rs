//! Row validation gate
//!
//! Turns a loosely-typed [`RawRow`] into a [`ProductRow`] or a rejection.
//! Classification never fails: anything malformed is simply `Invalid`.

use bigdecimal::{BigDecimal, RoundingMode};
use std::str::FromStr;

use crate::models::{ProductRow, RawRow};

pub const SKU_COLUMN: &str = "sku";
pub const NAME_COLUMN: &str = "name";
pub const PRICE_COLUMN: &str = "price";
pub const DESCRIPTION_COLUMN: &str = "description";

// Column limits of the `products` table
/// Decimal places kept for prices (`NUMERIC(12, 2)`)
pub const PRICE_SCALE: i64 = 2;
/// Total significant digits a stored price may have (`NUMERIC(12, 2)`)
pub const PRICE_PRECISION: i64 = 12;
/// Characters allowed in `sku` and `name` (`VARCHAR(255)`)
pub const MAX_TEXT_LEN: usize = 255;

/// Fractional digits accepted before rounding; longer inputs are noise
const MAX_INPUT_SCALE: i64 = 64;

/// Why a row was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRejection {
    MissingColumn(String),
    BlankField(String),
    InvalidPrice(String),
    TooLong { column: String, chars: usize },
}

impl std::fmt::Display for RowRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowRejection::MissingColumn(c) => write!(f, "missing column '{}'", c),
            RowRejection::BlankField(c) => write!(f, "blank value in '{}'", c),
            RowRejection::InvalidPrice(v) => write!(f, "invalid price '{}'", v),
            RowRejection::TooLong { column, chars } => {
                write!(f, "'{}' is {} characters, limit {}", column, chars, MAX_TEXT_LEN)
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(ProductRow),
    Invalid(RowRejection),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }
}

#[derive(Debug, Clone)]
pub struct RowValidator {
    required_columns: Vec<String>,
}

impl Default for RowValidator {
    fn default() -> Self {
        Self::new(&[] as &[String])
    }
}

impl RowValidator {
    /// `required_columns` extends the always-required key, name and price
    pub fn new<S: AsRef<str>>(required_columns: &[S]) -> Self {
        let mut columns: Vec<String> = [SKU_COLUMN, NAME_COLUMN, PRICE_COLUMN]
            .iter()
            .map(|c| c.to_string())
            .collect();

        for column in required_columns {
            let column = column.as_ref().trim();
            if !column.is_empty() && !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }

        Self {
            required_columns: columns,
        }
    }

    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }

    pub fn validate(&self, row: &RawRow) -> Validation {
        for column in &self.required_columns {
            match row.get(column) {
                None => return Validation::Invalid(RowRejection::MissingColumn(column.clone())),
                Some(value) if value.trim().is_empty() => {
                    return Validation::Invalid(RowRejection::BlankField(column.clone()))
                },
                Some(_) => {},
            }
        }

        // Presence was checked above; the fallbacks are unreachable.
        let sku = row.get(SKU_COLUMN).unwrap_or_default().trim();
        let name = row.get(NAME_COLUMN).unwrap_or_default().trim();
        let raw_price = row.get(PRICE_COLUMN).unwrap_or_default().trim();

        for (column, value) in [(SKU_COLUMN, sku), (NAME_COLUMN, name)] {
            let chars = value.chars().count();
            if chars > MAX_TEXT_LEN {
                return Validation::Invalid(RowRejection::TooLong {
                    column: column.to_string(),
                    chars,
                });
            }
        }

        let price = match parse_price(raw_price) {
            Some(price) => price,
            None => return Validation::Invalid(RowRejection::InvalidPrice(raw_price.to_string())),
        };

        Validation::Valid(ProductRow {
            sku: sku.to_string(),
            name: name.to_string(),
            description: row
                .get(DESCRIPTION_COLUMN)
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
            price,
            line: row.line,
        })
    }
}

/// Parse a non-negative decimal and round it half-up to two places.
///
/// Values the catalog column cannot hold are rejected, including exponent
/// forms whose rescaling would be unbounded.
pub fn parse_price(value: &str) -> Option<BigDecimal> {
    let price = BigDecimal::from_str(value.trim()).ok()?;
    if price < BigDecimal::from(0) {
        return None;
    }

    // `scale` is the power of ten the digits are divided by; a large negative
    // scale means a large integer part.
    let (_, scale) = price.as_bigint_and_exponent();
    if !(-(PRICE_PRECISION - PRICE_SCALE)..=MAX_INPUT_SCALE).contains(&scale) {
        return None;
    }

    let price = price.with_scale_round(PRICE_SCALE, RoundingMode::HalfUp);
    if price >= max_price_exclusive() {
        return None;
    }
    Some(price)
}

/// 10^10: the first value that no longer fits `NUMERIC(12, 2)`
fn max_price_exclusive() -> BigDecimal {
    BigDecimal::from(10i64.pow((PRICE_PRECISION - PRICE_SCALE) as u32))
}
