use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A score or line as it arrives from storage or a provider feed.
///
/// Providers are inconsistent about numeric encoding, so grading never trusts
/// the raw shape: everything goes through [`NumericInput::to_decimal`], and a
/// value that cannot be read is treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl NumericInput {
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            NumericInput::Integer(value) => Some(Decimal::from(*value)),
            NumericInput::Float(value) => {
                if value.is_finite() {
                    Decimal::from_f64(*value)
                } else {
                    None
                }
            }
            NumericInput::Text(text) => parse_decimal_text(text),
        }
    }
}

impl From<i64> for NumericInput {
    fn from(value: i64) -> Self {
        NumericInput::Integer(value)
    }
}

impl From<i32> for NumericInput {
    fn from(value: i32) -> Self {
        NumericInput::Integer(value as i64)
    }
}

impl From<f64> for NumericInput {
    fn from(value: f64) -> Self {
        NumericInput::Float(value)
    }
}

impl From<&str> for NumericInput {
    fn from(value: &str) -> Self {
        NumericInput::Text(value.to_string())
    }
}

impl From<String> for NumericInput {
    fn from(value: String) -> Self {
        NumericInput::Text(value)
    }
}

impl fmt::Display for NumericInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericInput::Integer(value) => write!(f, "{}", value),
            NumericInput::Float(value) => write!(f, "{}", value),
            NumericInput::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Normalize an optional raw value; `None` and unreadable values both come out absent.
pub fn normalize(value: Option<&NumericInput>) -> Option<Decimal> {
    value.and_then(NumericInput::to_decimal)
}

fn parse_decimal_text(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if unsigned.is_empty() {
        return None;
    }

    Decimal::from_str(unsigned)
        .or_else(|_| Decimal::from_scientific(unsigned))
        .ok()
}
