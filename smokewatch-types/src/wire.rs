//! The `"<timestamp>, <temperature>"` message format.

use core::str::FromStr;

use thiserror::Error;

use crate::{round_half_even, Reading};

/// Separator between the timestamp and temperature fields.
pub const FIELD_SEPARATOR: &str = ", ";

/// Decimal places a temperature is rounded to before it is published.
pub const WIRE_DECIMALS: u32 = 2;

/// A message body that does not describe a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The body is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// The body did not split into exactly a timestamp and a temperature.
    #[error("expected 2 fields separated by \", \", found {0}")]
    FieldCount(usize),

    /// The timestamp field is empty.
    #[error("timestamp field is empty")]
    EmptyTimestamp,

    /// The temperature field is not a number.
    #[error("temperature {0:?} is not a number")]
    InvalidTemperature(String),

    /// The temperature parsed but is NaN or infinite.
    #[error("temperature {0:?} is not finite")]
    NonFinite(String),
}

impl Reading {
    /// Parse a raw message body.
    pub fn parse(payload: &[u8]) -> Result<Self, FormatError> {
        let text = core::str::from_utf8(payload).map_err(|_| FormatError::NotUtf8)?;
        text.parse()
    }

    /// Encode this reading as a message body.
    pub fn to_payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl FromStr for Reading {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(FIELD_SEPARATOR).collect();
        let [timestamp, temperature] = fields.as_slice() else {
            return Err(FormatError::FieldCount(fields.len()));
        };

        if timestamp.trim().is_empty() {
            return Err(FormatError::EmptyTimestamp);
        }

        let raw = temperature.trim();
        let value: f64 = raw
            .parse()
            .map_err(|_| FormatError::InvalidTemperature(raw.to_string()))?;
        if !value.is_finite() {
            return Err(FormatError::NonFinite(raw.to_string()));
        }

        Reading::new(*timestamp, value)
    }
}

/// Render a temperature for the wire.
///
/// The value is rounded to [`WIRE_DECIMALS`] places and printed in its
/// shortest form, always keeping at least one fractional digit
/// (`225.0`, `225.5`, `225.57`).
pub fn format_temperature(temperature: f64) -> String {
    let rounded = round_half_even(temperature, WIRE_DECIMALS);
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

/// Build a message body from raw parts.
pub fn format_payload(timestamp: &str, temperature: f64) -> Vec<u8> {
    format!(
        "{}{}{}",
        timestamp,
        FIELD_SEPARATOR,
        format_temperature(temperature)
    )
    .into_bytes()
}
