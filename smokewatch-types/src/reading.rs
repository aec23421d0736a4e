//! A single temperature reading.

use core::fmt;

use crate::FormatError;

/// One temperature sample from a channel.
///
/// Readings are immutable once built. The timestamp is carried opaquely for
/// display and is never interpreted (no timezone or locale handling); the
/// temperature is always finite.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawReading"))]
pub struct Reading {
    timestamp: String,
    temperature: f64,
}

/// Deserialized fields, checked by [`Reading::new`] before use.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawReading {
    timestamp: String,
    temperature: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawReading> for Reading {
    type Error = FormatError;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        Reading::new(raw.timestamp, raw.temperature)
    }
}

impl Reading {
    /// Create a reading, rejecting non-finite temperatures.
    pub fn new(timestamp: impl Into<String>, temperature: f64) -> Result<Self, FormatError> {
        if !temperature.is_finite() {
            return Err(FormatError::NonFinite(temperature.to_string()));
        }
        Ok(Self {
            timestamp: timestamp.into(),
            temperature,
        })
    }

    /// The timestamp exactly as it appeared in the source data.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The temperature in degrees.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.timestamp,
            crate::FIELD_SEPARATOR,
            crate::format_temperature(self.temperature)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_non_finite() {
        assert!(Reading::new("t", f64::NAN).is_err());
        assert!(Reading::new("t", f64::INFINITY).is_err());
        assert!(Reading::new("t", -40.0).is_ok());
    }

    #[test]
    fn test_display_matches_wire_format() {
        let reading = Reading::new("03/07/2023 14:01:00", 225.0).unwrap();
        assert_eq!(reading.to_string(), "03/07/2023 14:01:00, 225.0");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip() {
        let reading = Reading::new("12:00:00", 150.4).unwrap();
        let json = serde_json::to_string(&reading).unwrap();
        assert_eq!(json, r#"{"timestamp":"12:00:00","temperature":150.4}"#);
        assert_eq!(serde_json::from_str::<Reading>(&json).unwrap(), reading);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_checks_temperature() {
        let raw = RawReading {
            timestamp: "12:00:00".to_string(),
            temperature: f64::NAN,
        };
        assert!(matches!(Reading::try_from(raw), Err(FormatError::NonFinite(_))));
        let overflow = r#"{"timestamp":"t","temperature":1e400}"#;
        assert!(serde_json::from_str::<Reading>(overflow).is_err());
        assert!(serde_json::from_str::<Reading>(r#"{"timestamp":"t"}"#).is_err());
    }
}
