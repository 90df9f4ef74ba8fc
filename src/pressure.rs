//! Pressure response parsing.
//!
//! Turns the free-form text a gauge sends back (`"7.0E+02 mbar >"`,
//! `" 0.001>"`) into a [`PressureReading`] normalised to Torr. Pure, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// End-of-response marker the gauge appends to every reply.
pub const RESPONSE_TERMINATOR: char = '>';

/// `number [unit]`, whitespace allowed around every token.
static READING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-z][A-Za-z0-9]*)?\s*$")
        .expect("Invalid reading regex")
});

/// Errors produced while parsing a gauge response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing but whitespace (and possibly the terminator) was received.
    #[error("empty response")]
    Empty,

    /// No numeric token could be found at the start of the response.
    #[error("no numeric value in response {0:?}")]
    NoNumber(String),

    /// A numeric token was found but is not a finite decimal.
    #[error("invalid numeric value {0:?}")]
    InvalidNumber(String),
}

/// Units the gauge family is known to report, with their factor to Torr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureUnit {
    Torr,
    MilliTorr,
    Mbar,
    Pa,
    HPa,
    KPa,
    Atm,
    Bar,
    Psi,
}

impl PressureUnit {
    /// Look up a unit token, ignoring case.
    pub fn from_token(token: &str) -> Option<Self> {
        let unit = match token.to_ascii_lowercase().as_str() {
            "torr" => Self::Torr,
            "millitorr" | "mtorr" => Self::MilliTorr,
            "mbar" => Self::Mbar,
            "pa" => Self::Pa,
            "hpa" => Self::HPa,
            "kpa" => Self::KPa,
            "atm" => Self::Atm,
            "bar" => Self::Bar,
            "psi" => Self::Psi,
            _ => return None,
        };
        Some(unit)
    }

    /// Multiplier converting a value in this unit to Torr.
    pub fn to_torr_factor(self) -> f64 {
        match self {
            Self::Torr => 1.0,
            Self::MilliTorr => 0.001,
            Self::Mbar => 0.750062,
            Self::Pa => 0.00750062,
            Self::HPa => 0.750062,
            Self::KPa => 7.50062,
            Self::Atm => 760.0,
            Self::Bar => 750.062,
            Self::Psi => 51.7149,
        }
    }
}

/// One parsed gauge response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureReading {
    /// Pressure normalised to Torr.
    pub pressure_torr: f64,
    /// Unit token exactly as the gauge sent it, if any.
    pub unit_raw: Option<String>,
    /// The untouched response text.
    pub raw_line: String,
    /// True when a unit other than Torr was converted.
    pub was_converted: bool,
}

impl Default for PressureReading {
    fn default() -> Self {
        Self {
            pressure_torr: 0.0,
            unit_raw: None,
            raw_line: String::new(),
            was_converted: false,
        }
    }
}

/// Parse a gauge response.
///
/// ```
/// use gauge_logger::pressure::parse;
///
/// let reading = parse("7.0E+02 mbar >").unwrap();
/// assert!((reading.pressure_torr - 525.0434).abs() < 0.001);
/// assert_eq!(reading.unit_raw.as_deref(), Some("mbar"));
/// assert!(reading.was_converted);
/// ```
pub fn parse(text: &str) -> Result<PressureReading, ParseError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_suffix(RESPONSE_TERMINATOR)
        .unwrap_or(trimmed)
        .trim();
    if body.is_empty() {
        return Err(ParseError::Empty);
    }

    let captures = READING_PATTERN
        .captures(body)
        .ok_or_else(|| ParseError::NoNumber(body.to_string()))?;
    let number = &captures[1];
    let value: f64 = number
        .parse()
        .map_err(|_| ParseError::InvalidNumber(number.to_string()))?;
    if !value.is_finite() {
        return Err(ParseError::InvalidNumber(number.to_string()));
    }

    let unit_raw = captures.get(2).map(|m| m.as_str().to_string());
    let (pressure_torr, was_converted) = match unit_raw.as_deref().and_then(PressureUnit::from_token) {
        Some(PressureUnit::Torr) => (value, false),
        Some(unit) => (value * unit.to_torr_factor(), true),
        None => (value, false),
    };

    Ok(PressureReading {
        pressure_torr,
        unit_raw,
        raw_line: text.to_string(),
        was_converted,
    })
}

/// Non-failing variant of [`parse`].
///
/// Returns `(ok, reading, error)`; on failure the reading is
/// [`PressureReading::default`] with `raw_line` set to the input.
pub fn try_parse(text: &str) -> (bool, PressureReading, Option<String>) {
    match parse(text) {
        Ok(reading) => (true, reading, None),
        Err(e) => (
            false,
            PressureReading {
                raw_line: text.to_string(),
                ..Default::default()
            },
            Some(e.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mbar_is_converted() {
        let reading = parse("7.0E+02 mbar >").unwrap();
        assert!((reading.pressure_torr - 525.0434).abs() < 0.001);
        assert_eq!(reading.unit_raw.as_deref(), Some("mbar"));
        assert!(reading.was_converted);
        assert_eq!(reading.raw_line, "7.0E+02 mbar >");
    }

    #[test]
    fn test_bare_number_is_torr() {
        let reading = parse("0.001>").unwrap();
        assert_eq!(reading.pressure_torr, 0.001);
        assert_eq!(reading.unit_raw, None);
        assert!(!reading.was_converted);
    }

    #[test]
    fn test_unknown_unit_is_preserved() {
        let reading = parse("1.0 unknownunit>").unwrap();
        assert_eq!(reading.pressure_torr, 1.0);
        assert_eq!(reading.unit_raw.as_deref(), Some("unknownunit"));
        assert!(!reading.was_converted);
    }

    #[test]
    fn test_torr_any_case_is_not_converted() {
        for text in ["7.6E+02 Torr>", "7.6E+02 TORR", "  7.6e2torr  >  "] {
            let reading = parse(text).unwrap();
            assert_eq!(reading.pressure_torr, 760.0, "{text}");
            assert!(!reading.was_converted, "{text}");
        }
    }

    #[test]
    fn test_padding_and_signs() {
        assert_eq!(parse("  +1.5e-3   PA  >").unwrap().pressure_torr, 1.5e-3 * 0.00750062);
        assert_eq!(parse("-2").unwrap().pressure_torr, -2.0);
        assert_eq!(parse(".5 atm").unwrap().pressure_torr, 380.0);
        assert_eq!(parse("\r\n3.\r\n>").unwrap().pressure_torr, 3.0);
    }

    #[test]
    fn test_failures() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse(" > "), Err(ParseError::Empty));
        assert!(matches!(parse("Torr>"), Err(ParseError::NoNumber(_))));
        assert!(matches!(parse("ERR 12>"), Err(ParseError::NoNumber(_))));
        assert!(matches!(parse("1e999 Torr"), Err(ParseError::InvalidNumber(_))));
    }

    #[test]
    fn test_try_parse_failure() {
        let (ok, reading, error) = try_parse("garbage");
        assert!(!ok);
        assert!(error.is_some());
        assert_eq!(reading.pressure_torr, 0.0);
        assert_eq!(reading.unit_raw, None);
    }

    #[test]
    fn test_try_parse_success() {
        let (ok, reading, error) = try_parse("2.5 kPa>");
        assert!(ok);
        assert!(error.is_none());
        assert!((reading.pressure_torr - 2.5 * 7.50062).abs() < 1e-9);
    }

    const UNITS: &[(&str, f64)] = &[
        ("Torr", 1.0),
        ("mTorr", 0.001),
        ("mbar", 0.750062),
        ("Pa", 0.00750062),
        ("hPa", 0.750062),
        ("kPa", 7.50062),
        ("atm", 760.0),
        ("bar", 750.062),
        ("PSI", 51.7149),
    ];

    proptest! {
        #[test]
        fn prop_known_units_apply_factor(
            value in 1e-9f64..1e6,
            index in 0..UNITS.len(),
            pad in "[ ]{0,3}",
        ) {
            let (unit, factor) = UNITS[index];
            let text = format!("{pad}{value:e}{pad}{unit}{pad}>");
            let reading = parse(&text).unwrap();
            prop_assert!((reading.pressure_torr - value * factor).abs() <= 1e-9 * (value * factor).abs());
            prop_assert_eq!(reading.was_converted, !unit.eq_ignore_ascii_case("torr"));
            prop_assert_eq!(reading.unit_raw.as_deref(), Some(unit));
        }

        #[test]
        fn prop_bare_numbers_are_unmodified(value in -1e6f64..1e6) {
            let text = format!("{value}>");
            let reading = parse(&text).unwrap();
            prop_assert_eq!(reading.pressure_torr, value);
            prop_assert!(!reading.was_converted);
        }
    }
}
