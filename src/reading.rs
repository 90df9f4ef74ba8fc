//! Timestamped gauge readings.

use crate::pressure::PressureReading;
use bitflags::bitflags;
use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Condition flags attached to a reading.
    ///
    /// The empty set means the reading is good; `OK` is provided as a
    /// readable alias for it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReadingStatus: u8 {
        const UNDER_RANGE = 0b0001;
        const OVER_RANGE = 0b0010;
        const SENSOR_ERROR = 0b0100;
        const COMMUNICATION_ERROR = 0b1000;
    }
}

impl ReadingStatus {
    /// Alias for the empty flag set.
    pub const OK: Self = Self::empty();

    /// True when no condition flag is set.
    pub fn is_ok(self) -> bool {
        self.is_empty()
    }

    /// Classify a Torr value against an optional `(min, max)` range.
    pub fn classify(pressure_torr: f64, range: Option<(f64, f64)>) -> Self {
        let mut status = Self::OK;
        if pressure_torr <= 0.0 {
            status |= Self::SENSOR_ERROR;
        }
        if let Some((min, max)) = range {
            if pressure_torr < min {
                status |= Self::UNDER_RANGE;
            }
            if pressure_torr > max {
                status |= Self::OVER_RANGE;
            }
        }
        status
    }
}

impl Default for ReadingStatus {
    fn default() -> Self {
        Self::OK
    }
}

/// A parsed pressure value attributed to a device at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub device_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub pressure: PressureReading,
    pub status: ReadingStatus,
}

impl GaugeReading {
    /// Stamp `pressure` with the current local time.
    pub fn now(device_id: impl Into<String>, pressure: PressureReading, status: ReadingStatus) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Local::now().fixed_offset(),
            pressure,
            status,
        }
    }

    /// Pressure in Torr.
    pub fn pressure_torr(&self) -> f64 {
        self.pressure.pressure_torr
    }

    /// RFC 3339 timestamp with microseconds and the local offset.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_without_range() {
        assert!(ReadingStatus::classify(760.0, None).is_ok());
        assert_eq!(ReadingStatus::classify(0.0, None), ReadingStatus::SENSOR_ERROR);
    }

    #[test]
    fn test_classify_with_range() {
        let range = Some((1e-4, 1000.0));
        assert!(ReadingStatus::classify(1.0, range).is_ok());
        assert_eq!(ReadingStatus::classify(1e-6, range), ReadingStatus::UNDER_RANGE);
        assert_eq!(ReadingStatus::classify(1500.0, range), ReadingStatus::OVER_RANGE);
        assert_eq!(
            ReadingStatus::classify(-1.0, range),
            ReadingStatus::SENSOR_ERROR | ReadingStatus::UNDER_RANGE
        );
    }

    #[test]
    fn test_timestamp_round_trips() {
        let reading = GaugeReading::now("g1", PressureReading::default(), ReadingStatus::OK);
        let iso = reading.timestamp_iso();
        let parsed = DateTime::parse_from_rfc3339(&iso).unwrap();
        assert_eq!(parsed.timestamp_micros(), reading.timestamp.timestamp_micros());
        assert!(iso.contains('.'));
    }
}
