use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CalibrationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Humidity,
    Light,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Humidity, SensorKind::Light];

    pub fn channel(self) -> u8 {
        match self {
            SensorKind::Humidity => 2,
            SensorKind::Light => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Humidity => "humidity",
            SensorKind::Light => "light",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Humidity => "%",
            SensorKind::Light => "LM%",
        }
    }

    pub fn storage_prefix(self) -> &'static str {
        match self {
            SensorKind::Humidity => "hum",
            SensorKind::Light => "light",
        }
    }

    pub fn to_percentage(self, raw: u16, calibration: &CalibrationConfig) -> f32 {
        match self {
            SensorKind::Humidity => {
                inverse_percentage(raw, calibration.humidity_wet, calibration.humidity_dry)
            }
            SensorKind::Light => {
                inverse_percentage(raw, calibration.light_dark, calibration.light_bright)
            }
        }
    }

    pub fn format_value(self, value: f32) -> String {
        match self {
            SensorKind::Humidity => format!("{:.1}", (value * 10.0).round() / 10.0),
            SensorKind::Light => format!("{:.2}", (value * 100.0).round() / 100.0),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear interpolation where `full` maps to 100 % and `empty` to 0 %,
/// clamped on both ends. Both probes read lower raw values for "more".
fn inverse_percentage(raw: u16, full: u16, empty: u16) -> f32 {
    if raw <= full {
        return 100.0;
    }
    if raw >= empty {
        return 0.0;
    }
    let span = f32::from(empty - full);
    let pct = 100.0 - f32::from(raw - full) * 100.0 / span;
    pct.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub raw_sample: u16,
    pub physical_value: f32,
    pub converted_value: f32,
    pub captured_at: Instant,
    pub valid: bool,
}

impl SensorReading {
    pub fn new(kind: SensorKind, raw_sample: u16, millivolts: f32, calibration: &CalibrationConfig) -> Self {
        Self {
            kind,
            raw_sample,
            physical_value: millivolts,
            converted_value: kind.to_percentage(raw_sample, calibration),
            captured_at: Instant::now(),
            valid: true,
        }
    }
}
