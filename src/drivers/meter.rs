//! Power meter reading bundle
//!
//! The meter hardware pushes one bundle per connector at its own cadence;
//! sampling picks fields out of the latest bundle per configured
//! measurand and phase.

/// One quantity with per-phase breakdown. Absent fields are simply not
/// provided by the meter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub total: Option<f64>,
    pub l1: Option<f64>,
    pub l2: Option<f64>,
    pub l3: Option<f64>,
}

impl Measurement {
    pub fn total(value: f64) -> Self {
        Self {
            total: Some(value),
            ..Default::default()
        }
    }
}

/// A complete reading pushed by the meter.
#[derive(Debug, Clone, Default)]
pub struct PowerMeterReading {
    /// Unix timestamp (seconds) of the reading.
    pub timestamp: i64,
    pub energy_wh_import: Measurement,
    pub energy_wh_export: Measurement,
    pub power_w: Measurement,
    pub voltage_v: Measurement,
    pub current_a: Measurement,
    pub frequency_hz: Measurement,
    /// State of charge in percent, for vehicles that report it.
    pub soc_percent: Option<f64>,
}

impl PowerMeterReading {
    /// Shorthand for a bundle carrying only an imported-energy register.
    pub fn energy(timestamp: i64, energy_wh: f64) -> Self {
        Self {
            timestamp,
            energy_wh_import: Measurement::total(energy_wh),
            ..Default::default()
        }
    }
}
