//! Meter value sampling
//!
//! Builds OCPP `MeterValue` bundles from the latest power-meter reading,
//! selecting measurands (and per-phase values) from the configured
//! comma-separated lists.

use chrono::{DateTime, TimeZone, Utc};
use rust_ocpp::v1_6::types::{
    Location, Measurand, MeterValue, Phase, ReadingContext, SampledValue, UnitOfMeasure,
};

use crate::drivers::{Measurement, PowerMeterReading};

/// Map a configured measurand name to the wire enum.
pub fn parse_measurand(name: &str) -> Option<Measurand> {
    match name {
        "Current.Export" => Some(Measurand::CurrentExport),
        "Current.Import" => Some(Measurand::CurrentImport),
        "Current.Offered" => Some(Measurand::CurrentOffered),
        "Energy.Active.Export.Register" => Some(Measurand::EnergyActiveExportRegister),
        "Energy.Active.Import.Register" => Some(Measurand::EnergyActiveImportRegister),
        "Energy.Reactive.Export.Register" => Some(Measurand::EnergyReactiveExportRegister),
        "Energy.Reactive.Import.Register" => Some(Measurand::EnergyReactiveImportRegister),
        "Energy.Active.Export.Interval" => Some(Measurand::EnergyActiveExportInterval),
        "Energy.Active.Import.Interval" => Some(Measurand::EnergyActiveImportInterval),
        "Energy.Reactive.Export.Interval" => Some(Measurand::EnergyReactiveExportInterval),
        "Energy.Reactive.Import.Interval" => Some(Measurand::EnergyReactiveImportInterval),
        "Frequency" => Some(Measurand::Frequency),
        "Power.Active.Export" => Some(Measurand::PowerActiveExport),
        "Power.Active.Import" => Some(Measurand::PowerActiveImport),
        "Power.Factor" => Some(Measurand::PowerFactor),
        "Power.Offered" => Some(Measurand::PowerOffered),
        "Power.Reactive.Export" => Some(Measurand::PowerReactiveExport),
        "Power.Reactive.Import" => Some(Measurand::PowerReactiveImport),
        "RPM" => Some(Measurand::Rpm),
        "SoC" => Some(Measurand::SoC),
        "Temperature" => Some(Measurand::Temperature),
        "Voltage" => Some(Measurand::Voltage),
        _ => None,
    }
}

fn measurement_for<'a>(
    reading: &'a PowerMeterReading,
    measurand: &Measurand,
) -> Option<(&'a Measurement, Option<UnitOfMeasure>)> {
    match measurand {
        Measurand::EnergyActiveImportRegister => {
            Some((&reading.energy_wh_import, Some(UnitOfMeasure::Wh)))
        }
        Measurand::EnergyActiveExportRegister => {
            Some((&reading.energy_wh_export, Some(UnitOfMeasure::Wh)))
        }
        Measurand::PowerActiveImport => Some((&reading.power_w, Some(UnitOfMeasure::W))),
        Measurand::Voltage => Some((&reading.voltage_v, Some(UnitOfMeasure::V))),
        Measurand::CurrentImport => Some((&reading.current_a, Some(UnitOfMeasure::A))),
        // no Hz unit exists in OCPP 1.6; the measurand implies it
        Measurand::Frequency => Some((&reading.frequency_hz, None)),
        _ => None,
    }
}

fn sampled(
    value: f64,
    measurand: &Measurand,
    phase: Option<Phase>,
    unit: Option<UnitOfMeasure>,
    context: &ReadingContext,
) -> SampledValue {
    SampledValue {
        value: value.to_string(),
        context: Some(context.clone()),
        format: None,
        measurand: Some(measurand.clone()),
        phase,
        location: Some(Location::Outlet),
        unit,
    }
}

/// Build one `MeterValue` from the latest reading, restricted to the
/// configured measurand names.
pub fn build_meter_value(
    reading: &PowerMeterReading,
    configured: &[String],
    context: ReadingContext,
) -> MeterValue {
    let timestamp: DateTime<Utc> = Utc
        .timestamp_opt(reading.timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);

    let mut sampled_value = Vec::new();
    for name in configured {
        let measurand = match parse_measurand(name) {
            Some(m) => m,
            None => continue,
        };

        if measurand == Measurand::SoC {
            if let Some(soc) = reading.soc_percent {
                sampled_value.push(sampled(
                    soc,
                    &measurand,
                    None,
                    Some(UnitOfMeasure::Percent),
                    &context,
                ));
            }
            continue;
        }

        let (measurement, unit) = match measurement_for(reading, &measurand) {
            Some(pair) => pair,
            None => continue,
        };

        if let Some(total) = measurement.total {
            sampled_value.push(sampled(total, &measurand, None, unit.clone(), &context));
        }
        for (value, phase) in [
            (measurement.l1, Phase::L1),
            (measurement.l2, Phase::L2),
            (measurement.l3, Phase::L3),
        ] {
            if let Some(value) = value {
                sampled_value.push(sampled(value, &measurand, Some(phase), unit.clone(), &context));
            }
        }
    }

    MeterValue {
        timestamp,
        sampled_value,
    }
}

/// Seconds until the next multiple of `interval_s` past UTC midnight.
pub fn seconds_to_next_clock_aligned(now: DateTime<Utc>, interval_s: i64) -> i64 {
    if interval_s <= 0 {
        return i64::MAX;
    }
    let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let since_midnight = (now - midnight).num_seconds();
    interval_s - (since_midnight % interval_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_configured_measurands() {
        let reading = PowerMeterReading {
            timestamp: 1704067200, // 2024-01-01T00:00:00Z
            energy_wh_import: Measurement::total(1500.0),
            power_w: Measurement {
                total: Some(7360.0),
                l1: Some(2453.0),
                l2: Some(2453.0),
                l3: Some(2454.0),
            },
            ..Default::default()
        };

        let configured = vec!["Energy.Active.Import.Register".to_string()];
        let mv = build_meter_value(&reading, &configured, ReadingContext::SamplePeriodic);
        assert_eq!(mv.sampled_value.len(), 1);
        assert_eq!(mv.sampled_value[0].value, "1500");
        assert_eq!(
            mv.sampled_value[0].measurand,
            Some(Measurand::EnergyActiveImportRegister)
        );
        assert_eq!(mv.sampled_value[0].unit, Some(UnitOfMeasure::Wh));
        assert_eq!(mv.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn per_phase_values_get_phase_markers() {
        let reading = PowerMeterReading {
            timestamp: 1704067200,
            power_w: Measurement {
                total: Some(7360.0),
                l1: Some(2453.0),
                l2: Some(2453.0),
                l3: Some(2454.0),
            },
            ..Default::default()
        };
        let configured = vec!["Power.Active.Import".to_string()];
        let mv = build_meter_value(&reading, &configured, ReadingContext::SampleClock);
        assert_eq!(mv.sampled_value.len(), 4);
        assert_eq!(mv.sampled_value[0].phase, None);
        assert_eq!(mv.sampled_value[1].phase, Some(Phase::L1));
        assert_eq!(mv.sampled_value[3].phase, Some(Phase::L3));
        assert!(mv
            .sampled_value
            .iter()
            .all(|s| s.context == Some(ReadingContext::SampleClock)));
    }

    #[test]
    fn unknown_measurand_names_are_skipped() {
        let reading = PowerMeterReading::energy(1704067200, 10.0);
        let configured = vec!["Bogus".to_string(), "Energy.Active.Import.Register".to_string()];
        let mv = build_meter_value(&reading, &configured, ReadingContext::SamplePeriodic);
        assert_eq!(mv.sampled_value.len(), 1);
    }

    #[test]
    fn clock_alignment_math() {
        let now = "2024-01-01T00:14:30Z".parse().unwrap();
        assert_eq!(seconds_to_next_clock_aligned(now, 900), 30);
        let now = "2024-01-01T00:15:00Z".parse().unwrap();
        assert_eq!(seconds_to_next_clock_aligned(now, 900), 900);
    }
}
