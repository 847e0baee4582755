//! Composite schedule computation
//!
//! Combines the expanded period entries of the three purpose tiers into a
//! single gap-free schedule over the query window. TxProfile beats
//! TxDefaultProfile, uncovered stretches fall back to the configured
//! default limits, and ChargePointMaxProfile clamps whatever the lower
//! tiers produce instead of replacing it. Values are emitted in the
//! requested unit; a converted limit is marked `periodTransformed`.

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::ChargingRateUnitType;

use super::profile::PeriodEntry;
use super::{CompositeDefaults, EnhancedChargingSchedule, EnhancedChargingSchedulePeriod};

/// The entry governing instant `t` within one tier: highest stack level
/// wins, ties go to the latest-installed entry.
fn resolve_tier<'a>(entries: &'a [PeriodEntry], t: DateTime<Utc>) -> Option<&'a PeriodEntry> {
    let mut winner: Option<&PeriodEntry> = None;
    for entry in entries {
        if entry.start <= t && t < entry.end {
            match winner {
                Some(current) if current.stack_level > entry.stack_level => {}
                _ => winner = Some(entry),
            }
        }
    }
    winner
}

fn convert(
    limit: f32,
    from: &ChargingRateUnitType,
    to: &ChargingRateUnitType,
    phases: i32,
    voltage: f32,
) -> f32 {
    match (from, to) {
        (ChargingRateUnitType::A, ChargingRateUnitType::W) => limit * phases as f32 * voltage,
        (ChargingRateUnitType::W, ChargingRateUnitType::A) => limit / (phases as f32 * voltage),
        _ => limit,
    }
}

/// Compute the composite schedule over `[start, end]`.
///
/// `cpm`, `tx_default` and `tx` are the expanded entries of the
/// ChargePointMaxProfile, TxDefaultProfile and TxProfile tiers.
pub fn calculate_composite_schedule(
    cpm: &[PeriodEntry],
    tx_default: &[PeriodEntry],
    tx: &[PeriodEntry],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    unit: ChargingRateUnitType,
    defaults: &CompositeDefaults,
) -> EnhancedChargingSchedule {
    // every instant where any tier's winner can change
    let mut boundaries: Vec<DateTime<Utc>> = vec![start];
    for entry in cpm.iter().chain(tx_default).chain(tx) {
        for t in [entry.start, entry.end] {
            if t > start && t < end {
                boundaries.push(t);
            }
        }
    }
    boundaries.sort();
    boundaries.dedup();

    let default_limit = match unit {
        ChargingRateUnitType::A => defaults.limit_amps,
        ChargingRateUnitType::W => defaults.limit_watts,
    };

    let mut periods: Vec<EnhancedChargingSchedulePeriod> = Vec::new();

    for t in boundaries {
        let lower = resolve_tier(tx, t).or_else(|| resolve_tier(tx_default, t));
        let clamp = resolve_tier(cpm, t);

        // phase count used for W<->A conversion: the governing lower-tier
        // entry's, else the clamp's, else the configured default
        let declared_phases = match lower {
            Some(entry) => entry.number_phases.or_else(|| clamp.and_then(|c| c.number_phases)),
            None => clamp.and_then(|c| c.number_phases),
        };
        let phases = declared_phases.unwrap_or(defaults.number_phases);

        let (mut limit, mut stack_level, mut transformed) = match lower {
            Some(entry) => (
                convert(entry.limit, &entry.charging_rate_unit, &unit, phases, defaults.supply_voltage),
                entry.stack_level,
                entry.charging_rate_unit != unit,
            ),
            None => (default_limit, 0, false),
        };

        // when the clamp is in play the emitted phase count is the one the
        // comparison ran at; otherwise the governing entry's own
        let number_phases = if clamp.is_some() {
            declared_phases
        } else {
            lower.and_then(|e| e.number_phases)
        };

        // the station-wide maximum acts as an upper clamp, not a tier
        if let Some(clamp_entry) = clamp {
            let clamp_limit = convert(
                clamp_entry.limit,
                &clamp_entry.charging_rate_unit,
                &unit,
                phases,
                defaults.supply_voltage,
            );
            if clamp_limit < limit {
                limit = clamp_limit;
                stack_level = clamp_entry.stack_level;
                transformed = clamp_entry.charging_rate_unit != unit;
            }
        }

        let start_period = (t - start).num_seconds() as i32;

        // coalesce equal consecutive periods
        if let Some(previous) = periods.last() {
            if previous.limit == limit
                && previous.number_phases == number_phases
                && previous.stack_level == stack_level
                && previous.period_transformed == transformed
            {
                continue;
            }
        }

        periods.push(EnhancedChargingSchedulePeriod {
            start_period,
            limit,
            number_phases,
            stack_level,
            period_transformed: transformed,
        });
    }

    EnhancedChargingSchedule {
        charging_rate_unit: unit,
        charging_schedule_period: periods,
        duration: Some((end - start).num_seconds() as i32),
        start_schedule: Some(start),
        min_charging_rate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart_charging::profile::calculate_profile;
    use chrono::Duration;
    use rust_ocpp::v1_6::types::{
        ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType, ChargingSchedule,
        ChargingSchedulePeriod, RecurrencyKindType,
    };

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn period(start_period: i32, limit: f32, number_phases: Option<i32>) -> ChargingSchedulePeriod {
        ChargingSchedulePeriod {
            start_period,
            limit: rust_decimal::Decimal::from_f32_retain(limit).unwrap(),
            number_phases,
        }
    }

    /// Station-wide maximum: 200 s absolute schedule in amps.
    fn combined_cpm() -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: 1,
            transaction_id: None,
            stack_level: 2,
            charging_profile_purpose: ChargingProfilePurposeType::ChargePointMaxProfile,
            charging_profile_kind: ChargingProfileKindType::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: Some(200),
                start_schedule: Some(ts("2024-01-01T13:00:00Z")),
                charging_rate_unit: ChargingRateUnitType::A,
                charging_schedule_period: vec![
                    period(0, 10.0, None),
                    period(80, 20.0, Some(1)),
                    period(100, 20.0, Some(3)),
                ],
                min_charging_rate: None,
            },
        }
    }

    /// Transaction default: 300 s absolute schedule in watts.
    fn combined_tx_default() -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: 11,
            transaction_id: None,
            stack_level: 12,
            charging_profile_purpose: ChargingProfilePurposeType::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKindType::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: Some(300),
                start_schedule: Some(ts("2024-01-01T13:00:00Z")),
                charging_rate_unit: ChargingRateUnitType::W,
                charging_schedule_period: vec![
                    period(0, 11000.0, Some(3)),
                    period(60, 6900.0, Some(1)),
                    period(120, 5520.0, None),
                    period(180, 17250.0, None),
                    period(260, 5520.0, None),
                ],
                min_charging_rate: None,
            },
        }
    }

    fn assert_period(
        p: &EnhancedChargingSchedulePeriod,
        start: i32,
        limit: f32,
        phases: Option<i32>,
        stack: i32,
        transformed: bool,
    ) {
        assert_eq!(p.start_period, start);
        assert_eq!(p.limit, limit);
        assert_eq!(p.number_phases, phases);
        assert_eq!(p.stack_level, stack);
        assert_eq!(p.period_transformed, transformed);
    }

    #[test]
    fn two_absolute_profiles_with_station_clamp_in_watts() {
        let start = ts("2024-01-01T13:00:00Z");
        let end = start + Duration::seconds(400);
        let cpm = calculate_profile(start, end, None, &combined_cpm());
        let txd = calculate_profile(start, end, None, &combined_tx_default());

        let schedule = calculate_composite_schedule(
            &cpm,
            &txd,
            &[],
            start,
            end,
            ChargingRateUnitType::W,
            &CompositeDefaults::default(),
        );

        assert_eq!(schedule.charging_rate_unit, ChargingRateUnitType::W);
        assert_eq!(schedule.duration, Some(400));
        assert_eq!(schedule.start_schedule, Some(start));
        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 8);
        // 10 A x 3 x 230 V clamps the 11 kW default
        assert_period(&p[0], 0, 6900.0, Some(3), 2, true);
        assert_period(&p[1], 60, 2300.0, Some(1), 2, true);
        assert_period(&p[2], 80, 4600.0, Some(1), 2, true);
        assert_period(&p[3], 120, 5520.0, Some(3), 12, false);
        assert_period(&p[4], 180, 13800.0, Some(3), 2, true);
        assert_period(&p[5], 200, 17250.0, None, 12, false);
        assert_period(&p[6], 260, 5520.0, None, 12, false);
        assert_period(&p[7], 300, 33120.0, None, 0, false);
    }

    #[test]
    fn two_absolute_profiles_with_station_clamp_in_amps() {
        let start = ts("2024-01-01T13:00:00Z");
        let end = start + Duration::seconds(400);
        let cpm = calculate_profile(start, end, None, &combined_cpm());
        let txd = calculate_profile(start, end, None, &combined_tx_default());

        let schedule = calculate_composite_schedule(
            &cpm,
            &txd,
            &[],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 8);
        assert_period(&p[0], 0, 10.0, Some(3), 2, false);
        assert_period(&p[1], 60, 10.0, Some(1), 2, false);
        assert_period(&p[2], 80, 20.0, Some(1), 2, false);
        assert_period(&p[3], 120, 8.0, Some(3), 12, true);
        assert_period(&p[4], 180, 20.0, Some(3), 2, false);
        assert_period(&p[5], 200, 25.0, None, 12, true);
        assert_period(&p[6], 260, 8.0, None, 12, true);
        assert_period(&p[7], 300, 48.0, None, 0, false);
    }

    fn daily_recurring() -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: 301,
            transaction_id: None,
            stack_level: 5,
            charging_profile_purpose: ChargingProfilePurposeType::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKindType::Recurring,
            recurrency_kind: Some(RecurrencyKindType::Daily),
            valid_from: Some(ts("2024-01-01T12:00:00Z")),
            valid_to: Some(ts("2024-01-05T12:00:00Z")),
            charging_schedule: ChargingSchedule {
                duration: None,
                start_schedule: Some(ts("2024-01-01T08:00:00Z")),
                charging_rate_unit: ChargingRateUnitType::A,
                charging_schedule_period: vec![period(0, 32.0, None), period(36000, 7.0, None)],
                min_charging_rate: None,
            },
        }
    }

    #[test]
    fn recurring_profile_not_yet_valid_is_all_defaults() {
        let start = ts("2024-01-01T07:55:00Z");
        let end = ts("2024-01-01T08:05:00Z");
        let txd = calculate_profile(start, end, Some(ts("2024-01-01T07:00:00Z")), &daily_recurring());

        let schedule = calculate_composite_schedule(
            &[],
            &txd,
            &[],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        assert_eq!(schedule.duration, Some(600));
        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 1);
        assert_period(&p[0], 0, 48.0, None, 0, false);
    }

    #[test]
    fn recurring_profile_becomes_valid_inside_window() {
        let start = ts("2024-01-01T11:55:00Z");
        let end = ts("2024-01-01T12:05:00Z");
        let txd = calculate_profile(start, end, Some(ts("2024-01-01T07:00:00Z")), &daily_recurring());

        let schedule = calculate_composite_schedule(
            &[],
            &txd,
            &[],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 2);
        assert_period(&p[0], 0, 48.0, None, 0, false);
        assert_period(&p[1], 300, 32.0, None, 5, false);
    }

    #[test]
    fn recurring_profile_during_validity() {
        let start = ts("2024-01-01T15:00:00Z");
        let end = ts("2024-01-01T15:10:00Z");
        let txd = calculate_profile(start, end, Some(ts("2024-01-01T07:00:00Z")), &daily_recurring());

        let schedule = calculate_composite_schedule(
            &[],
            &txd,
            &[],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 1);
        assert_period(&p[0], 0, 32.0, None, 5, false);
    }

    #[test]
    fn higher_stack_level_wins_within_tier() {
        let start = ts("2024-01-01T10:00:00Z");
        let end = start + Duration::seconds(600);
        let low = PeriodEntry {
            start,
            end,
            limit: 10.0,
            number_phases: None,
            stack_level: 1,
            charging_rate_unit: ChargingRateUnitType::A,
            min_charging_rate: None,
        };
        let high = PeriodEntry {
            start: start + Duration::seconds(120),
            end: start + Duration::seconds(300),
            limit: 20.0,
            number_phases: None,
            stack_level: 4,
            charging_rate_unit: ChargingRateUnitType::A,
            min_charging_rate: None,
        };

        let schedule = calculate_composite_schedule(
            &[],
            &[low, high],
            &[],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 3);
        assert_period(&p[0], 0, 10.0, None, 1, false);
        assert_period(&p[1], 120, 20.0, None, 4, false);
        assert_period(&p[2], 300, 10.0, None, 1, false);
    }

    #[test]
    fn tx_profile_beats_tx_default() {
        let start = ts("2024-01-01T10:00:00Z");
        let end = start + Duration::seconds(300);
        let txd = PeriodEntry {
            start,
            end,
            limit: 32.0,
            number_phases: None,
            stack_level: 0,
            charging_rate_unit: ChargingRateUnitType::A,
            min_charging_rate: None,
        };
        let tx = PeriodEntry {
            start,
            end: start + Duration::seconds(120),
            limit: 6.0,
            number_phases: None,
            stack_level: 0,
            charging_rate_unit: ChargingRateUnitType::A,
            min_charging_rate: None,
        };

        let schedule = calculate_composite_schedule(
            &[],
            &[txd],
            &[tx],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        let p = &schedule.charging_schedule_period;
        assert_eq!(p.len(), 2);
        assert_period(&p[0], 0, 6.0, None, 0, false);
        assert_period(&p[1], 120, 32.0, None, 0, false);
    }

    #[test]
    fn no_gaps_over_query_window() {
        // a profile covering only the middle of the window still yields a
        // schedule whose first period starts at zero
        let start = ts("2024-01-01T10:00:00Z");
        let end = start + Duration::seconds(900);
        let middle = PeriodEntry {
            start: start + Duration::seconds(300),
            end: start + Duration::seconds(600),
            limit: 16.0,
            number_phases: None,
            stack_level: 3,
            charging_rate_unit: ChargingRateUnitType::A,
            min_charging_rate: None,
        };

        let schedule = calculate_composite_schedule(
            &[],
            &[middle],
            &[],
            start,
            end,
            ChargingRateUnitType::A,
            &CompositeDefaults::default(),
        );

        let p = &schedule.charging_schedule_period;
        assert_eq!(p[0].start_period, 0);
        assert_eq!(p.len(), 3);
        assert_period(&p[1], 300, 16.0, None, 3, false);
        assert_period(&p[2], 600, 48.0, None, 0, false);
    }
}
