//! Charging profile expansion
//!
//! A profile plus a query window expands into zero or more concrete time
//! slices. Anchors depend on the profile kind: Absolute uses the
//! schedule's `startSchedule`, Relative the running session's start (or
//! `now` outside a session), Recurring the most recent daily/weekly
//! occurrence at or before `now` plus every following occurrence inside
//! the window. Slices are clipped to `[validFrom, validTo]`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_ocpp::v1_6::types::{
    ChargingProfile, ChargingProfileKindType, ChargingRateUnitType, RecurrencyKindType,
};

/// A profile schedule period made concrete in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodEntry {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: f32,
    pub number_phases: Option<i32>,
    pub stack_level: i32,
    pub charging_rate_unit: ChargingRateUnitType,
    pub min_charging_rate: Option<f32>,
}

fn recurrence_period(profile: &ChargingProfile) -> Duration {
    match profile.recurrency_kind {
        Some(RecurrencyKindType::Weekly) => Duration::days(7),
        _ => Duration::days(1),
    }
}

/// Anchor times for a profile within `[now, end]`.
///
/// Absolute and Relative profiles have exactly one anchor. Recurring
/// profiles anchor at the occurrence at or before `now` and every later
/// occurrence up to `end`.
pub fn calculate_start(
    now: DateTime<Utc>,
    end: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
    profile: &ChargingProfile,
) -> Vec<DateTime<Utc>> {
    match profile.charging_profile_kind {
        ChargingProfileKindType::Absolute => profile
            .charging_schedule
            .start_schedule
            .map(|s| vec![s])
            .unwrap_or_default(),

        ChargingProfileKindType::Relative => vec![session_start.unwrap_or(now)],

        ChargingProfileKindType::Recurring => {
            let schedule_start = match profile.charging_schedule.start_schedule {
                Some(s) => s,
                None => return Vec::new(),
            };
            let period = recurrence_period(profile);
            let period_secs = period.num_seconds();

            // most recent occurrence at or before `now`
            let elapsed = (now - schedule_start).num_seconds();
            let steps = elapsed.div_euclid(period_secs);
            let mut anchor = schedule_start + Duration::seconds(steps * period_secs);

            let mut anchors = vec![anchor];
            loop {
                anchor = anchor + period;
                if anchor > end {
                    break;
                }
                anchors.push(anchor);
            }
            anchors
        }
    }
}

/// Expand one schedule period (by index) into concrete entries.
pub fn calculate_profile_entry(
    now: DateTime<Utc>,
    end: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
    profile: &ChargingProfile,
    period_index: usize,
) -> Vec<PeriodEntry> {
    let schedule = &profile.charging_schedule;
    let periods = &schedule.charging_schedule_period;
    let period = match periods.get(period_index) {
        Some(p) => p,
        None => return Vec::new(),
    };

    let is_recurring = profile.charging_profile_kind == ChargingProfileKindType::Recurring;
    let mut entries = Vec::new();

    for anchor in calculate_start(now, end, session_start, profile) {
        let entry_start = anchor + Duration::seconds(period.start_period as i64);

        // the slice runs to the next period, the schedule duration, the
        // next recurrence, or the end of validity
        let entry_end = if let Some(next) = periods.get(period_index + 1) {
            anchor + Duration::seconds(next.start_period as i64)
        } else if let Some(duration) = schedule.duration {
            anchor + Duration::seconds(duration as i64)
        } else if is_recurring {
            anchor + recurrence_period(profile)
        } else if let Some(valid_to) = profile.valid_to {
            valid_to
        } else {
            end
        };

        // clip to the validity window
        let clipped_start = match profile.valid_from {
            Some(valid_from) if valid_from > entry_start => valid_from,
            _ => entry_start,
        };
        let clipped_end = match profile.valid_to {
            Some(valid_to) if valid_to < entry_end => valid_to,
            _ => entry_end,
        };

        if clipped_start >= clipped_end || clipped_end <= now || clipped_start >= end {
            continue;
        }

        entries.push(PeriodEntry {
            start: clipped_start,
            end: clipped_end,
            limit: period.limit.to_f32().unwrap_or_default(),
            number_phases: period.number_phases,
            stack_level: profile.stack_level as i32,
            charging_rate_unit: schedule.charging_rate_unit.clone(),
            min_charging_rate: schedule
                .min_charging_rate
                .and_then(|rate| rate.to_f32()),
        });
    }

    entries
}

/// Expand a whole profile into chronologically sorted entries.
pub fn calculate_profile(
    now: DateTime<Utc>,
    end: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
    profile: &ChargingProfile,
) -> Vec<PeriodEntry> {
    let mut entries = Vec::new();
    for index in 0..profile.charging_schedule.charging_schedule_period.len() {
        entries.extend(calculate_profile_entry(now, end, session_start, profile, index));
    }
    entries.sort_by_key(|e| e.start);
    entries
}
