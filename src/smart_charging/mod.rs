//! Smart charging
//!
//! Turns the installed charging profiles (three purpose tiers, stacked by
//! priority) into one instantaneous limit curve. `profile` expands a single
//! profile into concrete time slices, `composite` merges slices across
//! tiers into a gap-free schedule, `handler` owns profile storage,
//! validation and the `GetCompositeSchedule` entry point.

pub mod composite;
pub mod handler;
pub mod profile;

pub use handler::SmartChargingHandler;
pub use profile::{calculate_profile, calculate_profile_entry, calculate_start, PeriodEntry};

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::ChargingRateUnitType;
use serde::{Deserialize, Serialize};

/// One period of a computed composite schedule.
///
/// Extends the plain OCPP `ChargingSchedulePeriod` with the stack level the
/// value came from and whether the limit was converted between W and A on
/// the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedChargingSchedulePeriod {
    pub start_period: i32,
    pub limit: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
    pub stack_level: i32,
    pub period_transformed: bool,
}

/// A computed composite schedule over a query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedChargingSchedule {
    pub charging_rate_unit: ChargingRateUnitType,
    pub charging_schedule_period: Vec<EnhancedChargingSchedulePeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f32>,
}

/// Station-wide defaults applied where no profile governs and used for
/// W/A conversion.
#[derive(Debug, Clone, Copy)]
pub struct CompositeDefaults {
    pub limit_amps: f32,
    pub limit_watts: f32,
    pub number_phases: i32,
    pub supply_voltage: f32,
}

impl Default for CompositeDefaults {
    fn default() -> Self {
        Self {
            limit_amps: 48.0,
            limit_watts: 33120.0,
            number_phases: 3,
            supply_voltage: 230.0,
        }
    }
}
