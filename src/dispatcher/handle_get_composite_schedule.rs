//! GetCompositeSchedule handler
//!
//! Connector 0 reports the station-wide maximum only; real connectors
//! combine all three profile tiers. The reply's schedule is the computed
//! composite stripped to the plain wire shape.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
use rust_decimal::Decimal;
use rust_ocpp::v1_6::types::{
    ChargingRateUnitType, ChargingSchedule, ChargingSchedulePeriod, GetCompositeScheduleStatus,
};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: GetCompositeScheduleRequest = parse_payload(payload)?;

    info!(
        connector_id = req.connector_id,
        duration = req.duration,
        unit = ?req.charging_rate_unit,
        "GetCompositeSchedule"
    );

    let connectors = dispatcher.device_model.number_of_connectors();
    if req.connector_id < 0 || req.connector_id > connectors || req.duration <= 0 {
        let response = GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Rejected,
            connector_id: None,
            schedule_start: None,
            charging_schedule: None,
        };
        return Ok(serde_json::to_value(&response).unwrap_or_default());
    }

    let unit = req
        .charging_rate_unit
        .unwrap_or(ChargingRateUnitType::A);
    let now = Utc::now();
    let end = now + Duration::seconds(req.duration as i64);

    let schedule = dispatcher.smart_charging.calculate_enhanced_composite_schedule(
        now,
        end,
        req.connector_id,
        unit.clone(),
        None,
    );

    let charging_schedule = ChargingSchedule {
        duration: schedule.duration,
        start_schedule: schedule.start_schedule,
        charging_rate_unit: schedule.charging_rate_unit,
        charging_schedule_period: schedule
            .charging_schedule_period
            .iter()
            .map(|p| ChargingSchedulePeriod {
                start_period: p.start_period,
                limit: Decimal::from_f32_retain(p.limit).unwrap_or_default(),
                number_phases: p.number_phases,
            })
            .collect(),
        min_charging_rate: schedule
            .min_charging_rate
            .and_then(Decimal::from_f32_retain),
    };

    let response = GetCompositeScheduleResponse {
        status: GetCompositeScheduleStatus::Accepted,
        connector_id: Some(req.connector_id),
        schedule_start: Some(now),
        charging_schedule: Some(charging_schedule),
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
