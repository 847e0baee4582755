//! ClearChargingProfile handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v1_6::types::ClearChargingProfileStatus;
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: ClearChargingProfileRequest = parse_payload(payload)?;

    info!(id = ?req.id, connector_id = ?req.connector_id, "ClearChargingProfile");

    let cleared = dispatcher
        .smart_charging
        .clear_profiles(
            req.id,
            req.connector_id,
            req.charging_profile_purpose,
            req.stack_level,
        )
        .await;

    let status = if cleared {
        ClearChargingProfileStatus::Accepted
    } else {
        ClearChargingProfileStatus::Unknown
    };

    let response = ClearChargingProfileResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
