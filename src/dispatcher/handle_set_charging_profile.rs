//! SetChargingProfile handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::types::ChargingProfileStatus;
use serde_json::Value;
use tracing::info;

use crate::smart_charging::handler::ProfileError;
use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: SetChargingProfileRequest = parse_payload(payload)?;

    info!(
        connector_id = req.connector_id,
        profile_id = req.cs_charging_profiles.charging_profile_id,
        purpose = ?req.cs_charging_profiles.charging_profile_purpose,
        "SetChargingProfile"
    );

    let active_transaction = dispatcher
        .transactions
        .active_transaction_id(req.connector_id);

    let status = match dispatcher
        .smart_charging
        .add_profile(req.connector_id, req.cs_charging_profiles, active_transaction)
        .await
    {
        Ok(()) => ChargingProfileStatus::Accepted,
        Err(ProfileError::UnsupportedRateUnit) | Err(ProfileError::TooManyPeriods) => {
            ChargingProfileStatus::NotSupported
        }
        Err(_) => ChargingProfileStatus::Rejected,
    };

    let response = SetChargingProfileResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
