//! ChangeConfiguration handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::types::ConfigurationStatus;
use serde_json::Value;
use tracing::info;

use crate::device_model::SetResult;
use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: ChangeConfigurationRequest = parse_payload(payload)?;

    info!(key = req.key.as_str(), "ChangeConfiguration");

    let status = match dispatcher.device_model.set(&req.key, &req.value).await {
        SetResult::Accepted => ConfigurationStatus::Accepted,
        SetResult::Rejected => ConfigurationStatus::Rejected,
        SetResult::RebootRequired => ConfigurationStatus::RebootRequired,
        SetResult::NotSupported => ConfigurationStatus::NotSupported,
    };

    let response = ChangeConfigurationResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
