//! GetConfiguration handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: GetConfigurationRequest = parse_payload(payload)?;

    // requests beyond GetConfigurationMaxKeys are truncated
    let max_keys = dispatcher.device_model.get_configuration_max_keys();
    let requested = req.key.map(|mut keys| {
        keys.truncate(max_keys);
        keys
    });

    info!(requested = ?requested.as_ref().map(Vec::len), "GetConfiguration");

    let (configuration_key, unknown_key) = dispatcher
        .device_model
        .get_all_for_report(requested.as_deref());

    let response = GetConfigurationResponse {
        configuration_key: Some(configuration_key),
        unknown_key: if unknown_key.is_empty() {
            None
        } else {
            Some(unknown_key)
        },
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
