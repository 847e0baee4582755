//! GetLocalListVersion handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let _req: GetLocalListVersionRequest = parse_payload(payload)?;

    // -1 advertises that local list management is disabled
    let list_version = if dispatcher.device_model.local_auth_list_enabled() {
        dispatcher.storage.local_list_version().await.unwrap_or(0)
    } else {
        -1
    };

    info!(list_version, "GetLocalListVersion");

    let response = GetLocalListVersionResponse { list_version };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
