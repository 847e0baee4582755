//! ClearCache handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
use rust_ocpp::v1_6::types::ClearCacheStatus;
use serde_json::Value;
use tracing::{info, warn};

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let _req: ClearCacheRequest = parse_payload(payload)?;

    info!("ClearCache");

    let status = if !dispatcher.device_model.authorization_cache_enabled() {
        ClearCacheStatus::Rejected
    } else {
        match dispatcher.storage.clear_authorization_cache().await {
            Ok(()) => ClearCacheStatus::Accepted,
            Err(e) => {
                warn!(error = %e, "Failed to clear authorization cache");
                ClearCacheStatus::Rejected
            }
        }
    };

    let response = ClearCacheResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
