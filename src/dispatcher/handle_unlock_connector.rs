//! UnlockConnector handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: UnlockConnectorRequest = parse_payload(payload)?;

    info!(connector_id = req.connector_id, "UnlockConnector");

    let status = dispatcher
        .transactions
        .unlock_connector(req.connector_id as i32)
        .await;

    let response = UnlockConnectorResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
