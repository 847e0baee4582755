//! RemoteStartTransaction handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: RemoteStartTransactionRequest = parse_payload(payload)?;

    info!(id_tag = req.id_tag.as_str(), connector_id = ?req.connector_id, "RemoteStartTransaction");

    let status = dispatcher.transactions.remote_start_transaction(
        req.connector_id.map(|c| c as i32),
        &req.id_tag,
        req.charging_profile,
    );

    let response = RemoteStartTransactionResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
