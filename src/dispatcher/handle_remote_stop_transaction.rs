//! RemoteStopTransaction handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: RemoteStopTransactionRequest = parse_payload(payload)?;

    info!(transaction_id = req.transaction_id, "RemoteStopTransaction");

    let status = dispatcher
        .transactions
        .remote_stop_transaction(req.transaction_id)
        .await;

    let response = RemoteStopTransactionResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
