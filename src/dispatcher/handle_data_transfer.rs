//! DataTransfer handler
//!
//! No vendor extensions are implemented; every transfer answers
//! `UnknownVendorId` inside a successful response envelope.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::types::DataTransferStatus;
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    _dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: DataTransferRequest = parse_payload(payload)?;

    info!(vendor_id = req.vendor_string.as_str(), message_id = ?req.message_id, "DataTransfer");

    let response = DataTransferResponse {
        status: DataTransferStatus::UnknownVendorId,
        data: None,
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
