//! ChangeAvailability handler
//!
//! A connector with a running transaction answers `Scheduled`; the change
//! applies when the transaction's StopTransactionResponse arrives.
//! Connector 0 fans out to every connector.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::types::AvailabilityType;
use serde_json::Value;
use tracing::info;

use crate::connector::Availability;
use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: ChangeAvailabilityRequest = parse_payload(payload)?;

    info!(connector_id = req.connector_id, kind = ?req.kind, "ChangeAvailability");

    let availability = match req.kind {
        AvailabilityType::Operative => Availability::Operative,
        AvailabilityType::Inoperative => Availability::Inoperative,
    };

    let status = dispatcher
        .transactions
        .change_availability(req.connector_id as i32, availability)
        .await;

    let response = ChangeAvailabilityResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
