//! CancelReservation handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::cancel_reservation::{
    CancelReservationRequest, CancelReservationResponse,
};
use rust_ocpp::v1_6::types::CancelReservationStatus;
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: CancelReservationRequest = parse_payload(payload)?;

    info!(reservation_id = req.reservation_id, "CancelReservation");

    let status = if dispatcher.transactions.cancel_reservation(req.reservation_id) {
        CancelReservationStatus::Accepted
    } else {
        CancelReservationStatus::Rejected
    };

    let response = CancelReservationResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
