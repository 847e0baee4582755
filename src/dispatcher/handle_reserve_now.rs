//! ReserveNow handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::reserve_now::{ReserveNowRequest, ReserveNowResponse};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: ReserveNowRequest = parse_payload(payload)?;

    info!(
        connector_id = req.connector_id,
        reservation_id = req.reservation_id,
        id_tag = req.id_tag.as_str(),
        "ReserveNow"
    );

    let status = dispatcher.transactions.reserve_now(
        req.connector_id as i32,
        req.expiry_date,
        &req.id_tag,
        req.parent_id_tag,
        req.reservation_id,
    );

    let response = ReserveNowResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
