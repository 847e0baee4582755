//! Reset handler
//!
//! Both flavors are accepted. Running transactions are stopped first with
//! reason `HardReset` or `SoftReset`, then the runtime is told to
//! terminate (hard) or drain and restart the stack (soft).

use std::sync::Arc;

use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::types::{Reason, ResetRequestStatus, ResetResponseStatus};
use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher, RuntimeCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Hard,
    Soft,
}

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: ResetRequest = parse_payload(payload)?;

    info!(kind = ?req.kind, "Reset");

    let (reason, kind) = match req.kind {
        ResetRequestStatus::Hard => (Reason::HardReset, ResetKind::Hard),
        ResetRequestStatus::Soft => (Reason::SoftReset, ResetKind::Soft),
    };

    let transactions = dispatcher.transactions.clone();
    let commands = dispatcher.commands.clone();
    tokio::spawn(async move {
        transactions.stop_all_transactions(reason).await;
        let _ = commands.send(RuntimeCommand::Reset(kind));
    });

    let response = ResetResponse {
        status: ResetResponseStatus::Accepted,
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
