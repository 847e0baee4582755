//! TriggerMessage handler
//!
//! The requested notification is enqueued synchronously from current
//! state before the TriggerMessage response goes out on the wire (the
//! queue serializes them in order behind it).

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::diagnostics_status_notification::DiagnosticsStatusNotificationRequest;
use rust_ocpp::v1_6::messages::firmware_status_notification::FirmwareStatusNotificationRequest;
use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::types::{MessageTrigger, TriggerMessageStatus};
use serde_json::{json, Value};
use tracing::info;

use crate::queue::QueueKind;
use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: TriggerMessageRequest = parse_payload(payload)?;

    info!(requested = ?req.requested_message, connector_id = ?req.connector_id, "TriggerMessage");

    let connector_id = req.connector_id.map(|c| c as i32);
    if let Some(id) = connector_id {
        if id < 1 || id > dispatcher.device_model.number_of_connectors() {
            let response = TriggerMessageResponse {
                status: TriggerMessageStatus::Rejected,
            };
            return Ok(serde_json::to_value(&response).unwrap_or_default());
        }
    }

    let status = match req.requested_message {
        MessageTrigger::BootNotification => {
            let boot = dispatcher.boot.clone();
            tokio::spawn(async move {
                let _ = boot.boot().await;
            });
            TriggerMessageStatus::Accepted
        }
        MessageTrigger::Heartbeat => {
            dispatcher
                .queue
                .enqueue("Heartbeat", json!({}), QueueKind::Normal);
            TriggerMessageStatus::Accepted
        }
        MessageTrigger::StatusNotification => {
            match connector_id {
                Some(_id) => {
                    // single-connector report
                    let statuses = dispatcher.transactions.statuses();
                    for (id, status, error_code) in statuses {
                        if Some(id) == connector_id {
                            let request = rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest {
                                connector_id: id as u32,
                                error_code,
                                info: None,
                                status,
                                timestamp: Some(Utc::now()),
                                vendor_error_code: None,
                                vendor_id: None,
                            };
                            dispatcher.queue.enqueue(
                                "StatusNotification",
                                serde_json::to_value(&request).unwrap_or_default(),
                                QueueKind::Normal,
                            );
                        }
                    }
                }
                None => dispatcher.transactions.send_all_status_notifications(),
            }
            TriggerMessageStatus::Accepted
        }
        MessageTrigger::MeterValues => {
            match connector_id {
                Some(id) => dispatcher.transactions.sample_on_trigger(id),
                None => {
                    for id in 1..=dispatcher.device_model.number_of_connectors() {
                        dispatcher.transactions.sample_on_trigger(id);
                    }
                }
            }
            TriggerMessageStatus::Accepted
        }
        MessageTrigger::DiagnosticsStatusNotification => {
            let status = dispatcher.last_diagnostics_status.lock().unwrap().clone();
            let request = DiagnosticsStatusNotificationRequest { status };
            dispatcher.queue.enqueue(
                "DiagnosticsStatusNotification",
                serde_json::to_value(&request).unwrap_or_default(),
                QueueKind::Normal,
            );
            TriggerMessageStatus::Accepted
        }
        MessageTrigger::FirmwareStatusNotification => {
            let status = dispatcher.last_firmware_status.lock().unwrap().clone();
            let request = FirmwareStatusNotificationRequest { status };
            dispatcher.queue.enqueue(
                "FirmwareStatusNotification",
                serde_json::to_value(&request).unwrap_or_default(),
                QueueKind::Normal,
            );
            TriggerMessageStatus::Accepted
        }
    };

    let response = TriggerMessageResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
