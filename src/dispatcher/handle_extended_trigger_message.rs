//! ExtendedTriggerMessage handler (security extension)
//!
//! Adds SignChargePointCertificate and LogStatusNotification to the
//! plain TriggerMessage set.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::queue::QueueKind;
use crate::support::errors::CallErrorCode;
use crate::support::security::{
    ExtendedTriggerMessageRequest, ExtendedTriggerMessageResponse, LogStatusNotificationRequest,
    MessageTriggerExt, SignCertificateRequest, TriggerMessageStatusExt, UploadLogStatus,
};

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: ExtendedTriggerMessageRequest = parse_payload(payload)?;

    info!(requested = ?req.requested_message, "ExtendedTriggerMessage");

    let status = match req.requested_message {
        MessageTriggerExt::BootNotification => {
            let boot = dispatcher.boot.clone();
            tokio::spawn(async move {
                let _ = boot.boot().await;
            });
            TriggerMessageStatusExt::Accepted
        }
        MessageTriggerExt::Heartbeat => {
            dispatcher.queue.enqueue("Heartbeat", json!({}), QueueKind::Normal);
            TriggerMessageStatusExt::Accepted
        }
        MessageTriggerExt::StatusNotification => {
            dispatcher.transactions.send_all_status_notifications();
            TriggerMessageStatusExt::Accepted
        }
        MessageTriggerExt::MeterValues => {
            for id in 1..=dispatcher.device_model.number_of_connectors() {
                dispatcher.transactions.sample_on_trigger(id);
            }
            TriggerMessageStatusExt::Accepted
        }
        MessageTriggerExt::LogStatusNotification => {
            let uploading = dispatcher.log_upload.lock().unwrap().is_some();
            let request = LogStatusNotificationRequest {
                status: if uploading {
                    UploadLogStatus::Uploading
                } else {
                    UploadLogStatus::Idle
                },
                request_id: None,
            };
            dispatcher.queue.enqueue(
                "LogStatusNotification",
                serde_json::to_value(&request).unwrap_or_default(),
                QueueKind::Normal,
            );
            TriggerMessageStatusExt::Accepted
        }
        MessageTriggerExt::SignChargePointCertificate => {
            let cert_store = dispatcher.cert_store.clone();
            let device_model = dispatcher.device_model.clone();
            let queue = dispatcher.queue.clone();
            tokio::spawn(async move {
                let common_name = device_model
                    .raw(crate::device_model::KnownKey::SeccLeafSubjectCommonName)
                    .or_else(|| device_model.charge_point_id())
                    .unwrap_or_default();
                let organization = device_model
                    .raw(crate::device_model::KnownKey::SeccLeafSubjectOrganization)
                    .unwrap_or_default();
                let country = device_model
                    .raw(crate::device_model::KnownKey::SeccLeafSubjectCountry)
                    .unwrap_or_else(|| "DE".to_string());
                if let Ok(csr) = cert_store
                    .generate_csr(&country, "", "", &organization, &common_name)
                    .await
                {
                    let request = SignCertificateRequest { csr };
                    queue.enqueue(
                        "SignCertificate",
                        serde_json::to_value(&request).unwrap_or_default(),
                        QueueKind::Normal,
                    );
                }
            });
            TriggerMessageStatusExt::Accepted
        }
        MessageTriggerExt::FirmwareStatusNotification => {
            let status = dispatcher.last_firmware_status.lock().unwrap().clone();
            let request =
                rust_ocpp::v1_6::messages::firmware_status_notification::FirmwareStatusNotificationRequest {
                    status,
                };
            dispatcher.queue.enqueue(
                "FirmwareStatusNotification",
                serde_json::to_value(&request).unwrap_or_default(),
                QueueKind::Normal,
            );
            TriggerMessageStatusExt::Accepted
        }
    };

    let response = ExtendedTriggerMessageResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
