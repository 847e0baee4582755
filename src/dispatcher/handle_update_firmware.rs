//! UpdateFirmware / SignedUpdateFirmware handlers
//!
//! Download and install run on a worker; each stage pushes
//! `FirmwareStatusNotification` (plain) or
//! `SignedFirmwareStatusNotification` (security extension). The signed
//! variant verifies the signing certificate first and rejects with
//! `InvalidCertificate` when it does not chain to the manufacturer root.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::firmware_status_notification::FirmwareStatusNotificationRequest;
use rust_ocpp::v1_6::messages::update_firmware::{UpdateFirmwareRequest, UpdateFirmwareResponse};
use rust_ocpp::v1_6::types::FirmwareStatus;
use serde_json::Value;
use tracing::{info, warn};

use crate::queue::QueueKind;
use crate::support::errors::CallErrorCode;
use crate::support::security::{
    SecurityEvent, SignedFirmwareStatus, SignedFirmwareStatusNotificationRequest,
    SignedUpdateFirmwareRequest, SignedUpdateFirmwareResponse, UpdateFirmwareStatus,
};

use super::{parse_payload, Dispatcher};

fn push_status(dispatcher: &Arc<Dispatcher>, status: FirmwareStatus) {
    *dispatcher.last_firmware_status.lock().unwrap() = status.clone();
    let request = FirmwareStatusNotificationRequest { status };
    dispatcher.queue.enqueue(
        "FirmwareStatusNotification",
        serde_json::to_value(&request).unwrap_or_default(),
        QueueKind::Normal,
    );
}

fn push_signed_status(dispatcher: &Arc<Dispatcher>, status: SignedFirmwareStatus, request_id: i32) {
    let request = SignedFirmwareStatusNotificationRequest {
        status,
        request_id: Some(request_id),
    };
    dispatcher.queue.enqueue(
        "SignedFirmwareStatusNotification",
        serde_json::to_value(&request).unwrap_or_default(),
        QueueKind::Normal,
    );
}

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: UpdateFirmwareRequest = parse_payload(payload)?;

    info!(location = req.location.as_str(), retrieve_date = %req.retrieve_date, "UpdateFirmware");

    let worker = dispatcher.clone();
    tokio::spawn(async move {
        let wait = (req.retrieve_date - chrono::Utc::now()).num_seconds();
        if wait > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(wait as u64)).await;
        }

        push_status(&worker, FirmwareStatus::Downloading);
        let path = match worker.file_agent.download_firmware(&req.location).await {
            Ok(path) => {
                push_status(&worker, FirmwareStatus::Downloaded);
                path
            }
            Err(e) => {
                warn!(error = e.as_str(), "Firmware download failed");
                push_status(&worker, FirmwareStatus::DownloadFailed);
                return;
            }
        };

        push_status(&worker, FirmwareStatus::Installing);
        match worker.file_agent.install_firmware(&path).await {
            Ok(()) => push_status(&worker, FirmwareStatus::Installed),
            Err(e) => {
                warn!(error = e.as_str(), "Firmware install failed");
                push_status(&worker, FirmwareStatus::InstallationFailed);
            }
        }
    });

    let response = UpdateFirmwareResponse {};
    Ok(serde_json::to_value(&response).unwrap_or_default())
}

pub async fn handle_signed(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: SignedUpdateFirmwareRequest = parse_payload(payload)?;

    info!(
        request_id = req.request_id,
        location = req.firmware.location.as_str(),
        "SignedUpdateFirmware"
    );

    if !dispatcher
        .cert_store
        .verify_firmware_signing_cert(&req.firmware.signing_certificate)
        .await
    {
        dispatcher.security_event(
            SecurityEvent::InvalidFirmwareSigningCertificate,
            Some(format!("requestId {}", req.request_id)),
        );
        let response = SignedUpdateFirmwareResponse {
            status: UpdateFirmwareStatus::InvalidCertificate,
        };
        return Ok(serde_json::to_value(&response).unwrap_or_default());
    }

    let worker = dispatcher.clone();
    tokio::spawn(async move {
        let request_id = req.request_id;
        push_signed_status(&worker, SignedFirmwareStatus::Downloading, request_id);
        let path = match worker
            .file_agent
            .download_firmware(&req.firmware.location)
            .await
        {
            Ok(path) => {
                push_signed_status(&worker, SignedFirmwareStatus::Downloaded, request_id);
                path
            }
            Err(e) => {
                warn!(error = e.as_str(), "Signed firmware download failed");
                push_signed_status(&worker, SignedFirmwareStatus::DownloadFailed, request_id);
                return;
            }
        };

        push_signed_status(&worker, SignedFirmwareStatus::SignatureVerified, request_id);
        push_signed_status(&worker, SignedFirmwareStatus::Installing, request_id);
        match worker.file_agent.install_firmware(&path).await {
            Ok(()) => push_signed_status(&worker, SignedFirmwareStatus::Installed, request_id),
            Err(e) => {
                warn!(error = e.as_str(), "Signed firmware install failed");
                push_signed_status(&worker, SignedFirmwareStatus::InstallationFailed, request_id);
            }
        }
    });

    let response = SignedUpdateFirmwareResponse {
        status: UpdateFirmwareStatus::Accepted,
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
