//! GetDiagnostics handler
//!
//! The upload runs on a worker task; progress is pushed as
//! `DiagnosticsStatusNotification` messages.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rust_ocpp::v1_6::messages::diagnostics_status_notification::DiagnosticsStatusNotificationRequest;
use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
use rust_ocpp::v1_6::types::DiagnosticsStatus;
use serde_json::Value;
use tracing::{info, warn};

use crate::queue::QueueKind;
use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

fn push_status(dispatcher: &Arc<Dispatcher>, status: DiagnosticsStatus) {
    *dispatcher.last_diagnostics_status.lock().unwrap() = status.clone();
    let request = DiagnosticsStatusNotificationRequest { status };
    dispatcher.queue.enqueue(
        "DiagnosticsStatusNotification",
        serde_json::to_value(&request).unwrap_or_default(),
        QueueKind::Normal,
    );
}

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: GetDiagnosticsRequest = parse_payload(payload)?;

    info!(location = req.location.as_str(), "GetDiagnostics");

    let worker = dispatcher.clone();
    tokio::spawn(async move {
        push_status(&worker, DiagnosticsStatus::Uploading);
        let interrupt = Arc::new(AtomicBool::new(false));
        match worker
            .file_agent
            .upload_diagnostics(&req.location, req.start_time, req.stop_time, interrupt)
            .await
        {
            Ok(file_name) => {
                info!(file_name = file_name.as_str(), "Diagnostics uploaded");
                push_status(&worker, DiagnosticsStatus::Uploaded);
            }
            Err(e) => {
                warn!(error = e.as_str(), "Diagnostics upload failed");
                push_status(&worker, DiagnosticsStatus::UploadFailed);
            }
        }
    });

    let response = GetDiagnosticsResponse { file_name: None };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
