//! GetLog handler (security extension)
//!
//! One upload runs at a time. A new GetLog while one is running raises
//! the worker's interrupt flag and answers `AcceptedCanceled`; progress
//! is pushed as `LogStatusNotification`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::queue::QueueKind;
use crate::support::errors::CallErrorCode;
use crate::support::security::{
    GetLogRequest, GetLogResponse, LogStatus, LogStatusNotificationRequest, UploadLogStatus,
};

use super::{parse_payload, Dispatcher, UploadJob};

fn push_status(dispatcher: &Arc<Dispatcher>, status: UploadLogStatus, request_id: Option<i32>) {
    let request = LogStatusNotificationRequest { status, request_id };
    dispatcher.queue.enqueue(
        "LogStatusNotification",
        serde_json::to_value(&request).unwrap_or_default(),
        QueueKind::Normal,
    );
}

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: GetLogRequest = parse_payload(payload)?;

    info!(request_id = req.request_id, log_type = ?req.log_type, "GetLog");

    // signal a running upload to abort
    let superseded = {
        let mut job = dispatcher.log_upload.lock().unwrap();
        match job.take() {
            Some(running) => {
                running.interrupt.store(true, Ordering::SeqCst);
                running.handle.abort();
                true
            }
            None => false,
        }
    };

    let interrupt = Arc::new(AtomicBool::new(false));
    let worker = dispatcher.clone();
    let worker_interrupt = interrupt.clone();
    let request_id = req.request_id;
    let handle = tokio::spawn(async move {
        push_status(&worker, UploadLogStatus::Uploading, Some(request_id));
        match worker
            .file_agent
            .upload_logs(&req.log, request_id, worker_interrupt)
            .await
        {
            Ok(file_name) => {
                info!(file_name = file_name.as_str(), "Log uploaded");
                push_status(&worker, UploadLogStatus::Uploaded, Some(request_id));
            }
            Err(e) => {
                warn!(error = e.as_str(), "Log upload failed");
                push_status(&worker, UploadLogStatus::UploadFailure, Some(request_id));
            }
        }
        // clear the job entry unless a newer request already replaced it
        let mut job = worker.log_upload.lock().unwrap();
        if job.as_ref().and_then(|j| j.request_id) == Some(request_id) {
            job.take();
        }
    });

    *dispatcher.log_upload.lock().unwrap() = Some(UploadJob {
        request_id: Some(request_id),
        interrupt,
        handle,
    });

    let response = GetLogResponse {
        status: if superseded {
            LogStatus::AcceptedCanceled
        } else {
            LogStatus::Accepted
        },
        filename: None,
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
