//! DeleteCertificate handler (security extension)

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::drivers::DeleteRootResult;
use crate::support::errors::CallErrorCode;
use crate::support::security::{
    DeleteCertificateRequest, DeleteCertificateResponse, DeleteCertificateStatus,
};

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: DeleteCertificateRequest = parse_payload(payload)?;

    info!(serial = req.certificate_hash_data.serial_number.as_str(), "DeleteCertificate");

    let profile = dispatcher.device_model.security_profile();
    let status = match dispatcher
        .cert_store
        .delete_root(&req.certificate_hash_data, profile)
        .await
    {
        DeleteRootResult::Accepted => DeleteCertificateStatus::Accepted,
        DeleteRootResult::Failed => DeleteCertificateStatus::Failed,
        DeleteRootResult::NotFound => DeleteCertificateStatus::NotFound,
    };

    let response = DeleteCertificateResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
