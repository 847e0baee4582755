//! GetInstalledCertificateIds handler (security extension)

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::support::errors::CallErrorCode;
use crate::support::security::{
    GetInstalledCertificateIdsRequest, GetInstalledCertificateIdsResponse,
    GetInstalledCertificateStatus,
};

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: GetInstalledCertificateIdsRequest = parse_payload(payload)?;

    info!(certificate_type = ?req.certificate_type, "GetInstalledCertificateIds");

    let hashes = dispatcher.cert_store.get_root_hashes(req.certificate_type).await;

    let response = if hashes.is_empty() {
        GetInstalledCertificateIdsResponse {
            status: GetInstalledCertificateStatus::NotFound,
            certificate_hash_data: None,
        }
    } else {
        GetInstalledCertificateIdsResponse {
            status: GetInstalledCertificateStatus::Accepted,
            certificate_hash_data: Some(hashes),
        }
    };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
