//! InstallCertificate handler (security extension)

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::drivers::InstallRootResult;
use crate::support::errors::CallErrorCode;
use crate::support::security::{
    InstallCertificateRequest, InstallCertificateResponse, InstallCertificateStatus, SecurityEvent,
};

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: InstallCertificateRequest = parse_payload(payload)?;

    info!(certificate_type = ?req.certificate_type, "InstallCertificate");

    let status = match dispatcher
        .cert_store
        .install_root(req.certificate_type, &req.certificate)
        .await
    {
        InstallRootResult::Ok | InstallRootResult::Valid => InstallCertificateStatus::Accepted,
        InstallRootResult::WriteError => InstallCertificateStatus::Failed,
        other => {
            warn!(?other, "Root certificate rejected");
            dispatcher.security_event(SecurityEvent::InvalidCentralSystemCertificate, None);
            InstallCertificateStatus::Rejected
        }
    };

    let response = InstallCertificateResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
