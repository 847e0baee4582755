//! CertificateSigned handler (security extension)
//!
//! The central system delivers the CSR's signed chain. It is verified
//! against the station key and common name before being written; a bad
//! chain raises an `InvalidChargePointCertificate` security event.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::drivers::CertificateVerificationResult;
use crate::support::errors::CallErrorCode;
use crate::support::security::{
    CertificateSignedRequest, CertificateSignedResponse, CertificateSignedStatus, SecurityEvent,
};

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: CertificateSignedRequest = parse_payload(payload)?;

    info!(chain_len = req.certificate_chain.len(), "CertificateSigned");

    let max_size = dispatcher
        .device_model
        .raw(crate::device_model::KnownKey::CertificateSignedMaxChainSize)
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(10000);
    if req.certificate_chain.len() > max_size {
        let response = CertificateSignedResponse {
            status: CertificateSignedStatus::Rejected,
        };
        return Ok(serde_json::to_value(&response).unwrap_or_default());
    }

    let verification = dispatcher
        .cert_store
        .verify_chargepoint_cert(&req.certificate_chain)
        .await;

    let status = match verification {
        CertificateVerificationResult::Valid => {
            match dispatcher.cert_store.write_client_cert(&req.certificate_chain).await {
                Ok(()) => CertificateSignedStatus::Accepted,
                Err(e) => {
                    warn!(error = e.as_str(), "Failed to store signed certificate");
                    CertificateSignedStatus::Rejected
                }
            }
        }
        other => {
            warn!(?other, "Signed certificate rejected");
            dispatcher.security_event(SecurityEvent::InvalidChargePointCertificate, None);
            CertificateSignedStatus::Rejected
        }
    };

    let response = CertificateSignedResponse { status };
    Ok(serde_json::to_value(&response).unwrap_or_default())
}
