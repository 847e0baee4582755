//! Certificate store interface
//!
//! Wraps the platform's key/certificate storage and the OpenSSL-level
//! primitives: CSR generation, root install/delete, leaf verification and
//! client-certificate handling for security profile 3.

use async_trait::async_trait;

use crate::support::security::{CertificateHashData, CertificateUse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallRootResult {
    Ok,
    Valid,
    InvalidFormat,
    InvalidCertificateChain,
    Expired,
    CertificateStoreMaxLengthExceeded,
    WriteError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRootResult {
    Accepted,
    Failed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateVerificationResult {
    Valid,
    Expired,
    InvalidSignature,
    InvalidChain,
    InvalidCommonName,
    NoCertificateAvailable,
}

#[async_trait]
pub trait CertStore: Send + Sync {
    /// Generate a CSR for the SECC leaf certificate.
    async fn generate_csr(
        &self,
        country: &str,
        state: &str,
        city: &str,
        organization: &str,
        common_name: &str,
    ) -> Result<String, String>;

    async fn install_root(&self, cert_use: CertificateUse, pem: &str) -> InstallRootResult;

    async fn delete_root(
        &self,
        hash: &CertificateHashData,
        security_profile: i32,
    ) -> DeleteRootResult;

    async fn get_root_hashes(&self, cert_use: CertificateUse) -> Vec<CertificateHashData>;

    /// Verify a freshly signed charge point certificate chain against the
    /// station's key and the configured common name.
    async fn verify_chargepoint_cert(&self, chain_pem: &str) -> CertificateVerificationResult;

    /// Verify a firmware signing certificate against the manufacturer root.
    async fn verify_firmware_signing_cert(&self, pem: &str) -> bool;

    /// Seconds until the given chain's leaf expires (negative when already
    /// expired). Drives the profile-3 reconnect-at-expiry timer.
    async fn valid_in(&self, chain_pem: &str) -> i64;

    /// Persist a verified client certificate chain.
    async fn write_client_cert(&self, chain_pem: &str) -> Result<(), String>;

    /// PEM chain + key for the mutual-TLS handshake, when one is installed.
    async fn client_identity(&self) -> Option<(String, String)>;
}
