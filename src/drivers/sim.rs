//! Simulated drivers
//!
//! Used by the demo binary and the test suite. `SimEvse` records every
//! command so tests can assert on the power-path side effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::support::security::{CertificateHashData, CertificateUse, LogParameters};

use super::certs::{CertStore, CertificateVerificationResult, DeleteRootResult, InstallRootResult};
use super::evse::EvseDriver;
use super::files::FileAgent;

/// Commands the simulated EVSE has received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EvseCommand {
    Enable(i32),
    Disable(i32),
    Pause(i32),
    Resume(i32),
    Cancel(i32, String),
    Unlock(i32),
    SetMaxCurrent(i32, f32),
}

#[derive(Default)]
pub struct SimEvse {
    commands: Mutex<Vec<EvseCommand>>,
    /// Unlock outcome returned to the core; flip for failure tests.
    pub unlock_succeeds: AtomicBool,
}

impl SimEvse {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            unlock_succeeds: AtomicBool::new(true),
        }
    }

    pub fn commands(&self) -> Vec<EvseCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: EvseCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

#[async_trait]
impl EvseDriver for SimEvse {
    async fn enable(&self, connector_id: i32) {
        self.record(EvseCommand::Enable(connector_id));
    }

    async fn disable(&self, connector_id: i32) {
        self.record(EvseCommand::Disable(connector_id));
    }

    async fn pause_charging(&self, connector_id: i32) {
        self.record(EvseCommand::Pause(connector_id));
    }

    async fn resume_charging(&self, connector_id: i32) {
        self.record(EvseCommand::Resume(connector_id));
    }

    async fn cancel_charging(&self, connector_id: i32, reason: &str) {
        self.record(EvseCommand::Cancel(connector_id, reason.to_string()));
    }

    async fn unlock_connector(&self, connector_id: i32) -> bool {
        self.record(EvseCommand::Unlock(connector_id));
        self.unlock_succeeds.load(Ordering::SeqCst)
    }

    async fn set_max_current(&self, connector_id: i32, amps: f32) -> bool {
        self.record(EvseCommand::SetMaxCurrent(connector_id, amps));
        true
    }
}

/// Certificate store that accepts everything; `valid_in` reports a year.
#[derive(Default)]
pub struct SimCertStore;

#[async_trait]
impl CertStore for SimCertStore {
    async fn generate_csr(
        &self,
        country: &str,
        _state: &str,
        _city: &str,
        organization: &str,
        common_name: &str,
    ) -> Result<String, String> {
        Ok(format!(
            "-----BEGIN CERTIFICATE REQUEST-----\nC={}/O={}/CN={}\n-----END CERTIFICATE REQUEST-----",
            country, organization, common_name
        ))
    }

    async fn install_root(&self, _cert_use: CertificateUse, pem: &str) -> InstallRootResult {
        if pem.contains("BEGIN CERTIFICATE") {
            InstallRootResult::Ok
        } else {
            InstallRootResult::InvalidFormat
        }
    }

    async fn delete_root(
        &self,
        _hash: &CertificateHashData,
        _security_profile: i32,
    ) -> DeleteRootResult {
        DeleteRootResult::Accepted
    }

    async fn get_root_hashes(&self, _cert_use: CertificateUse) -> Vec<CertificateHashData> {
        Vec::new()
    }

    async fn verify_chargepoint_cert(&self, chain_pem: &str) -> CertificateVerificationResult {
        if chain_pem.contains("BEGIN CERTIFICATE") {
            CertificateVerificationResult::Valid
        } else {
            CertificateVerificationResult::InvalidChain
        }
    }

    async fn verify_firmware_signing_cert(&self, pem: &str) -> bool {
        pem.contains("BEGIN CERTIFICATE")
    }

    async fn valid_in(&self, _chain_pem: &str) -> i64 {
        365 * 24 * 3600
    }

    async fn write_client_cert(&self, _chain_pem: &str) -> Result<(), String> {
        Ok(())
    }

    async fn client_identity(&self) -> Option<(String, String)> {
        None
    }
}

/// File agent that "transfers" instantly unless interrupted.
#[derive(Default)]
pub struct SimFileAgent;

#[async_trait]
impl FileAgent for SimFileAgent {
    async fn upload_diagnostics(
        &self,
        _location: &str,
        _start_time: Option<DateTime<Utc>>,
        _stop_time: Option<DateTime<Utc>>,
        interrupt: Arc<AtomicBool>,
    ) -> Result<String, String> {
        if interrupt.load(Ordering::SeqCst) {
            return Err("interrupted".to_string());
        }
        Ok("diagnostics.tar.gz".to_string())
    }

    async fn upload_logs(
        &self,
        _parameters: &LogParameters,
        request_id: i32,
        interrupt: Arc<AtomicBool>,
    ) -> Result<String, String> {
        if interrupt.load(Ordering::SeqCst) {
            return Err("interrupted".to_string());
        }
        Ok(format!("log-{}.tar.gz", request_id))
    }

    async fn download_firmware(&self, location: &str) -> Result<String, String> {
        Ok(format!("/tmp/firmware-{}.bin", location.len()))
    }

    async fn install_firmware(&self, _path: &str) -> Result<(), String> {
        Ok(())
    }
}
