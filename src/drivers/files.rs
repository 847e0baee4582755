//! Diagnostics / log / firmware file mover interface

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::support::security::LogParameters;

/// Moves files between the station and remote locations. Implementations
/// run on worker tasks; upload operations poll `interrupt` and abort when
/// it flips to `true` (a newer request supersedes the running one).
#[async_trait]
pub trait FileAgent: Send + Sync {
    /// Upload a diagnostics archive. Returns the uploaded file name.
    async fn upload_diagnostics(
        &self,
        location: &str,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
        interrupt: Arc<AtomicBool>,
    ) -> Result<String, String>;

    /// Upload the security or diagnostics log. Returns the uploaded file
    /// name.
    async fn upload_logs(
        &self,
        parameters: &LogParameters,
        request_id: i32,
        interrupt: Arc<AtomicBool>,
    ) -> Result<String, String>;

    /// Download a firmware image to local storage.
    async fn download_firmware(&self, location: &str) -> Result<String, String>;

    /// Install a previously downloaded firmware image.
    async fn install_firmware(&self, path: &str) -> Result<(), String>;
}
