//! Persisted-state interface
//!
//! Everything the charge point must remember across reboots goes through
//! this trait: the device-model snapshot, the authorization cache, the local
//! authorization list, per-connector availability and the installed
//! charging profiles (ChargePointMaxProfile and TxDefaultProfile tiers;
//! TxProfile is transient by design).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::{ChargingProfile, IdTagInfo};

use crate::support::errors::StorageError;

/// An authorization cached from a previous online exchange.
#[derive(Debug, Clone)]
pub struct CachedAuthorization {
    pub info: IdTagInfo,
    pub cached_at: DateTime<Utc>,
}

/// One `SendLocalList` entry. `info: None` deletes the tag on a
/// differential update.
#[derive(Debug, Clone)]
pub struct LocalListEntry {
    pub id_tag: String,
    pub info: Option<IdTagInfo>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // ── Device model snapshot ──────────────────────────────

    async fn save_config_value(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn load_config(&self) -> Result<HashMap<String, String>, StorageError>;

    // ── Authorization cache ────────────────────────────────

    async fn cache_authorization(&self, id_tag: &str, info: &IdTagInfo)
        -> Result<(), StorageError>;
    async fn cached_authorization(
        &self,
        id_tag: &str,
    ) -> Result<Option<CachedAuthorization>, StorageError>;
    async fn invalidate_cached_authorization(&self, id_tag: &str) -> Result<(), StorageError>;
    async fn clear_authorization_cache(&self) -> Result<(), StorageError>;

    // ── Local authorization list ───────────────────────────

    async fn local_list_version(&self) -> Result<i32, StorageError>;
    async fn apply_local_list(
        &self,
        version: i32,
        entries: &[LocalListEntry],
        full_update: bool,
    ) -> Result<(), StorageError>;
    async fn local_list_entry(&self, id_tag: &str) -> Result<Option<IdTagInfo>, StorageError>;
    async fn local_list_size(&self) -> Result<usize, StorageError>;

    // ── Connector availability ─────────────────────────────

    async fn save_availability(&self, connector_id: i32, operative: bool)
        -> Result<(), StorageError>;
    async fn load_availability(&self) -> Result<HashMap<i32, bool>, StorageError>;

    // ── Charging profiles ──────────────────────────────────

    async fn save_charging_profile(
        &self,
        connector_id: i32,
        profile: &ChargingProfile,
    ) -> Result<(), StorageError>;
    async fn delete_charging_profile(&self, profile_id: i32) -> Result<(), StorageError>;
    async fn load_charging_profiles(&self) -> Result<Vec<(i32, ChargingProfile)>, StorageError>;
}
