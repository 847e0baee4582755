//! In-memory storage
//!
//! Backs tests and stations running without a database file. Same contract
//! as the SQLite implementation, nothing survives a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::types::{ChargingProfile, IdTagInfo};

use crate::support::errors::StorageError;

use super::traits::{CachedAuthorization, LocalListEntry, Storage};

#[derive(Default)]
struct Inner {
    config: HashMap<String, String>,
    auth_cache: HashMap<String, CachedAuthorization>,
    local_list: HashMap<String, IdTagInfo>,
    local_list_version: i32,
    availability: HashMap<i32, bool>,
    profiles: Vec<(i32, ChargingProfile)>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_config_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn load_config(&self) -> Result<HashMap<String, String>, StorageError> {
        Ok(self.inner.lock().unwrap().config.clone())
    }

    async fn cache_authorization(
        &self,
        id_tag: &str,
        info: &IdTagInfo,
    ) -> Result<(), StorageError> {
        self.inner.lock().unwrap().auth_cache.insert(
            id_tag.to_string(),
            CachedAuthorization {
                info: info.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn cached_authorization(
        &self,
        id_tag: &str,
    ) -> Result<Option<CachedAuthorization>, StorageError> {
        Ok(self.inner.lock().unwrap().auth_cache.get(id_tag).cloned())
    }

    async fn invalidate_cached_authorization(&self, id_tag: &str) -> Result<(), StorageError> {
        self.inner.lock().unwrap().auth_cache.remove(id_tag);
        Ok(())
    }

    async fn clear_authorization_cache(&self) -> Result<(), StorageError> {
        self.inner.lock().unwrap().auth_cache.clear();
        Ok(())
    }

    async fn local_list_version(&self) -> Result<i32, StorageError> {
        Ok(self.inner.lock().unwrap().local_list_version)
    }

    async fn apply_local_list(
        &self,
        version: i32,
        entries: &[LocalListEntry],
        full_update: bool,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if full_update {
            inner.local_list.clear();
        }
        for entry in entries {
            match &entry.info {
                Some(info) => {
                    inner.local_list.insert(entry.id_tag.clone(), info.clone());
                }
                None => {
                    inner.local_list.remove(&entry.id_tag);
                }
            }
        }
        inner.local_list_version = version;
        Ok(())
    }

    async fn local_list_entry(&self, id_tag: &str) -> Result<Option<IdTagInfo>, StorageError> {
        Ok(self.inner.lock().unwrap().local_list.get(id_tag).cloned())
    }

    async fn local_list_size(&self) -> Result<usize, StorageError> {
        Ok(self.inner.lock().unwrap().local_list.len())
    }

    async fn save_availability(
        &self,
        connector_id: i32,
        operative: bool,
    ) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .availability
            .insert(connector_id, operative);
        Ok(())
    }

    async fn load_availability(&self) -> Result<HashMap<i32, bool>, StorageError> {
        Ok(self.inner.lock().unwrap().availability.clone())
    }

    async fn save_charging_profile(
        &self,
        connector_id: i32,
        profile: &ChargingProfile,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .profiles
            .retain(|(_, p)| p.charging_profile_id != profile.charging_profile_id);
        inner.profiles.push((connector_id, profile.clone()));
        Ok(())
    }

    async fn delete_charging_profile(&self, profile_id: i32) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .profiles
            .retain(|(_, p)| p.charging_profile_id != profile_id);
        Ok(())
    }

    async fn load_charging_profiles(
        &self,
    ) -> Result<Vec<(i32, ChargingProfile)>, StorageError> {
        Ok(self.inner.lock().unwrap().profiles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ocpp::v1_6::types::AuthorizationStatus;

    fn accepted() -> IdTagInfo {
        IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }
    }

    #[tokio::test]
    async fn auth_cache_roundtrip() {
        let storage = MemoryStorage::new();
        storage.cache_authorization("TAG1", &accepted()).await.unwrap();
        let hit = storage.cached_authorization("TAG1").await.unwrap().unwrap();
        assert_eq!(hit.info.status, AuthorizationStatus::Accepted);

        storage.invalidate_cached_authorization("TAG1").await.unwrap();
        assert!(storage.cached_authorization("TAG1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_list_differential_update() {
        let storage = MemoryStorage::new();
        let entries = vec![
            LocalListEntry { id_tag: "A".into(), info: Some(accepted()) },
            LocalListEntry { id_tag: "B".into(), info: Some(accepted()) },
        ];
        storage.apply_local_list(1, &entries, true).await.unwrap();
        assert_eq!(storage.local_list_size().await.unwrap(), 2);

        // differential: delete A
        let delta = vec![LocalListEntry { id_tag: "A".into(), info: None }];
        storage.apply_local_list(2, &delta, false).await.unwrap();
        assert_eq!(storage.local_list_version().await.unwrap(), 2);
        assert!(storage.local_list_entry("A").await.unwrap().is_none());
        assert!(storage.local_list_entry("B").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn profile_save_replaces_same_id() {
        use rust_ocpp::v1_6::types::*;
        let storage = MemoryStorage::new();
        let profile = ChargingProfile {
            charging_profile_id: 5,
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurposeType::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKindType::Relative,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: None,
                start_schedule: None,
                charging_rate_unit: ChargingRateUnitType::A,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: rust_decimal::Decimal::from_f32_retain(16.0).unwrap(),
                    number_phases: None,
                }],
                min_charging_rate: None,
            },
        };
        storage.save_charging_profile(1, &profile).await.unwrap();
        storage.save_charging_profile(2, &profile).await.unwrap();
        let loaded = storage.load_charging_profiles().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, 2);
    }
}
