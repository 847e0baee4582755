//! SeaORM/SQLite implementation of [`Storage`]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::types::{ChargingProfile, IdTagInfo};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use tracing::debug;

use crate::support::errors::StorageError;

use super::entities::{auth_cache, charging_profile, config_entry, connector_availability, local_list};
use super::traits::{CachedAuthorization, LocalListEntry, Storage};

/// The local-list version rides in the config table under a reserved key.
const LOCAL_LIST_VERSION_KEY: &str = "Internal.LocalAuthListVersion";

pub struct SqliteStorage {
    db: DatabaseConnection,
}

impl SqliteStorage {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn upsert_config(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let existing = config_entry::Entity::find_by_id(key).one(&self.db).await?;
        match existing {
            Some(model) => {
                let mut active: config_entry::ActiveModel = model.into();
                active.value = Set(value.to_string());
                active.update(&self.db).await?;
            }
            None => {
                config_entry::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_config_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.upsert_config(key, value).await
    }

    async fn load_config(&self) -> Result<HashMap<String, String>, StorageError> {
        let entries = config_entry::Entity::find().all(&self.db).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.key != LOCAL_LIST_VERSION_KEY)
            .map(|e| (e.key, e.value))
            .collect())
    }

    async fn cache_authorization(
        &self,
        id_tag: &str,
        info: &IdTagInfo,
    ) -> Result<(), StorageError> {
        let info_json = serde_json::to_string(info)?;
        let existing = auth_cache::Entity::find_by_id(id_tag).one(&self.db).await?;
        match existing {
            Some(model) => {
                let mut active: auth_cache::ActiveModel = model.into();
                active.info_json = Set(info_json);
                active.cached_at = Set(Utc::now());
                active.update(&self.db).await?;
            }
            None => {
                auth_cache::ActiveModel {
                    id_tag: Set(id_tag.to_string()),
                    info_json: Set(info_json),
                    cached_at: Set(Utc::now()),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn cached_authorization(
        &self,
        id_tag: &str,
    ) -> Result<Option<CachedAuthorization>, StorageError> {
        let entry = auth_cache::Entity::find_by_id(id_tag).one(&self.db).await?;
        match entry {
            Some(model) => {
                let info: IdTagInfo = serde_json::from_str(&model.info_json)?;
                Ok(Some(CachedAuthorization {
                    info,
                    cached_at: model.cached_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn invalidate_cached_authorization(&self, id_tag: &str) -> Result<(), StorageError> {
        auth_cache::Entity::delete_by_id(id_tag).exec(&self.db).await?;
        Ok(())
    }

    async fn clear_authorization_cache(&self) -> Result<(), StorageError> {
        auth_cache::Entity::delete_many().exec(&self.db).await?;
        debug!("Authorization cache cleared");
        Ok(())
    }

    async fn local_list_version(&self) -> Result<i32, StorageError> {
        let entry = config_entry::Entity::find_by_id(LOCAL_LIST_VERSION_KEY)
            .one(&self.db)
            .await?;
        Ok(entry
            .and_then(|e| e.value.parse().ok())
            .unwrap_or(0))
    }

    async fn apply_local_list(
        &self,
        version: i32,
        entries: &[LocalListEntry],
        full_update: bool,
    ) -> Result<(), StorageError> {
        if full_update {
            local_list::Entity::delete_many().exec(&self.db).await?;
        }
        for entry in entries {
            match &entry.info {
                Some(info) => {
                    let info_json = serde_json::to_string(info)?;
                    let existing = local_list::Entity::find_by_id(&entry.id_tag)
                        .one(&self.db)
                        .await?;
                    match existing {
                        Some(model) => {
                            let mut active: local_list::ActiveModel = model.into();
                            active.info_json = Set(info_json);
                            active.update(&self.db).await?;
                        }
                        None => {
                            local_list::ActiveModel {
                                id_tag: Set(entry.id_tag.clone()),
                                info_json: Set(info_json),
                            }
                            .insert(&self.db)
                            .await?;
                        }
                    }
                }
                None => {
                    local_list::Entity::delete_by_id(&entry.id_tag)
                        .exec(&self.db)
                        .await?;
                }
            }
        }
        self.upsert_config(LOCAL_LIST_VERSION_KEY, &version.to_string())
            .await
    }

    async fn local_list_entry(&self, id_tag: &str) -> Result<Option<IdTagInfo>, StorageError> {
        let entry = local_list::Entity::find_by_id(id_tag).one(&self.db).await?;
        match entry {
            Some(model) => Ok(Some(serde_json::from_str(&model.info_json)?)),
            None => Ok(None),
        }
    }

    async fn local_list_size(&self) -> Result<usize, StorageError> {
        let count = local_list::Entity::find().count(&self.db).await?;
        Ok(count as usize)
    }

    async fn save_availability(
        &self,
        connector_id: i32,
        operative: bool,
    ) -> Result<(), StorageError> {
        let existing = connector_availability::Entity::find_by_id(connector_id)
            .one(&self.db)
            .await?;
        match existing {
            Some(model) => {
                let mut active: connector_availability::ActiveModel = model.into();
                active.operative = Set(operative);
                active.update(&self.db).await?;
            }
            None => {
                connector_availability::ActiveModel {
                    connector_id: Set(connector_id),
                    operative: Set(operative),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn load_availability(&self) -> Result<HashMap<i32, bool>, StorageError> {
        let rows = connector_availability::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|r| (r.connector_id, r.operative)).collect())
    }

    async fn save_charging_profile(
        &self,
        connector_id: i32,
        profile: &ChargingProfile,
    ) -> Result<(), StorageError> {
        let profile_json = serde_json::to_string(profile)?;
        let purpose = format!("{:?}", profile.charging_profile_purpose);
        let existing = charging_profile::Entity::find_by_id(profile.charging_profile_id)
            .one(&self.db)
            .await?;
        match existing {
            Some(model) => {
                let mut active: charging_profile::ActiveModel = model.into();
                active.connector_id = Set(connector_id);
                active.purpose = Set(purpose);
                active.profile_json = Set(profile_json);
                active.installed_at = Set(Utc::now());
                active.update(&self.db).await?;
            }
            None => {
                charging_profile::ActiveModel {
                    profile_id: Set(profile.charging_profile_id),
                    connector_id: Set(connector_id),
                    purpose: Set(purpose),
                    profile_json: Set(profile_json),
                    installed_at: Set(Utc::now()),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_charging_profile(&self, profile_id: i32) -> Result<(), StorageError> {
        charging_profile::Entity::delete_many()
            .filter(charging_profile::Column::ProfileId.eq(profile_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn load_charging_profiles(
        &self,
    ) -> Result<Vec<(i32, ChargingProfile)>, StorageError> {
        let rows = charging_profile::Entity::find().all(&self.db).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let profile: ChargingProfile = serde_json::from_str(&row.profile_json)?;
            out.push((row.connector_id, profile));
        }
        Ok(out)
    }
}
