//! Typed configuration registry
//!
//! Holds the current value for every known key plus dynamically registered
//! custom keys. Reads are concurrent; mutation takes the write lock, runs the
//! key's validator, persists through the configured [`ConfigStore`] and
//! fires a change notification for hot keys whose owners must react at
//! runtime (timer cadences, credentials, security profile).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_ocpp::v1_6::types::KeyValue;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::storage::Storage;

use super::catalogue::{FeatureProfile, KnownKey, Mutability};

/// Placeholder reported for WriteOnly keys.
const WRITE_ONLY_PLACEHOLDER: &str = "********";

/// Outcome of a `ChangeConfiguration`-style write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetResult {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

/// Runtime notification for writes to hot keys.
#[derive(Debug, Clone)]
pub enum ConfigChange {
    HeartbeatInterval(i32),
    MeterValueSampleInterval(i32),
    ClockAlignedDataInterval(i32),
    ConnectionTimeOut(i32),
    WebSocketPingInterval(i32),
    AuthorizationKeyChanged,
    SecurityProfile(i32),
}

/// Typed, mutability-aware key/value registry.
pub struct DeviceModel {
    values: RwLock<HashMap<&'static str, String>>,
    custom: RwLock<HashMap<String, String>>,
    store: Option<Arc<dyn Storage>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl DeviceModel {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        let model = Self {
            values: RwLock::new(HashMap::new()),
            custom: RwLock::new(HashMap::new()),
            store: None,
            changes,
        };
        model.apply_defaults();
        model
    }

    pub fn with_store(store: Arc<dyn Storage>) -> Self {
        let mut model = Self::new();
        model.store = Some(store);
        model
    }

    /// Subscribe to hot-key change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Overlay a persisted snapshot (values win over defaults).
    pub fn load_snapshot(&self, snapshot: HashMap<String, String>) {
        let mut values = self.values.write().unwrap();
        let mut custom = self.custom.write().unwrap();
        for (key, value) in snapshot {
            match KnownKey::from_name(&key) {
                Some(known) => {
                    values.insert(known.name(), value);
                }
                None => {
                    custom.insert(key, value);
                }
            }
        }
    }

    fn apply_defaults(&self) {
        let defaults: &[(KnownKey, &str)] = &[
            (KnownKey::AllowOfflineTxForUnknownId, "false"),
            (KnownKey::AuthorizationCacheEnabled, "true"),
            (KnownKey::AuthorizeRemoteTxRequests, "false"),
            (KnownKey::ClockAlignedDataInterval, "900"),
            (KnownKey::ConnectionTimeOut, "30"),
            (KnownKey::ConnectorPhaseRotation, "0.RST,1.RST,2.RST"),
            (KnownKey::ConnectorPhaseRotationMaxLength, "10"),
            (KnownKey::GetConfigurationMaxKeys, "100"),
            (KnownKey::HeartbeatInterval, "300"),
            (KnownKey::LocalAuthorizeOffline, "true"),
            (KnownKey::LocalPreAuthorize, "false"),
            (KnownKey::MaxEnergyOnInvalidId, "0"),
            (KnownKey::MeterValuesAlignedData, "Energy.Active.Import.Register"),
            (KnownKey::MeterValuesAlignedDataMaxLength, "8"),
            (KnownKey::MeterValuesSampledData, "Energy.Active.Import.Register"),
            (KnownKey::MeterValuesSampledDataMaxLength, "8"),
            (KnownKey::MeterValueSampleInterval, "60"),
            (KnownKey::MinimumStatusDuration, "0"),
            (KnownKey::NumberOfConnectors, "2"),
            (KnownKey::ResetRetries, "1"),
            (KnownKey::StopTransactionOnEVSideDisconnect, "true"),
            (KnownKey::StopTransactionOnInvalidId, "true"),
            (KnownKey::StopTxnAlignedData, ""),
            (KnownKey::StopTxnAlignedDataMaxLength, "8"),
            (KnownKey::StopTxnSampledData, "Energy.Active.Import.Register"),
            (KnownKey::StopTxnSampledDataMaxLength, "8"),
            (
                KnownKey::SupportedFeatureProfiles,
                "Core,FirmwareManagement,LocalAuthListManagement,Reservation,SmartCharging,RemoteTrigger",
            ),
            (KnownKey::SupportedFeatureProfilesMaxLength, "6"),
            (KnownKey::TransactionMessageAttempts, "3"),
            (KnownKey::TransactionMessageRetryInterval, "60"),
            (KnownKey::UnlockConnectorOnEVSideDisconnect, "true"),
            (KnownKey::WebSocketPingInterval, "30"),
            (KnownKey::SupportedFileTransferProtocols, "FTP,FTPS,HTTP,HTTPS"),
            (KnownKey::LocalAuthListEnabled, "true"),
            (KnownKey::LocalAuthListMaxLength, "250"),
            (KnownKey::SendLocalListMaxLength, "100"),
            (KnownKey::ReserveConnectorZeroSupported, "false"),
            (KnownKey::ChargeProfileMaxStackLevel, "20"),
            (KnownKey::ChargingScheduleAllowedChargingRateUnit, "Current,Power"),
            (KnownKey::ChargingScheduleMaxPeriods, "30"),
            (KnownKey::ConnectorSwitch3to1PhaseSupported, "false"),
            (KnownKey::MaxChargingProfilesInstalled, "20"),
            (KnownKey::AdditionalRootCertificateCheck, "false"),
            (KnownKey::CertificateSignedMaxChainSize, "10000"),
            (KnownKey::CertificateStoreMaxLength, "10"),
            (KnownKey::CpoName, ""),
            (KnownKey::DisableSecurityEventNotifications, "false"),
            (KnownKey::SecurityProfile, "0"),
            (KnownKey::ISO15118PnCEnabled, "false"),
            (KnownKey::ISO15118CertificateManagementEnabled, "false"),
            (KnownKey::ContractValidationOffline, "false"),
            (KnownKey::CentralContractValidationAllowed, "false"),
            (KnownKey::OcspRequestInterval, "86400"),
            (KnownKey::AllowChargingProfileWithoutStartSchedule, "false"),
            (KnownKey::CompositeScheduleDefaultLimitAmps, "48"),
            (KnownKey::CompositeScheduleDefaultLimitWatts, "33120"),
            (KnownKey::CompositeScheduleDefaultNumberPhases, "3"),
            (KnownKey::SupplyVoltage, "230"),
            (KnownKey::MaxCompositeScheduleDuration, "31536000"),
            (KnownKey::MaxMessageSize, "65536"),
            (KnownKey::MessageQueueSizeThreshold, "5000"),
            (KnownKey::MessageTypesDiscardForQueueing, ""),
            (KnownKey::QueueAllMessages, "false"),
            (KnownKey::RetryBackoffRandomRange, "10"),
            (KnownKey::RetryBackoffRepeatTimes, "5"),
            (KnownKey::RetryBackoffWaitMinimum, "3"),
            (
                KnownKey::SupportedChargingProfilePurposeTypes,
                "ChargePointMaxProfile,TxDefaultProfile,TxProfile",
            ),
            (
                KnownKey::SupportedMeasurands,
                "Energy.Active.Import.Register,Energy.Active.Export.Register,Power.Active.Import,Current.Import,Current.Offered,Voltage,Frequency,SoC",
            ),
            (KnownKey::StopTransactionIfUnlockNotSupported, "false"),
            (KnownKey::TimeOffset, "00:00"),
            (KnownKey::UseSslDefaultVerifyPaths, "true"),
            (KnownKey::VerifyCsmsAllowWildcards, "false"),
            (KnownKey::VerifyCsmsCommonName, "true"),
            (KnownKey::WaitForStopTransactionsOnResetTimeout, "60"),
            (KnownKey::WebsocketPingPayload, "hello"),
            (KnownKey::WebsocketPongTimeout, "5"),
        ];

        let mut values = self.values.write().unwrap();
        for (key, value) in defaults {
            values.insert(key.name(), value.to_string());
        }
    }

    // ── Read path ──────────────────────────────────────────────

    /// Look a key up for `GetConfiguration`. WriteOnly keys report a
    /// placeholder. Internal keys are retrievable by name but are left out
    /// of the unfiltered report (no feature profile covers them).
    pub fn get(&self, key: &str) -> Option<KeyValue> {
        if let Some(known) = KnownKey::from_name(key) {
            let meta = known.meta();
            let values = self.values.read().unwrap();
            let stored = values.get(known.name())?;
            let value = match meta.mutability {
                Mutability::WriteOnly => WRITE_ONLY_PLACEHOLDER.to_string(),
                _ => stored.clone(),
            };
            return Some(KeyValue {
                key: known.name().to_string(),
                readonly: meta.mutability == Mutability::ReadOnly,
                value: Some(value),
            });
        }

        let custom = self.custom.read().unwrap();
        custom.get(key).map(|value| KeyValue {
            key: key.to_string(),
            readonly: false,
            value: Some(value.clone()),
        })
    }

    /// Raw value access for internal consumers (Internal keys included).
    pub fn raw(&self, key: KnownKey) -> Option<String> {
        self.values.read().unwrap().get(key.name()).cloned()
    }

    /// Build the `GetConfiguration` report.
    ///
    /// With no requested keys, every reportable key is returned; profiles
    /// listed in `SupportedFeatureProfiles` gate the standard sections,
    /// Internal keys never appear. With requested keys, unknown names are
    /// collected separately for the response's `unknownKey` list.
    pub fn get_all_for_report(
        &self,
        requested: Option<&[String]>,
    ) -> (Vec<KeyValue>, Vec<String>) {
        match requested {
            Some(keys) => {
                let mut found = Vec::new();
                let mut unknown = Vec::new();
                for key in keys {
                    match self.get(key) {
                        Some(kv) => found.push(kv),
                        None => unknown.push(key.clone()),
                    }
                }
                (found, unknown)
            }
            None => {
                let enabled = self.supported_feature_profiles();
                let mut report = Vec::new();
                for key in KnownKey::ALL {
                    let meta = key.meta();
                    let reportable = match meta.profile {
                        FeatureProfile::Internal | FeatureProfile::Custom => false,
                        FeatureProfile::Security
                        | FeatureProfile::PnC
                        | FeatureProfile::CostAndPrice => true,
                        other => enabled.iter().any(|p| p == other.as_str()),
                    };
                    if reportable {
                        if let Some(kv) = self.get(key.name()) {
                            report.push(kv);
                        }
                    }
                }
                let custom = self.custom.read().unwrap();
                for (key, value) in custom.iter() {
                    report.push(KeyValue {
                        key: key.clone(),
                        readonly: false,
                        value: Some(value.clone()),
                    });
                }
                (report, Vec::new())
            }
        }
    }

    // ── Write path ─────────────────────────────────────────────

    /// Apply a `ChangeConfiguration` write.
    pub async fn set(&self, key: &str, value: &str) -> SetResult {
        let result = match KnownKey::from_name(key) {
            Some(known) => {
                let meta = known.meta();
                if meta.mutability == Mutability::ReadOnly {
                    return SetResult::Rejected;
                }
                if !meta.validator.accepts(value) {
                    debug!(key, value, "Configuration value failed validation");
                    return SetResult::Rejected;
                }
                // The security profile may only ever be raised.
                if known == KnownKey::SecurityProfile {
                    let current = self.security_profile();
                    let requested: i32 = value.parse().unwrap_or(0);
                    if requested < current {
                        return SetResult::Rejected;
                    }
                }
                self.values
                    .write()
                    .unwrap()
                    .insert(known.name(), value.to_string());
                if meta.reboot_required {
                    SetResult::RebootRequired
                } else {
                    SetResult::Accepted
                }
            }
            None => {
                let mut custom = self.custom.write().unwrap();
                if custom.contains_key(key) {
                    custom.insert(key.to_string(), value.to_string());
                    SetResult::Accepted
                } else {
                    return SetResult::NotSupported;
                }
            }
        };

        if matches!(result, SetResult::Accepted | SetResult::RebootRequired) {
            self.persist(key, value).await;
            self.notify(key, value);
        }
        result
    }

    /// Internal write that bypasses mutability (boot interval updates,
    /// security profile fallback). Still persists and notifies.
    pub async fn set_internal(&self, key: KnownKey, value: &str) {
        self.values
            .write()
            .unwrap()
            .insert(key.name(), value.to_string());
        self.persist(key.name(), value).await;
        self.notify(key.name(), value);
    }

    /// Register a custom (vendor-specific) key.
    pub fn register_custom_key(&self, key: impl Into<String>, value: impl Into<String>) {
        self.custom.write().unwrap().insert(key.into(), value.into());
    }

    async fn persist(&self, key: &str, value: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_config_value(key, value).await {
                warn!(key, error = %e, "Failed to persist configuration value");
            }
        }
    }

    fn notify(&self, key: &str, value: &str) {
        let change = match KnownKey::from_name(key) {
            Some(KnownKey::HeartbeatInterval) => {
                value.parse().ok().map(ConfigChange::HeartbeatInterval)
            }
            Some(KnownKey::MeterValueSampleInterval) => value
                .parse()
                .ok()
                .map(ConfigChange::MeterValueSampleInterval),
            Some(KnownKey::ClockAlignedDataInterval) => value
                .parse()
                .ok()
                .map(ConfigChange::ClockAlignedDataInterval),
            Some(KnownKey::ConnectionTimeOut) => {
                value.parse().ok().map(ConfigChange::ConnectionTimeOut)
            }
            Some(KnownKey::WebSocketPingInterval) => {
                value.parse().ok().map(ConfigChange::WebSocketPingInterval)
            }
            Some(KnownKey::AuthorizationKey) => Some(ConfigChange::AuthorizationKeyChanged),
            Some(KnownKey::SecurityProfile) => {
                value.parse().ok().map(ConfigChange::SecurityProfile)
            }
            _ => None,
        };
        if let Some(change) = change {
            let _ = self.changes.send(change);
        }
    }

    // ── Typed accessors ────────────────────────────────────────

    fn int(&self, key: KnownKey, default: i32) -> i32 {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn boolean(&self, key: KnownKey, default: bool) -> bool {
        self.raw(key)
            .map(|v| v == "true")
            .unwrap_or(default)
    }

    fn csl(&self, key: KnownKey) -> Vec<String> {
        self.raw(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn heartbeat_interval(&self) -> i32 {
        self.int(KnownKey::HeartbeatInterval, 300)
    }

    pub fn meter_value_sample_interval(&self) -> i32 {
        self.int(KnownKey::MeterValueSampleInterval, 0)
    }

    pub fn clock_aligned_data_interval(&self) -> i32 {
        self.int(KnownKey::ClockAlignedDataInterval, 0)
    }

    pub fn connection_timeout(&self) -> i32 {
        self.int(KnownKey::ConnectionTimeOut, 30)
    }

    pub fn number_of_connectors(&self) -> i32 {
        self.int(KnownKey::NumberOfConnectors, 1)
    }

    pub fn transaction_message_attempts(&self) -> i32 {
        self.int(KnownKey::TransactionMessageAttempts, 3)
    }

    pub fn transaction_message_retry_interval(&self) -> i32 {
        self.int(KnownKey::TransactionMessageRetryInterval, 60)
    }

    pub fn retry_backoff_wait_minimum(&self) -> i32 {
        self.int(KnownKey::RetryBackoffWaitMinimum, 3)
    }

    pub fn retry_backoff_repeat_times(&self) -> i32 {
        self.int(KnownKey::RetryBackoffRepeatTimes, 5)
    }

    pub fn retry_backoff_random_range(&self) -> i32 {
        self.int(KnownKey::RetryBackoffRandomRange, 10)
    }

    pub fn websocket_ping_interval(&self) -> i32 {
        self.int(KnownKey::WebSocketPingInterval, 30)
    }

    pub fn websocket_pong_timeout(&self) -> i32 {
        self.int(KnownKey::WebsocketPongTimeout, 5)
    }

    pub fn get_configuration_max_keys(&self) -> usize {
        self.int(KnownKey::GetConfigurationMaxKeys, 100) as usize
    }

    pub fn security_profile(&self) -> i32 {
        self.int(KnownKey::SecurityProfile, 0)
    }

    pub fn supply_voltage(&self) -> f32 {
        self.int(KnownKey::SupplyVoltage, 230) as f32
    }

    pub fn composite_schedule_default_limit_amps(&self) -> f32 {
        self.int(KnownKey::CompositeScheduleDefaultLimitAmps, 48) as f32
    }

    pub fn composite_schedule_default_limit_watts(&self) -> f32 {
        self.int(KnownKey::CompositeScheduleDefaultLimitWatts, 33120) as f32
    }

    pub fn composite_schedule_default_number_phases(&self) -> i32 {
        self.int(KnownKey::CompositeScheduleDefaultNumberPhases, 3)
    }

    pub fn charge_profile_max_stack_level(&self) -> i32 {
        self.int(KnownKey::ChargeProfileMaxStackLevel, 20)
    }

    pub fn charging_schedule_max_periods(&self) -> usize {
        self.int(KnownKey::ChargingScheduleMaxPeriods, 30) as usize
    }

    pub fn max_charging_profiles_installed(&self) -> usize {
        self.int(KnownKey::MaxChargingProfilesInstalled, 20) as usize
    }

    pub fn max_energy_on_invalid_id(&self) -> Option<i32> {
        let value = self.int(KnownKey::MaxEnergyOnInvalidId, 0);
        (value > 0).then_some(value)
    }

    pub fn wait_for_stop_transactions_on_reset_timeout(&self) -> i32 {
        self.int(KnownKey::WaitForStopTransactionsOnResetTimeout, 60)
    }

    pub fn local_auth_list_max_length(&self) -> usize {
        self.int(KnownKey::LocalAuthListMaxLength, 250) as usize
    }

    pub fn send_local_list_max_length(&self) -> usize {
        self.int(KnownKey::SendLocalListMaxLength, 100) as usize
    }

    pub fn allow_offline_tx_for_unknown_id(&self) -> bool {
        self.boolean(KnownKey::AllowOfflineTxForUnknownId, false)
    }

    pub fn local_authorize_offline(&self) -> bool {
        self.boolean(KnownKey::LocalAuthorizeOffline, false)
    }

    pub fn authorization_cache_enabled(&self) -> bool {
        self.boolean(KnownKey::AuthorizationCacheEnabled, false)
    }

    pub fn local_auth_list_enabled(&self) -> bool {
        self.boolean(KnownKey::LocalAuthListEnabled, false)
    }

    pub fn authorize_remote_tx_requests(&self) -> bool {
        self.boolean(KnownKey::AuthorizeRemoteTxRequests, false)
    }

    pub fn unlock_connector_on_ev_side_disconnect(&self) -> bool {
        self.boolean(KnownKey::UnlockConnectorOnEVSideDisconnect, true)
    }

    pub fn stop_transaction_on_ev_side_disconnect(&self) -> bool {
        self.boolean(KnownKey::StopTransactionOnEVSideDisconnect, true)
    }

    pub fn stop_transaction_on_invalid_id(&self) -> bool {
        self.boolean(KnownKey::StopTransactionOnInvalidId, true)
    }

    pub fn queue_all_messages(&self) -> bool {
        self.boolean(KnownKey::QueueAllMessages, false)
    }

    pub fn reserve_connector_zero_supported(&self) -> bool {
        self.boolean(KnownKey::ReserveConnectorZeroSupported, false)
    }

    pub fn disable_security_event_notifications(&self) -> bool {
        self.boolean(KnownKey::DisableSecurityEventNotifications, false)
    }

    pub fn verify_csms_common_name(&self) -> bool {
        self.boolean(KnownKey::VerifyCsmsCommonName, true)
    }

    pub fn allow_charging_profile_without_start_schedule(&self) -> bool {
        self.boolean(KnownKey::AllowChargingProfileWithoutStartSchedule, false)
    }

    pub fn supported_feature_profiles(&self) -> Vec<String> {
        self.csl(KnownKey::SupportedFeatureProfiles)
    }

    pub fn message_types_discard_for_queueing(&self) -> Vec<String> {
        self.csl(KnownKey::MessageTypesDiscardForQueueing)
    }

    pub fn meter_values_sampled_data(&self) -> Vec<String> {
        self.csl(KnownKey::MeterValuesSampledData)
    }

    pub fn meter_values_aligned_data(&self) -> Vec<String> {
        self.csl(KnownKey::MeterValuesAlignedData)
    }

    pub fn stop_txn_sampled_data(&self) -> Vec<String> {
        self.csl(KnownKey::StopTxnSampledData)
    }

    pub fn charging_schedule_allowed_charging_rate_unit(&self) -> Vec<String> {
        self.csl(KnownKey::ChargingScheduleAllowedChargingRateUnit)
    }

    pub fn authorization_key(&self) -> Option<String> {
        self.raw(KnownKey::AuthorizationKey)
    }

    pub fn central_system_uri(&self) -> Option<String> {
        self.raw(KnownKey::CentralSystemURI)
    }

    pub fn charge_point_id(&self) -> Option<String> {
        self.raw(KnownKey::ChargePointId)
    }

    /// Dump every stored value (known + custom) for snapshot persistence.
    pub fn snapshot(&self) -> HashMap<String, String> {
        let mut out: HashMap<String, String> = self
            .values
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for (k, v) in self.custom.read().unwrap().iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let model = DeviceModel::new();
        assert_eq!(model.set("HeartbeatInterval", "120").await, SetResult::Accepted);
        let kv = model.get("HeartbeatInterval").unwrap();
        assert_eq!(kv.value.as_deref(), Some("120"));
        assert!(!kv.readonly);
        assert_eq!(model.heartbeat_interval(), 120);
    }

    #[tokio::test]
    async fn rejects_bad_values() {
        let model = DeviceModel::new();
        assert_eq!(
            model.set("HeartbeatInterval", "often").await,
            SetResult::Rejected
        );
        assert_eq!(
            model.set("AllowOfflineTxForUnknownId", "1").await,
            SetResult::Rejected
        );
        // untouched by the failed writes
        assert_eq!(model.heartbeat_interval(), 300);
    }

    #[tokio::test]
    async fn readonly_and_unknown_keys() {
        let model = DeviceModel::new();
        assert_eq!(
            model.set("NumberOfConnectors", "4").await,
            SetResult::Rejected
        );
        assert_eq!(model.set("NoSuchKey", "x").await, SetResult::NotSupported);
    }

    #[tokio::test]
    async fn reboot_required_keys() {
        let model = DeviceModel::new();
        assert_eq!(
            model.set("MaxMessageSize", "32000").await,
            SetResult::RebootRequired
        );
        // value stored even though reboot is needed for it to apply
        assert_eq!(model.raw(KnownKey::MaxMessageSize).unwrap(), "32000");
    }

    #[tokio::test]
    async fn write_only_key_reports_placeholder() {
        let model = DeviceModel::new();
        assert_eq!(
            model.set("AuthorizationKey", "0123456789abcdef").await,
            SetResult::Accepted
        );
        let kv = model.get("AuthorizationKey").unwrap();
        assert_eq!(kv.value.as_deref(), Some(WRITE_ONLY_PLACEHOLDER));
        // but internal consumers see the real value
        assert_eq!(model.authorization_key().unwrap(), "0123456789abcdef");
    }

    #[tokio::test]
    async fn security_profile_cannot_be_lowered() {
        let model = DeviceModel::new();
        assert_eq!(model.set("SecurityProfile", "2").await, SetResult::Accepted);
        assert_eq!(model.set("SecurityProfile", "1").await, SetResult::Rejected);
        assert_eq!(model.security_profile(), 2);
    }

    #[tokio::test]
    async fn hot_key_fires_change_notification() {
        let model = DeviceModel::new();
        let mut rx = model.subscribe();
        model.set("MeterValueSampleInterval", "15").await;
        match rx.recv().await.unwrap() {
            ConfigChange::MeterValueSampleInterval(v) => assert_eq!(v, 15),
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[tokio::test]
    async fn custom_keys_are_dynamic() {
        let model = DeviceModel::new();
        assert_eq!(model.set("VendorX.Tint", "blue").await, SetResult::NotSupported);
        model.register_custom_key("VendorX.Tint", "red");
        assert_eq!(model.set("VendorX.Tint", "blue").await, SetResult::Accepted);
        assert_eq!(model.get("VendorX.Tint").unwrap().value.as_deref(), Some("blue"));
    }

    #[test]
    fn report_excludes_internal_keys() {
        let model = DeviceModel::new();
        let (report, unknown) = model.get_all_for_report(None);
        assert!(unknown.is_empty());
        assert!(report.iter().any(|kv| kv.key == "HeartbeatInterval"));
        assert!(!report.iter().any(|kv| kv.key == "SupplyVoltage"));
        assert!(!report.iter().any(|kv| kv.key == "CentralSystemURI"));
        // still retrievable when asked for by name
        assert!(model.get("SupplyVoltage").is_some());
    }

    #[test]
    fn report_with_requested_keys_collects_unknown() {
        let model = DeviceModel::new();
        let keys = vec!["HeartbeatInterval".to_string(), "Bogus".to_string()];
        let (report, unknown) = model.get_all_for_report(Some(&keys));
        assert_eq!(report.len(), 1);
        assert_eq!(unknown, vec!["Bogus".to_string()]);
    }

    #[test]
    fn feature_profile_filter_applies_to_report() {
        let model = DeviceModel::new();
        let mut values = model.values.write().unwrap();
        values.insert(KnownKey::SupportedFeatureProfiles.name(), "Core".to_string());
        drop(values);
        let (report, _) = model.get_all_for_report(None);
        // smart-charging keys drop out when the profile is not supported
        assert!(!report.iter().any(|kv| kv.key == "ChargeProfileMaxStackLevel"));
        assert!(report.iter().any(|kv| kv.key == "MeterValueSampleInterval"));
    }
}
