//! Profile storage, validation and composite computation
//!
//! Three purpose tiers are held separately: station-wide maxima
//! (connector 0 only), per-connector transaction defaults (connector 0
//! meaning "all connectors unless a specific one overrides"), and
//! transaction-bound profiles that vanish with their session. The first
//! two tiers persist across reboots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::{
    ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType, ChargingRateUnitType,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device_model::DeviceModel;
use crate::storage::Storage;

use super::composite::calculate_composite_schedule;
use super::profile::{calculate_profile, PeriodEntry};
use super::{CompositeDefaults, EnhancedChargingSchedule};

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("stack level {0} outside allowed range")]
    StackLevel(i32),
    #[error("unknown connector {0}")]
    UnknownConnector(i32),
    #[error("ChargePointMaxProfile only attaches to connector 0")]
    MaxProfileConnector,
    #[error("ChargePointMaxProfile may not be Relative")]
    MaxProfileRelative,
    #[error("TxProfile requires an active transaction")]
    NoTransaction,
    #[error("TxProfile transaction id does not match")]
    TransactionMismatch,
    #[error("schedule requires startSchedule")]
    MissingStartSchedule,
    #[error("Relative schedule must not carry startSchedule")]
    UnexpectedStartSchedule,
    #[error("too many schedule periods")]
    TooManyPeriods,
    #[error("charging rate unit not supported")]
    UnsupportedRateUnit,
    #[error("charging profile store is full")]
    StoreFull,
}

#[derive(Debug, Clone)]
struct InstalledProfile {
    connector_id: i32,
    profile: ChargingProfile,
    installed_at: DateTime<Utc>,
}

pub struct SmartChargingHandler {
    device_model: Arc<DeviceModel>,
    storage: Arc<dyn Storage>,
    charge_point_max_profiles: Mutex<Vec<InstalledProfile>>,
    tx_default_profiles: Mutex<Vec<InstalledProfile>>,
    /// Keyed by connector; cleared when the connector's transaction ends.
    tx_profiles: Mutex<HashMap<i32, Vec<InstalledProfile>>>,
}

impl SmartChargingHandler {
    pub fn new(device_model: Arc<DeviceModel>, storage: Arc<dyn Storage>) -> Self {
        Self {
            device_model,
            storage,
            charge_point_max_profiles: Mutex::new(Vec::new()),
            tx_default_profiles: Mutex::new(Vec::new()),
            tx_profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Re-install the persisted tiers on boot.
    pub async fn restore(&self) {
        match self.storage.load_charging_profiles().await {
            Ok(profiles) => {
                for (connector_id, profile) in profiles {
                    let installed = InstalledProfile {
                        connector_id,
                        profile,
                        installed_at: Utc::now(),
                    };
                    match installed.profile.charging_profile_purpose {
                        ChargingProfilePurposeType::ChargePointMaxProfile => {
                            self.charge_point_max_profiles.lock().unwrap().push(installed)
                        }
                        ChargingProfilePurposeType::TxDefaultProfile => {
                            self.tx_default_profiles.lock().unwrap().push(installed)
                        }
                        // transaction profiles are never persisted
                        ChargingProfilePurposeType::TxProfile => {}
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to restore charging profiles"),
        }
    }

    // ── Installation ───────────────────────────────────────────

    /// Validate and install a profile from `SetChargingProfile`.
    ///
    /// `active_transaction_id` is the server-assigned id of the running
    /// transaction on `connector_id`, if any (TxProfile needs one).
    pub async fn add_profile(
        &self,
        connector_id: i32,
        mut profile: ChargingProfile,
        active_transaction_id: Option<i32>,
    ) -> Result<(), ProfileError> {
        self.validate(connector_id, &mut profile, active_transaction_id)?;

        let installed = InstalledProfile {
            connector_id,
            profile: profile.clone(),
            installed_at: Utc::now(),
        };

        let purpose = profile.charging_profile_purpose.clone();
        match purpose {
            ChargingProfilePurposeType::ChargePointMaxProfile => {
                let mut tier = self.charge_point_max_profiles.lock().unwrap();
                Self::replace_in_tier(&mut tier, installed);
            }
            ChargingProfilePurposeType::TxDefaultProfile => {
                let mut tier = self.tx_default_profiles.lock().unwrap();
                Self::replace_in_tier(&mut tier, installed);
            }
            ChargingProfilePurposeType::TxProfile => {
                let mut tiers = self.tx_profiles.lock().unwrap();
                let tier = tiers.entry(connector_id).or_default();
                Self::replace_in_tier(tier, installed);
            }
        }

        info!(
            profile_id = profile.charging_profile_id,
            connector_id,
            stack_level = profile.stack_level,
            purpose = ?purpose,
            "Charging profile installed"
        );

        if purpose != ChargingProfilePurposeType::TxProfile {
            if let Err(e) = self.storage.save_charging_profile(connector_id, &profile).await {
                warn!(error = %e, "Failed to persist charging profile");
            }
        }
        Ok(())
    }

    /// Within a tier, a new profile replaces the prior holder of the same
    /// (connector, stack level) pair, and any older version of itself.
    fn replace_in_tier(tier: &mut Vec<InstalledProfile>, installed: InstalledProfile) {
        tier.retain(|p| {
            p.profile.charging_profile_id != installed.profile.charging_profile_id
                && !(p.connector_id == installed.connector_id
                    && p.profile.stack_level == installed.profile.stack_level)
        });
        tier.push(installed);
    }

    fn validate(
        &self,
        connector_id: i32,
        profile: &mut ChargingProfile,
        active_transaction_id: Option<i32>,
    ) -> Result<(), ProfileError> {
        let max_stack = self.device_model.charge_profile_max_stack_level();
        let stack_level = profile.stack_level as i32;
        if stack_level < 0 || stack_level > max_stack {
            return Err(ProfileError::StackLevel(stack_level));
        }

        if connector_id < 0 || connector_id > self.device_model.number_of_connectors() {
            return Err(ProfileError::UnknownConnector(connector_id));
        }

        let schedule = &mut profile.charging_schedule;
        if schedule.charging_schedule_period.len() > self.device_model.charging_schedule_max_periods()
        {
            return Err(ProfileError::TooManyPeriods);
        }

        let allowed_units = self.device_model.charging_schedule_allowed_charging_rate_unit();
        let unit_name = match schedule.charging_rate_unit {
            ChargingRateUnitType::A => "Current",
            ChargingRateUnitType::W => "Power",
        };
        if !allowed_units.is_empty() && !allowed_units.iter().any(|u| u == unit_name) {
            return Err(ProfileError::UnsupportedRateUnit);
        }

        match profile.charging_profile_kind {
            ChargingProfileKindType::Absolute | ChargingProfileKindType::Recurring => {
                if schedule.start_schedule.is_none() {
                    if self.device_model.allow_charging_profile_without_start_schedule() {
                        schedule.start_schedule = Some(Utc::now());
                    } else {
                        return Err(ProfileError::MissingStartSchedule);
                    }
                }
            }
            ChargingProfileKindType::Relative => {
                if schedule.start_schedule.is_some() {
                    return Err(ProfileError::UnexpectedStartSchedule);
                }
            }
        }

        match profile.charging_profile_purpose {
            ChargingProfilePurposeType::ChargePointMaxProfile => {
                if connector_id != 0 {
                    return Err(ProfileError::MaxProfileConnector);
                }
                if profile.charging_profile_kind == ChargingProfileKindType::Relative {
                    return Err(ProfileError::MaxProfileRelative);
                }
            }
            ChargingProfilePurposeType::TxProfile => {
                if connector_id == 0 {
                    return Err(ProfileError::UnknownConnector(0));
                }
                let active = active_transaction_id.ok_or(ProfileError::NoTransaction)?;
                if let Some(tx_id) = profile.transaction_id {
                    if tx_id != active {
                        return Err(ProfileError::TransactionMismatch);
                    }
                }
            }
            ChargingProfilePurposeType::TxDefaultProfile => {}
        }

        let installed = self.charge_point_max_profiles.lock().unwrap().len()
            + self.tx_default_profiles.lock().unwrap().len()
            + self.tx_profiles.lock().unwrap().values().map(Vec::len).sum::<usize>();
        if installed >= self.device_model.max_charging_profiles_installed() {
            return Err(ProfileError::StoreFull);
        }

        Ok(())
    }

    // ── Clearing ───────────────────────────────────────────────

    /// Remove every profile matching the `ClearChargingProfile` criteria.
    /// Returns whether anything was removed.
    pub async fn clear_profiles(
        &self,
        id: Option<i32>,
        connector_id: Option<i32>,
        purpose: Option<ChargingProfilePurposeType>,
        stack_level: Option<i32>,
    ) -> bool {
        let matches = |p: &InstalledProfile, tier_purpose: ChargingProfilePurposeType| {
            id.map_or(true, |id| p.profile.charging_profile_id == id)
                && connector_id.map_or(true, |c| p.connector_id == c)
                && purpose.as_ref().map_or(true, |pp| *pp == tier_purpose)
                && stack_level.map_or(true, |s| p.profile.stack_level as i32 == s)
        };

        let mut removed = Vec::new();
        {
            let mut tier = self.charge_point_max_profiles.lock().unwrap();
            tier.retain(|p| {
                let hit = matches(p, ChargingProfilePurposeType::ChargePointMaxProfile);
                if hit {
                    removed.push(p.profile.charging_profile_id);
                }
                !hit
            });
        }
        {
            let mut tier = self.tx_default_profiles.lock().unwrap();
            tier.retain(|p| {
                let hit = matches(p, ChargingProfilePurposeType::TxDefaultProfile);
                if hit {
                    removed.push(p.profile.charging_profile_id);
                }
                !hit
            });
        }
        let mut tx_removed = 0usize;
        {
            let mut tiers = self.tx_profiles.lock().unwrap();
            for tier in tiers.values_mut() {
                let before = tier.len();
                tier.retain(|p| !matches(p, ChargingProfilePurposeType::TxProfile));
                tx_removed += before - tier.len();
            }
        }

        let any = !removed.is_empty() || tx_removed > 0;
        for profile_id in &removed {
            if let Err(e) = self.storage.delete_charging_profile(*profile_id).await {
                warn!(profile_id, error = %e, "Failed to delete persisted profile");
            }
        }
        debug!(count = removed.len(), "Cleared charging profiles");
        any
    }

    /// Drop the transaction tier for a connector (called when its
    /// transaction finishes).
    pub fn clear_tx_profiles(&self, connector_id: i32) {
        self.tx_profiles.lock().unwrap().remove(&connector_id);
    }

    /// Install the TxProfile attached to a RemoteStartTransaction. The
    /// transaction it will govern does not exist yet, so only the purpose
    /// and shape are checked.
    pub fn add_remote_start_profile(
        &self,
        connector_id: i32,
        profile: ChargingProfile,
    ) -> Result<(), ProfileError> {
        if profile.charging_profile_purpose != ChargingProfilePurposeType::TxProfile {
            return Err(ProfileError::NoTransaction);
        }
        if connector_id <= 0 || connector_id > self.device_model.number_of_connectors() {
            return Err(ProfileError::UnknownConnector(connector_id));
        }
        let mut tiers = self.tx_profiles.lock().unwrap();
        let tier = tiers.entry(connector_id).or_default();
        Self::replace_in_tier(
            tier,
            InstalledProfile {
                connector_id,
                profile,
                installed_at: Utc::now(),
            },
        );
        Ok(())
    }

    // ── Composite computation ──────────────────────────────────

    fn defaults(&self) -> CompositeDefaults {
        CompositeDefaults {
            limit_amps: self.device_model.composite_schedule_default_limit_amps(),
            limit_watts: self.device_model.composite_schedule_default_limit_watts(),
            number_phases: self.device_model.composite_schedule_default_number_phases(),
            supply_voltage: self.device_model.supply_voltage(),
        }
    }

    /// Expand the TxDefault tier for one connector. A connector-specific
    /// profile overrides a station-wide (connector 0) one on the same
    /// stack level.
    fn tx_default_entries(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        session_start: Option<DateTime<Utc>>,
        connector_id: i32,
    ) -> Vec<PeriodEntry> {
        let tier = self.tx_default_profiles.lock().unwrap();
        let mut chosen: HashMap<u32, &InstalledProfile> = HashMap::new();
        for installed in tier.iter() {
            if installed.connector_id != 0 && installed.connector_id != connector_id {
                continue;
            }
            let stack = installed.profile.stack_level;
            match chosen.get(&stack) {
                Some(existing)
                    if existing.connector_id == connector_id && installed.connector_id == 0 => {}
                _ => {
                    chosen.insert(stack, installed);
                }
            }
        }
        let mut installs: Vec<&InstalledProfile> = chosen.into_values().collect();
        installs.sort_by_key(|p| p.installed_at);
        let mut entries = Vec::new();
        for installed in installs {
            entries.extend(calculate_profile(start, end, session_start, &installed.profile));
        }
        entries
    }

    fn tier_entries(
        tier: &[InstalledProfile],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        session_start: Option<DateTime<Utc>>,
    ) -> Vec<PeriodEntry> {
        let mut sorted: Vec<&InstalledProfile> = tier.iter().collect();
        sorted.sort_by_key(|p| p.installed_at);
        let mut entries = Vec::new();
        for installed in sorted {
            entries.extend(calculate_profile(start, end, session_start, &installed.profile));
        }
        entries
    }

    /// Compute the composite schedule for a connector over `[start, end]`.
    ///
    /// Connector 0 considers only the station-wide maximum tier; real
    /// connectors combine all three tiers.
    pub fn calculate_enhanced_composite_schedule(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        connector_id: i32,
        unit: ChargingRateUnitType,
        session_start: Option<DateTime<Utc>>,
    ) -> EnhancedChargingSchedule {
        let cpm = {
            let tier = self.charge_point_max_profiles.lock().unwrap();
            Self::tier_entries(&tier, start, end, session_start)
        };

        let (tx_default, tx) = if connector_id == 0 {
            (Vec::new(), Vec::new())
        } else {
            let tx_default = self.tx_default_entries(start, end, session_start, connector_id);
            let tx = {
                let tiers = self.tx_profiles.lock().unwrap();
                tiers
                    .get(&connector_id)
                    .map(|tier| Self::tier_entries(tier, start, end, session_start))
                    .unwrap_or_default()
            };
            (tx_default, tx)
        };

        calculate_composite_schedule(&cpm, &tx_default, &tx, start, end, unit, &self.defaults())
    }

    /// Current amp limit for a connector, for driving the power path.
    pub fn current_limit_amps(&self, connector_id: i32, session_start: Option<DateTime<Utc>>) -> f32 {
        let now = Utc::now();
        let schedule = self.calculate_enhanced_composite_schedule(
            now,
            now + chrono::Duration::seconds(1),
            connector_id,
            ChargingRateUnitType::A,
            session_start,
        );
        schedule
            .charging_schedule_period
            .first()
            .map(|p| p.limit)
            .unwrap_or_else(|| self.defaults().limit_amps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use rust_ocpp::v1_6::types::{ChargingSchedule, ChargingSchedulePeriod};

    fn handler() -> SmartChargingHandler {
        SmartChargingHandler::new(Arc::new(DeviceModel::new()), Arc::new(MemoryStorage::new()))
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn profile(
        id: i32,
        stack_level: u32,
        purpose: ChargingProfilePurposeType,
        kind: ChargingProfileKindType,
    ) -> ChargingProfile {
        let start_schedule = match kind {
            ChargingProfileKindType::Relative => None,
            _ => Some(ts("2024-01-01T08:00:00Z")),
        };
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: None,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: kind,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: Some(3600),
                start_schedule,
                charging_rate_unit: ChargingRateUnitType::A,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: rust_decimal::Decimal::from_f32_retain(16.0).unwrap(),
                    number_phases: None,
                }],
                min_charging_rate: None,
            },
        }
    }

    #[tokio::test]
    async fn max_profile_restricted_to_connector_zero() {
        let handler = handler();
        let p = profile(
            1,
            0,
            ChargingProfilePurposeType::ChargePointMaxProfile,
            ChargingProfileKindType::Absolute,
        );
        assert_eq!(
            handler.add_profile(1, p.clone(), None).await,
            Err(ProfileError::MaxProfileConnector)
        );
        assert!(handler.add_profile(0, p, None).await.is_ok());
    }

    #[tokio::test]
    async fn max_profile_rejects_relative() {
        let handler = handler();
        let p = profile(
            1,
            0,
            ChargingProfilePurposeType::ChargePointMaxProfile,
            ChargingProfileKindType::Relative,
        );
        assert_eq!(
            handler.add_profile(0, p, None).await,
            Err(ProfileError::MaxProfileRelative)
        );
    }

    #[tokio::test]
    async fn tx_profile_needs_matching_transaction() {
        let handler = handler();
        let mut p = profile(
            7,
            1,
            ChargingProfilePurposeType::TxProfile,
            ChargingProfileKindType::Relative,
        );
        assert_eq!(
            handler.add_profile(1, p.clone(), None).await,
            Err(ProfileError::NoTransaction)
        );

        p.transaction_id = Some(42);
        assert_eq!(
            handler.add_profile(1, p.clone(), Some(17)).await,
            Err(ProfileError::TransactionMismatch)
        );
        assert!(handler.add_profile(1, p, Some(42)).await.is_ok());
    }

    #[tokio::test]
    async fn stack_level_bounds() {
        let handler = handler();
        let p = profile(
            9,
            99,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        assert_eq!(
            handler.add_profile(1, p, None).await,
            Err(ProfileError::StackLevel(99))
        );
    }

    #[tokio::test]
    async fn absolute_requires_start_schedule() {
        let handler = handler();
        let mut p = profile(
            3,
            0,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        p.charging_schedule.start_schedule = None;
        assert_eq!(
            handler.add_profile(1, p, None).await,
            Err(ProfileError::MissingStartSchedule)
        );
    }

    #[tokio::test]
    async fn same_purpose_and_stack_level_replaces() {
        let handler = handler();
        let p1 = profile(
            1,
            5,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        let mut p2 = profile(
            2,
            5,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        p2.charging_schedule.charging_schedule_period[0].limit =
            rust_decimal::Decimal::from_f32_retain(8.0).unwrap();

        handler.add_profile(1, p1, None).await.unwrap();
        handler.add_profile(1, p2, None).await.unwrap();

        let tier = handler.tx_default_profiles.lock().unwrap();
        assert_eq!(tier.len(), 1);
        assert_eq!(tier[0].profile.charging_profile_id, 2);
    }

    #[tokio::test]
    async fn clear_by_id_and_purpose() {
        let handler = handler();
        handler
            .add_profile(
                0,
                profile(
                    1,
                    0,
                    ChargingProfilePurposeType::ChargePointMaxProfile,
                    ChargingProfileKindType::Absolute,
                ),
                None,
            )
            .await
            .unwrap();
        handler
            .add_profile(
                1,
                profile(
                    2,
                    1,
                    ChargingProfilePurposeType::TxDefaultProfile,
                    ChargingProfileKindType::Absolute,
                ),
                None,
            )
            .await
            .unwrap();

        assert!(handler.clear_profiles(Some(1), None, None, None).await);
        assert!(handler.charge_point_max_profiles.lock().unwrap().is_empty());

        assert!(
            handler
                .clear_profiles(
                    None,
                    None,
                    Some(ChargingProfilePurposeType::TxDefaultProfile),
                    None
                )
                .await
        );
        assert!(handler.tx_default_profiles.lock().unwrap().is_empty());

        // nothing left to clear
        assert!(!handler.clear_profiles(None, None, None, None).await);
    }

    #[tokio::test]
    async fn specific_connector_overrides_station_wide_default() {
        let handler = handler();
        let mut station_wide = profile(
            1,
            5,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        station_wide.charging_schedule.charging_schedule_period[0].limit =
            rust_decimal::Decimal::from_f32_retain(20.0).unwrap();
        let mut specific = profile(
            2,
            5,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        specific.charging_schedule.charging_schedule_period[0].limit =
            rust_decimal::Decimal::from_f32_retain(10.0).unwrap();

        // both survive installation because they sit on different connectors
        handler.add_profile(0, station_wide, None).await.unwrap();
        handler.add_profile(1, specific, None).await.unwrap();

        let start = ts("2024-01-01T08:10:00Z");
        let end = ts("2024-01-01T08:20:00Z");
        let schedule = handler.calculate_enhanced_composite_schedule(
            start,
            end,
            1,
            ChargingRateUnitType::A,
            None,
        );
        assert_eq!(schedule.charging_schedule_period[0].limit, 10.0);

        // connector 2 has no specific profile and sees the station-wide one
        let schedule = handler.calculate_enhanced_composite_schedule(
            start,
            end,
            2,
            ChargingRateUnitType::A,
            None,
        );
        assert_eq!(schedule.charging_schedule_period[0].limit, 20.0);
    }

    #[tokio::test]
    async fn connector_zero_uses_only_station_maximum() {
        let handler = handler();
        let mut cpm = profile(
            1,
            0,
            ChargingProfilePurposeType::ChargePointMaxProfile,
            ChargingProfileKindType::Absolute,
        );
        cpm.charging_schedule.charging_schedule_period[0].limit =
            rust_decimal::Decimal::from_f32_retain(25.0).unwrap();
        let mut txd = profile(
            2,
            1,
            ChargingProfilePurposeType::TxDefaultProfile,
            ChargingProfileKindType::Absolute,
        );
        txd.charging_schedule.charging_schedule_period[0].limit =
            rust_decimal::Decimal::from_f32_retain(6.0).unwrap();

        handler.add_profile(0, cpm, None).await.unwrap();
        handler.add_profile(0, txd, None).await.unwrap();

        let start = ts("2024-01-01T08:10:00Z");
        let end = ts("2024-01-01T08:20:00Z");
        let schedule = handler.calculate_enhanced_composite_schedule(
            start,
            end,
            0,
            ChargingRateUnitType::A,
            None,
        );
        // the TxDefault tier is ignored for connector 0; the default 48 A
        // baseline is clamped to the 25 A station maximum
        assert_eq!(schedule.charging_schedule_period[0].limit, 25.0);
    }

    #[tokio::test]
    async fn tx_profiles_clear_with_transaction() {
        let handler = handler();
        let mut p = profile(
            7,
            1,
            ChargingProfilePurposeType::TxProfile,
            ChargingProfileKindType::Relative,
        );
        p.transaction_id = Some(42);
        handler.add_profile(1, p, Some(42)).await.unwrap();
        assert!(!handler.tx_profiles.lock().unwrap().is_empty());

        handler.clear_tx_profiles(1);
        assert!(handler.tx_profiles.lock().unwrap().get(&1).is_none());
    }

    #[tokio::test]
    async fn persisted_tiers_are_restored() {
        let storage = Arc::new(MemoryStorage::new());
        let handler = SmartChargingHandler::new(Arc::new(DeviceModel::new()), storage.clone());
        handler
            .add_profile(
                0,
                profile(
                    1,
                    0,
                    ChargingProfilePurposeType::ChargePointMaxProfile,
                    ChargingProfileKindType::Absolute,
                ),
                None,
            )
            .await
            .unwrap();

        let restored = SmartChargingHandler::new(Arc::new(DeviceModel::new()), storage);
        restored.restore().await;
        assert_eq!(restored.charge_point_max_profiles.lock().unwrap().len(), 1);
    }
}
