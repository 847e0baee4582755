//! Transaction manager
//!
//! Owns the per-connector runtime state: status machine, authorized tag,
//! session bookkeeping and the active transaction. Drives authorization
//! (online and offline), Start/StopTransaction with placeholder-id
//! handling, meter-value sampling, reservations, remote start/stop,
//! availability changes and connector unlock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_ocpp::v1_6::messages::authorize::AuthorizeResponse;
use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::messages::stop_transaction::{StopTransactionRequest, StopTransactionResponse};
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, AvailabilityStatus, ChargePointErrorCode, ChargePointStatus,
    ChargingProfile, IdTagInfo, ReadingContext, Reason, RemoteStartStopStatus,
    ReservationStatus, UnlockStatus,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connector::{Availability, Connector, ConnectorEvent, Reservation};
use crate::device_model::DeviceModel;
use crate::drivers::{EvseDriver, PowerMeterReading};
use crate::queue::{MessageQueue, QueueKind};
use crate::smart_charging::SmartChargingHandler;
use crate::storage::Storage;

use super::metering::build_meter_value;
use super::session::{AuthorizedTag, SessionState, Transaction};

struct Slot {
    connector: Connector,
    authorized: Option<AuthorizedTag>,
    session: Option<SessionState>,
    transaction: Option<Transaction>,
    sampler: Option<JoinHandle<()>>,
    connect_timeout: Option<JoinHandle<()>>,
}

impl Slot {
    fn new(connector_id: i32) -> Self {
        Self {
            connector: Connector::new(connector_id),
            authorized: None,
            session: None,
            transaction: None,
            sampler: None,
            connect_timeout: None,
        }
    }

    fn has_active_transaction(&self) -> bool {
        self.transaction.as_ref().map_or(false, |t| !t.finished)
    }
}

pub struct TransactionManager {
    me: Weak<TransactionManager>,
    device_model: Arc<DeviceModel>,
    queue: Arc<MessageQueue>,
    storage: Arc<dyn Storage>,
    evse: Arc<dyn EvseDriver>,
    smart_charging: Arc<SmartChargingHandler>,
    slots: Mutex<HashMap<i32, Slot>>,
    /// Latest reading per connector; reads and writes are point-in-time.
    readings: DashMap<i32, PowerMeterReading>,
    next_placeholder: AtomicI32,
}

impl TransactionManager {
    pub fn new(
        device_model: Arc<DeviceModel>,
        queue: Arc<MessageQueue>,
        storage: Arc<dyn Storage>,
        evse: Arc<dyn EvseDriver>,
        smart_charging: Arc<SmartChargingHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            device_model,
            queue,
            storage,
            evse,
            smart_charging,
            slots: Mutex::new(HashMap::new()),
            readings: DashMap::new(),
            next_placeholder: AtomicI32::new(-1),
        })
    }

    fn me(&self) -> Arc<Self> {
        self.me.upgrade().expect("manager dropped while in use")
    }

    /// Create the connector slots and restore persisted availability.
    pub async fn initialize(&self) {
        let count = self.device_model.number_of_connectors();
        let persisted = self.storage.load_availability().await.unwrap_or_default();

        let mut slots = self.slots.lock().unwrap();
        for connector_id in 0..=count {
            let mut slot = Slot::new(connector_id);
            if persisted.get(&connector_id) == Some(&false) {
                slot.connector.availability = Availability::Inoperative;
                slot.connector
                    .state_machine
                    .apply(ConnectorEvent::ChangeAvailabilityToUnavailable);
            }
            slots.insert(connector_id, slot);
        }
    }

    // ── Status reporting ───────────────────────────────────────

    fn status_payload(
        connector_id: i32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
    ) -> serde_json::Value {
        let request = StatusNotificationRequest {
            connector_id: connector_id as u32,
            error_code,
            info: None,
            status,
            timestamp: Some(Utc::now()),
            vendor_error_code: None,
            vendor_id: None,
        };
        serde_json::to_value(&request).unwrap_or_default()
    }

    fn send_status_notification(
        &self,
        connector_id: i32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
    ) {
        self.queue.enqueue(
            "StatusNotification",
            Self::status_payload(connector_id, status, error_code),
            QueueKind::Normal,
        );
    }

    /// Report every connector's current status (boot and TriggerMessage).
    pub fn send_all_status_notifications(&self) {
        let statuses = self.statuses();
        for (connector_id, status, error_code) in statuses {
            self.send_status_notification(connector_id, status, error_code);
        }
    }

    pub fn statuses(&self) -> Vec<(i32, ChargePointStatus, ChargePointErrorCode)> {
        let slots = self.slots.lock().unwrap();
        let mut out: Vec<_> = slots
            .values()
            .map(|s| {
                (
                    s.connector.id,
                    s.connector.status(),
                    s.connector.state_machine.last_error_code(),
                )
            })
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out
    }

    pub fn connector_status(&self, connector_id: i32) -> Option<ChargePointStatus> {
        self.slots
            .lock()
            .unwrap()
            .get(&connector_id)
            .map(|s| s.connector.status())
    }

    /// Apply a state-machine event and report the resulting status.
    pub fn apply_event(&self, connector_id: i32, event: ConnectorEvent) {
        self.apply_event_with_error(connector_id, event, ChargePointErrorCode::NoError);
    }

    pub fn apply_event_with_error(
        &self,
        connector_id: i32,
        event: ConnectorEvent,
        error_code: ChargePointErrorCode,
    ) {
        let transition = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .get_mut(&connector_id)
                .and_then(|s| s.connector.state_machine.apply_with_error(event, error_code))
        };
        if let Some(transition) = transition {
            self.send_status_notification(connector_id, transition.to, transition.error_code);
        }
    }

    // ── Authorization ──────────────────────────────────────────

    /// Authorize a presented tag per the session rules, consulting the
    /// central system when online and the cache/local list otherwise.
    pub async fn authorize_id_tag(&self, id_tag: &str) -> AuthorizationStatus {
        // a second presentation of a tag already driving a session
        // cancels that session locally
        let duplicate = {
            let slots = self.slots.lock().unwrap();
            slots
                .values()
                .filter(|s| s.connector.id != 0)
                .find(|s| {
                    s.authorized.as_ref().map_or(false, |t| t.id_tag == id_tag)
                        || s.transaction
                            .as_ref()
                            .map_or(false, |t| !t.finished && t.id_tag == id_tag)
                })
                .map(|s| s.connector.id)
        };
        if let Some(connector_id) = duplicate {
            info!(id_tag, connector_id, "Tag re-presented, cancelling its session");
            self.cancel_session_local(connector_id, Reason::DeAuthorized).await;
            return AuthorizationStatus::Invalid;
        }

        let candidate = {
            let slots = self.slots.lock().unwrap();
            let mut free: Vec<&Slot> = slots
                .values()
                .filter(|s| {
                    s.connector.id != 0
                        && s.connector.is_operative()
                        && !s.has_active_transaction()
                        && s.connector.status() != ChargePointStatus::Faulted
                        && s.connector.status() != ChargePointStatus::Unavailable
                })
                .collect();
            free.sort_by_key(|s| s.connector.id);
            if free.is_empty() {
                None
            } else {
                // a reserved connector only accepts its reservation's tag
                free.iter()
                    .find(|s| match &s.connector.reservation {
                        Some(r) => r.id_tag == id_tag,
                        None => true,
                    })
                    .map(|s| s.connector.id)
            }
        };
        let connector_id = match candidate {
            Some(id) => id,
            None => {
                debug!(id_tag, "No usable connector for authorization");
                return AuthorizationStatus::Invalid;
            }
        };

        if self.queue.is_paused() {
            return self.authorize_offline(connector_id, id_tag).await;
        }

        let rx = self
            .queue
            .enqueue_async("Authorize", json!({ "idTag": id_tag }), QueueKind::Normal);
        let message = match rx.await {
            Ok(m) => m,
            Err(_) => return AuthorizationStatus::Invalid,
        };

        if message.offline() {
            return self.authorize_offline(connector_id, id_tag).await;
        }

        let response: AuthorizeResponse = match message.result().and_then(|v| serde_json::from_value(v.clone()).ok()) {
            Some(r) => r,
            None => return AuthorizationStatus::Invalid,
        };

        if self.device_model.authorization_cache_enabled() {
            let _ = self
                .storage
                .cache_authorization(id_tag, &response.id_tag_info)
                .await;
        }

        if response.id_tag_info.status == AuthorizationStatus::Accepted {
            self.bind_tag(connector_id, id_tag, response.id_tag_info.parent_id_tag.clone());
        }
        response.id_tag_info.status
    }

    async fn authorize_offline(
        &self,
        connector_id: i32,
        id_tag: &str,
    ) -> AuthorizationStatus {
        if self.device_model.allow_offline_tx_for_unknown_id() {
            info!(id_tag, "Offline: accepting unknown tag");
            self.bind_tag(connector_id, id_tag, None);
            return AuthorizationStatus::Accepted;
        }

        if !self.device_model.local_authorize_offline() {
            return AuthorizationStatus::Invalid;
        }

        let info = self.lookup_local_authorization(id_tag).await;
        match info {
            Some(info) => {
                let expired = info
                    .expiry_date
                    .map_or(false, |expiry| expiry <= Utc::now());
                if expired {
                    return AuthorizationStatus::Expired;
                }
                if info.status == AuthorizationStatus::Accepted {
                    self.bind_tag(connector_id, id_tag, info.parent_id_tag);
                }
                info.status
            }
            None => AuthorizationStatus::Invalid,
        }
    }

    async fn lookup_local_authorization(&self, id_tag: &str) -> Option<IdTagInfo> {
        if self.device_model.local_auth_list_enabled() {
            if let Ok(Some(info)) = self.storage.local_list_entry(id_tag).await {
                return Some(info);
            }
        }
        if self.device_model.authorization_cache_enabled() {
            if let Ok(Some(cached)) = self.storage.cached_authorization(id_tag).await {
                return Some(cached.info);
            }
        }
        None
    }

    /// Bind an accepted tag to a connector and arm the cable timeout.
    fn bind_tag(&self, connector_id: i32, id_tag: &str, parent_id_tag: Option<String>) {
        let start_now = {
            let mut slots = self.slots.lock().unwrap();
            let slot = match slots.get_mut(&connector_id) {
                Some(s) => s,
                None => return,
            };
            slot.authorized = Some(AuthorizedTag {
                id_tag: id_tag.to_string(),
                parent_id_tag,
            });
            if let Some(handle) = slot.connect_timeout.take() {
                handle.abort();
            }
            slot.session.is_some()
        };

        self.apply_event(connector_id, ConnectorEvent::UsageInitiated);

        if start_now {
            self.start_transaction(connector_id);
            return;
        }

        // cable must arrive within ConnectionTimeOut seconds
        let timeout = self.device_model.connection_timeout().max(1) as u64;
        let manager = self.me();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout)).await;
            let expired = {
                let mut slots = manager.slots.lock().unwrap();
                match slots.get_mut(&connector_id) {
                    Some(slot) if slot.session.is_none() && !slot.has_active_transaction() => {
                        slot.authorized = None;
                        slot.connect_timeout = None;
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                info!(connector_id, "Connection timeout, discarding authorization");
                manager.apply_event(connector_id, ConnectorEvent::BecomeAvailable);
            }
        });
        if let Some(slot) = self.slots.lock().unwrap().get_mut(&connector_id) {
            slot.connect_timeout = Some(handle);
        }
    }

    // ── Session lifecycle ──────────────────────────────────────

    /// Cable attached / charging session initiated on a connector.
    pub fn start_session(
        &self,
        connector_id: i32,
        timestamp: DateTime<Utc>,
        energy_wh: f64,
        reservation_id: Option<i32>,
    ) {
        let (authorized, reserved) = {
            let mut slots = self.slots.lock().unwrap();
            let slot = match slots.get_mut(&connector_id) {
                Some(s) if s.connector.id != 0 => s,
                _ => return,
            };
            if !slot.connector.is_operative()
                || slot.connector.status() == ChargePointStatus::Unavailable
            {
                warn!(connector_id, "Ignoring session start on unavailable connector");
                return;
            }
            if let Some(handle) = slot.connect_timeout.take() {
                handle.abort();
            }
            slot.session = Some(SessionState {
                started_at: Some(timestamp),
                start_energy_wh: Some(energy_wh),
                reservation_id,
            });
            (
                slot.authorized.is_some(),
                slot.connector.status() == ChargePointStatus::Reserved,
            )
        };

        if !reserved {
            self.apply_event(connector_id, ConnectorEvent::UsageInitiated);
        }

        if authorized {
            self.start_transaction(connector_id);
        }
    }

    /// Build and enqueue StartTransaction once a session has both an
    /// authorized tag and an attached cable.
    pub fn start_transaction(&self, connector_id: i32) {
        let (payload, placeholder_id) = {
            let mut slots = self.slots.lock().unwrap();
            let slot = match slots.get_mut(&connector_id) {
                Some(s) => s,
                None => return,
            };
            if slot.has_active_transaction() {
                return;
            }
            let tag = match &slot.authorized {
                Some(t) => t.clone(),
                None => return,
            };
            let session = slot.session.clone().unwrap_or_default();
            let started_at = session.started_at.unwrap_or_else(Utc::now);
            let meter_start = session.start_energy_wh.unwrap_or(0.0).round() as i32;

            // a reservation held by this tag is consumed by the session
            let reservation_id = match &slot.connector.reservation {
                Some(r) if r.id_tag == tag.id_tag => {
                    let id = r.reservation_id;
                    slot.connector.reservation = None;
                    Some(id)
                }
                _ => session.reservation_id,
            };

            let placeholder_id = self.next_placeholder.fetch_sub(1, Ordering::SeqCst);
            let transaction = Transaction::new(
                placeholder_id,
                connector_id,
                tag.id_tag.clone(),
                meter_start,
                started_at,
                reservation_id,
            );

            let request = StartTransactionRequest {
                connector_id: connector_id as u32,
                id_tag: tag.id_tag.clone(),
                meter_start,
                reservation_id,
                timestamp: started_at,
            };
            slot.transaction = Some(transaction);
            (
                serde_json::to_value(&request).unwrap_or_default(),
                placeholder_id,
            )
        };

        info!(connector_id, placeholder_id, "Starting transaction");
        let rx = self
            .queue
            .enqueue_async("StartTransaction", payload, QueueKind::Transactional);

        let manager = self.me();
        tokio::spawn(async move {
            if let Ok(message) = rx.await {
                manager
                    .on_start_transaction_response(connector_id, placeholder_id, message.result().cloned())
                    .await;
            }
        });

        self.apply_event(connector_id, ConnectorEvent::StartCharging);
        self.start_sampler(connector_id);

        let manager = self.me();
        tokio::spawn(async move {
            manager.evse.enable(connector_id).await;
            let started_at = manager
                .slots
                .lock()
                .unwrap()
                .get(&connector_id)
                .and_then(|s| s.transaction.as_ref().map(|t| t.started_at));
            let limit = manager
                .smart_charging
                .current_limit_amps(connector_id, started_at);
            manager.evse.set_max_current(connector_id, limit).await;
        });
    }

    async fn on_start_transaction_response(
        &self,
        connector_id: i32,
        placeholder_id: i32,
        result: Option<serde_json::Value>,
    ) {
        let response: StartTransactionResponse = match result.and_then(|v| serde_json::from_value(v).ok()) {
            Some(r) => r,
            None => {
                warn!(connector_id, "StartTransaction unresolved, keeping placeholder id");
                return;
            }
        };

        info!(
            connector_id,
            transaction_id = response.transaction_id,
            "Transaction id assigned"
        );

        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(&connector_id) {
                if let Some(tx) = slot.transaction.as_mut() {
                    if tx.placeholder_id == placeholder_id {
                        tx.transaction_id = response.transaction_id;
                    }
                }
            }
        }

        // any StopTransaction parked behind this one gets the real id
        self.queue
            .rewrite_stopped_transaction_id(placeholder_id, response.transaction_id);

        if self.device_model.authorization_cache_enabled() {
            let id_tag = self
                .slots
                .lock()
                .unwrap()
                .get(&connector_id)
                .and_then(|s| s.transaction.as_ref().map(|t| t.id_tag.clone()));
            if let Some(id_tag) = id_tag {
                let _ = self
                    .storage
                    .cache_authorization(&id_tag, &response.id_tag_info)
                    .await;
            }
        }

        if response.id_tag_info.status != AuthorizationStatus::Accepted
            && self.device_model.stop_transaction_on_invalid_id()
        {
            warn!(connector_id, "Transaction deauthorized by central system");
            if self.device_model.max_energy_on_invalid_id().is_some() {
                // a bounded amount of energy is still allowed; the supply
                // side suspends instead of ending the transaction
                self.apply_event(connector_id, ConnectorEvent::PauseChargingEvse);
                self.evse.pause_charging(connector_id).await;
            } else {
                self.stop_transaction(connector_id, Reason::DeAuthorized, None).await;
            }
        }
    }

    /// Enqueue StopTransaction with the accumulated sample data.
    pub async fn stop_transaction(
        &self,
        connector_id: i32,
        reason: Reason,
        id_tag: Option<String>,
    ) {
        let latest_energy = self
            .readings
            .get(&connector_id)
            .and_then(|r| r.energy_wh_import.total)
            .map(|wh| wh.round() as i32);

        let (payload, had_transaction) = {
            let mut slots = self.slots.lock().unwrap();
            let slot = match slots.get_mut(&connector_id) {
                Some(s) => s,
                None => return,
            };
            let tx = match slot.transaction.as_mut() {
                Some(t) if !t.finished => t,
                _ => return,
            };
            if let Some(handle) = slot.sampler.take() {
                handle.abort();
            }

            let meter_stop = latest_energy.unwrap_or(tx.meter_start_wh);

            let transaction_data = if tx.transaction_data.is_empty() {
                None
            } else {
                Some(tx.transaction_data.clone())
            };

            let request = StopTransactionRequest {
                id_tag: id_tag.clone().or_else(|| Some(tx.id_tag.clone())),
                meter_stop,
                timestamp: Utc::now(),
                transaction_id: tx.transaction_id,
                reason: Some(reason.clone()),
                transaction_data,
            };
            tx.finished = true;
            slot.authorized = None;
            slot.session = None;
            (serde_json::to_value(&request).unwrap_or_default(), true)
        };

        if !had_transaction {
            return;
        }

        info!(connector_id, ?reason, "Stopping transaction");
        self.smart_charging.clear_tx_profiles(connector_id);
        let rx = self
            .queue
            .enqueue_async("StopTransaction", payload, QueueKind::Transactional);

        self.apply_event(
            connector_id,
            ConnectorEvent::TransactionStoppedAndUserActionRequired,
        );

        if reason == Reason::EVDisconnected
            && self.device_model.unlock_connector_on_ev_side_disconnect()
        {
            self.evse.unlock_connector(connector_id).await;
        }

        let manager = self.me();
        tokio::spawn(async move {
            if let Ok(message) = rx.await {
                manager
                    .on_stop_transaction_response(connector_id, message.result().cloned())
                    .await;
            }
        });
    }

    async fn on_stop_transaction_response(
        &self,
        connector_id: i32,
        result: Option<serde_json::Value>,
    ) {
        if let Some(response) = result
            .and_then(|v| serde_json::from_value::<StopTransactionResponse>(v).ok())
        {
            if let Some(info) = response.id_tag_info {
                // cache invalidation hook: the final verdict replaces the
                // cached one
                if self.device_model.authorization_cache_enabled() {
                    let id_tag = self
                        .slots
                        .lock()
                        .unwrap()
                        .get(&connector_id)
                        .and_then(|s| s.transaction.as_ref().map(|t| t.id_tag.clone()));
                    if let Some(id_tag) = id_tag {
                        let _ = self.storage.cache_authorization(&id_tag, &info).await;
                    }
                }
            }
        }

        let pending = {
            let mut slots = self.slots.lock().unwrap();
            match slots.get_mut(&connector_id) {
                Some(slot) => {
                    slot.transaction = None;
                    slot.connector.pending_availability.take()
                }
                None => None,
            }
        };

        // an availability change answered Scheduled applies now
        if let Some(availability) = pending {
            self.apply_availability(connector_id, availability).await;
        }
    }

    /// Cable removed on a connector.
    pub async fn stop_session(&self, connector_id: i32) {
        let active = {
            let slots = self.slots.lock().unwrap();
            slots
                .get(&connector_id)
                .map_or(false, |s| s.has_active_transaction())
        };
        if active {
            if self.device_model.stop_transaction_on_ev_side_disconnect() {
                self.stop_transaction(connector_id, Reason::EVDisconnected, None)
                    .await;
            } else {
                self.apply_event(connector_id, ConnectorEvent::PauseChargingEv);
                return;
            }
        }
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(&connector_id) {
                slot.session = None;
                slot.authorized = None;
            }
        }
        self.apply_event(connector_id, ConnectorEvent::BecomeAvailable);
    }

    /// Locally cancel a session that never became (or no longer is) a
    /// valid transaction.
    async fn cancel_session_local(&self, connector_id: i32, reason: Reason) {
        let active = {
            let slots = self.slots.lock().unwrap();
            slots
                .get(&connector_id)
                .map_or(false, |s| s.has_active_transaction())
        };
        if active {
            self.stop_transaction(connector_id, reason, None).await;
        } else {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(&connector_id) {
                slot.authorized = None;
                slot.session = None;
                if let Some(handle) = slot.connect_timeout.take() {
                    handle.abort();
                }
            }
            drop(slots);
            self.apply_event(connector_id, ConnectorEvent::BecomeAvailable);
        }
        self.evse.cancel_charging(connector_id, "DeAuthorized").await;
    }

    // ── Metering ───────────────────────────────────────────────

    /// Record the latest reading pushed by the meter hardware.
    pub fn receive_power_meter(&self, connector_id: i32, reading: PowerMeterReading) {
        self.readings.insert(connector_id, reading);
    }

    fn start_sampler(&self, connector_id: i32) {
        let interval_s = self.device_model.meter_value_sample_interval();
        if interval_s <= 0 {
            return;
        }
        let manager = self.me();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval_s as u64));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                manager.sample_transaction(connector_id, ReadingContext::SamplePeriodic);
            }
        });
        if let Some(slot) = self.slots.lock().unwrap().get_mut(&connector_id) {
            if let Some(old) = slot.sampler.replace(handle) {
                old.abort();
            }
        }
    }

    /// Take one sampled meter value for a running transaction and queue
    /// it; the sample also joins the StopTransaction `transactionData`.
    pub fn sample_transaction(&self, connector_id: i32, context: ReadingContext) {
        let reading = match self.readings.get(&connector_id) {
            Some(r) => r.clone(),
            None => return,
        };
        let configured = self.device_model.meter_values_sampled_data();
        let meter_value = build_meter_value(&reading, &configured, context);
        if meter_value.sampled_value.is_empty() {
            return;
        }

        let transaction_id = {
            let mut slots = self.slots.lock().unwrap();
            let slot = match slots.get_mut(&connector_id) {
                Some(s) => s,
                None => return,
            };
            match slot.transaction.as_mut() {
                Some(tx) if !tx.finished => {
                    tx.transaction_data.push(meter_value.clone());
                    tx.transaction_id
                }
                _ => return,
            }
        };

        let request = MeterValuesRequest {
            connector_id: connector_id as u32,
            transaction_id: Some(transaction_id),
            meter_value: vec![meter_value],
        };
        self.queue.enqueue(
            "MeterValues",
            serde_json::to_value(&request).unwrap_or_default(),
            QueueKind::Transactional,
        );
    }

    /// Clock-aligned samples run on every connector, transaction or not.
    pub fn sample_clock_aligned(&self) {
        let configured = self.device_model.meter_values_aligned_data();
        if configured.is_empty() {
            return;
        }
        let readings: Vec<(i32, PowerMeterReading)> = self
            .readings
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (connector_id, reading) in readings {
            let meter_value = build_meter_value(&reading, &configured, ReadingContext::SampleClock);
            if meter_value.sampled_value.is_empty() {
                continue;
            }
            let transaction_id = {
                let slots = self.slots.lock().unwrap();
                slots
                    .get(&connector_id)
                    .and_then(|s| s.transaction.as_ref())
                    .filter(|t| !t.finished)
                    .map(|t| t.transaction_id)
            };
            let request = MeterValuesRequest {
                connector_id: connector_id as u32,
                transaction_id,
                meter_value: vec![meter_value],
            };
            self.queue.enqueue(
                "MeterValues",
                serde_json::to_value(&request).unwrap_or_default(),
                QueueKind::Normal,
            );
        }
    }

    /// Trigger a single MeterValues report for one connector.
    pub fn sample_on_trigger(&self, connector_id: i32) {
        let reading = match self.readings.get(&connector_id) {
            Some(r) => r.clone(),
            None => return,
        };
        let configured = self.device_model.meter_values_sampled_data();
        let meter_value = build_meter_value(&reading, &configured, ReadingContext::Trigger);
        let request = MeterValuesRequest {
            connector_id: connector_id as u32,
            transaction_id: None,
            meter_value: vec![meter_value],
        };
        self.queue.enqueue(
            "MeterValues",
            serde_json::to_value(&request).unwrap_or_default(),
            QueueKind::Normal,
        );
    }

    // ── Remote start / stop ────────────────────────────────────

    pub fn remote_start_transaction(
        &self,
        connector_id: Option<i32>,
        id_tag: &str,
        charging_profile: Option<ChargingProfile>,
    ) -> RemoteStartStopStatus {
        let target = {
            let slots = self.slots.lock().unwrap();
            let usable = |s: &Slot| {
                s.connector.id != 0
                    && s.connector.is_operative()
                    && !s.has_active_transaction()
                    && s.connector.status() != ChargePointStatus::Faulted
                    && s.connector.status() != ChargePointStatus::Unavailable
                    && match &s.connector.reservation {
                        Some(r) => r.id_tag == id_tag,
                        None => true,
                    }
            };
            match connector_id {
                Some(id) => slots.get(&id).filter(|s| usable(s)).map(|s| s.connector.id),
                None => {
                    let mut candidates: Vec<i32> = slots
                        .values()
                        .filter(|s| usable(s))
                        .map(|s| s.connector.id)
                        .collect();
                    candidates.sort();
                    candidates.first().copied()
                }
            }
        };

        let connector_id = match target {
            Some(id) => id,
            None => return RemoteStartStopStatus::Rejected,
        };

        if let Some(profile) = charging_profile {
            if self
                .smart_charging
                .add_remote_start_profile(connector_id, profile)
                .is_err()
            {
                return RemoteStartStopStatus::Rejected;
            }
        }

        info!(connector_id, id_tag, "Remote start accepted");
        if self.device_model.authorize_remote_tx_requests() {
            let manager = self.me();
            let id_tag = id_tag.to_string();
            tokio::spawn(async move {
                let status = manager.authorize_id_tag(&id_tag).await;
                if status != AuthorizationStatus::Accepted {
                    warn!(id_tag = id_tag.as_str(), ?status, "Remote start authorization failed");
                }
            });
        } else {
            self.bind_tag(connector_id, id_tag, None);
        }
        RemoteStartStopStatus::Accepted
    }

    pub async fn remote_stop_transaction(&self, transaction_id: i32) -> RemoteStartStopStatus {
        let connector_id = {
            let slots = self.slots.lock().unwrap();
            slots
                .values()
                .find(|s| {
                    s.transaction
                        .as_ref()
                        .map_or(false, |t| !t.finished && t.transaction_id == transaction_id)
                })
                .map(|s| s.connector.id)
        };
        match connector_id {
            Some(connector_id) => {
                self.stop_transaction(connector_id, Reason::Remote, None).await;
                self.evse.cancel_charging(connector_id, "Remote").await;
                RemoteStartStopStatus::Accepted
            }
            None => RemoteStartStopStatus::Rejected,
        }
    }

    // ── Reservations ───────────────────────────────────────────

    pub fn reserve_now(
        &self,
        connector_id: i32,
        expiry_date: DateTime<Utc>,
        id_tag: &str,
        parent_id_tag: Option<String>,
        reservation_id: i32,
    ) -> ReservationStatus {
        if connector_id == 0 && !self.device_model.reserve_connector_zero_supported() {
            return ReservationStatus::Rejected;
        }

        let mut slots = self.slots.lock().unwrap();
        let slot = match slots.get_mut(&connector_id) {
            Some(s) => s,
            None => return ReservationStatus::Rejected,
        };

        match slot.connector.status() {
            ChargePointStatus::Faulted => return ReservationStatus::Faulted,
            ChargePointStatus::Unavailable => return ReservationStatus::Unavailable,
            ChargePointStatus::Charging
            | ChargePointStatus::SuspendedEV
            | ChargePointStatus::SuspendedEVSE
            | ChargePointStatus::Preparing
            | ChargePointStatus::Finishing => return ReservationStatus::Occupied,
            ChargePointStatus::Reserved => {
                // replacing an existing reservation is only allowed for
                // the same reservation id
                if slot
                    .connector
                    .reservation
                    .as_ref()
                    .map_or(false, |r| r.reservation_id != reservation_id)
                {
                    return ReservationStatus::Occupied;
                }
            }
            ChargePointStatus::Available => {}
        }

        slot.connector.reservation = Some(Reservation {
            reservation_id,
            id_tag: id_tag.to_string(),
            parent_id_tag,
            expiry_date,
        });
        let transition = slot
            .connector
            .state_machine
            .apply(ConnectorEvent::ReserveConnector);
        drop(slots);

        if let Some(t) = transition {
            self.send_status_notification(connector_id, t.to, t.error_code);
        }
        info!(connector_id, reservation_id, "Reservation placed");
        ReservationStatus::Accepted
    }

    pub fn cancel_reservation(&self, reservation_id: i32) -> bool {
        let connector_id = {
            let mut slots = self.slots.lock().unwrap();
            let hit = slots.values_mut().find(|s| {
                s.connector
                    .reservation
                    .as_ref()
                    .map_or(false, |r| r.reservation_id == reservation_id)
            });
            match hit {
                Some(slot) => {
                    slot.connector.reservation = None;
                    Some(slot.connector.id)
                }
                None => None,
            }
        };
        match connector_id {
            Some(connector_id) => {
                self.apply_event(connector_id, ConnectorEvent::BecomeAvailable);
                info!(connector_id, reservation_id, "Reservation cancelled");
                true
            }
            None => false,
        }
    }

    /// Periodic tick releasing expired reservations.
    pub fn expire_reservations(&self) {
        let now = Utc::now();
        let expired: Vec<i32> = {
            let mut slots = self.slots.lock().unwrap();
            let mut expired = Vec::new();
            for s in slots.values_mut() {
                if s.connector.expire_reservation(now) {
                    expired.push(s.connector.id);
                }
            }
            expired
        };
        for connector_id in expired {
            info!(connector_id, "Reservation expired");
            self.apply_event(connector_id, ConnectorEvent::BecomeAvailable);
        }
    }

    // ── Availability / unlock / reset ──────────────────────────

    /// Handle a ChangeAvailability request. Busy connectors answer
    /// `Scheduled` and apply the change when their transaction ends.
    pub async fn change_availability(
        &self,
        connector_id: i32,
        availability: Availability,
    ) -> AvailabilityStatus {
        let targets: Vec<i32> = if connector_id == 0 {
            let slots = self.slots.lock().unwrap();
            let mut ids: Vec<i32> = slots.keys().copied().collect();
            ids.sort();
            ids
        } else if self.slots.lock().unwrap().contains_key(&connector_id) {
            vec![connector_id]
        } else {
            return AvailabilityStatus::Rejected;
        };

        let mut scheduled = false;
        for target in targets {
            let busy = {
                let mut slots = self.slots.lock().unwrap();
                let slot = slots.get_mut(&target).unwrap();
                if slot.has_active_transaction() {
                    slot.connector.pending_availability = Some(availability);
                    true
                } else {
                    false
                }
            };
            if busy {
                scheduled = true;
            } else {
                self.apply_availability(target, availability).await;
            }
        }

        if scheduled {
            AvailabilityStatus::Scheduled
        } else {
            AvailabilityStatus::Accepted
        }
    }

    async fn apply_availability(&self, connector_id: i32, availability: Availability) {
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(&connector_id) {
                slot.connector.availability = availability;
            }
        }
        let operative = availability == Availability::Operative;
        if let Err(e) = self.storage.save_availability(connector_id, operative).await {
            warn!(connector_id, error = %e, "Failed to persist availability");
        }
        let event = if operative {
            ConnectorEvent::BecomeAvailable
        } else {
            ConnectorEvent::ChangeAvailabilityToUnavailable
        };
        self.apply_event(connector_id, event);

        let manager = self.me();
        tokio::spawn(async move {
            if operative {
                manager.evse.enable(connector_id).await;
            } else {
                manager.evse.disable(connector_id).await;
            }
        });
    }

    /// UnlockConnector: stop a running transaction first, then ask the
    /// power path to release the latch.
    pub async fn unlock_connector(&self, connector_id: i32) -> UnlockStatus {
        let valid = {
            let slots = self.slots.lock().unwrap();
            slots.contains_key(&connector_id) && connector_id != 0
        };
        if !valid {
            return UnlockStatus::NotSupported;
        }

        let active = {
            let slots = self.slots.lock().unwrap();
            slots
                .get(&connector_id)
                .map_or(false, |s| s.has_active_transaction())
        };
        if active {
            self.stop_transaction(connector_id, Reason::UnlockCommand, None)
                .await;
        }

        if self.evse.unlock_connector(connector_id).await {
            UnlockStatus::Unlocked
        } else {
            UnlockStatus::UnlockFailed
        }
    }

    /// Stop every running transaction (Reset). Hard resets report
    /// `HardReset`, soft resets `SoftReset`.
    pub async fn stop_all_transactions(&self, reason: Reason) {
        let active: Vec<i32> = {
            let slots = self.slots.lock().unwrap();
            slots
                .values()
                .filter(|s| s.has_active_transaction())
                .map(|s| s.connector.id)
                .collect()
        };
        for connector_id in active {
            self.stop_transaction(connector_id, reason.clone(), None).await;
        }
    }

    pub fn active_transaction_id(&self, connector_id: i32) -> Option<i32> {
        self.slots
            .lock()
            .unwrap()
            .get(&connector_id)
            .and_then(|s| s.transaction.as_ref())
            .filter(|t| !t.finished)
            .map(|t| t.transaction_id)
    }

    pub fn has_active_transactions(&self) -> bool {
        self.slots
            .lock()
            .unwrap()
            .values()
            .any(|s| s.has_active_transaction())
    }

    /// Re-arm the sampler of every running transaction (hot config
    /// change of the sample interval).
    pub fn restart_samplers(&self) {
        let active: Vec<i32> = {
            let slots = self.slots.lock().unwrap();
            slots
                .values()
                .filter(|s| s.has_active_transaction())
                .map(|s| s.connector.id)
                .collect()
        };
        for connector_id in active {
            self.start_sampler(connector_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::{EvseCommand, SimEvse};
    use crate::drivers::Measurement;
    use crate::queue::SendGate;
    use crate::storage::MemoryStorage;
    use crate::support::ocpp_frame::OcppFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Rig {
        manager: Arc<TransactionManager>,
        queue: Arc<MessageQueue>,
        device_model: Arc<DeviceModel>,
        evse: Arc<SimEvse>,
    }

    async fn rig() -> Rig {
        let device_model = Arc::new(DeviceModel::new());
        let queue = Arc::new(MessageQueue::new(device_model.clone()));
        let storage = Arc::new(MemoryStorage::new());
        let evse = Arc::new(SimEvse::new());
        let smart_charging = Arc::new(SmartChargingHandler::new(
            device_model.clone(),
            storage.clone(),
        ));
        let manager = TransactionManager::new(
            device_model.clone(),
            queue.clone(),
            storage,
            evse.clone(),
            smart_charging,
        );
        manager.initialize().await;
        Rig {
            manager,
            queue,
            device_model,
            evse,
        }
    }

    fn connect(queue: &MessageQueue) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        queue.resume(tx);
        queue.set_gate(SendGate::All);
        rx
    }

    async fn respond(queue: &MessageQueue, sent: &str, payload: serde_json::Value) {
        let frame = OcppFrame::parse(sent).unwrap();
        queue.handle_response(&OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload,
        });
        // let the spawned response task run
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn offline_authorization_for_unknown_id() {
        let rig = rig().await;
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;
        // transport down: queue never resumed

        let status = rig.manager.authorize_id_tag("X").await;
        assert_eq!(status, AuthorizationStatus::Accepted);

        // the tag is bound locally
        let slots = rig.manager.slots.lock().unwrap();
        let bound = slots
            .values()
            .any(|s| s.authorized.as_ref().map_or(false, |t| t.id_tag == "X"));
        assert!(bound);
    }

    #[tokio::test]
    async fn offline_authorization_via_cache() {
        let rig = rig().await;
        rig.manager
            .storage
            .cache_authorization(
                "CACHED",
                &IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    expiry_date: None,
                    parent_id_tag: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            rig.manager.authorize_id_tag("CACHED").await,
            AuthorizationStatus::Accepted
        );
        // unknown tags stay invalid when offline pass-through is off
        assert_eq!(
            rig.manager.authorize_id_tag("UNKNOWN").await,
            AuthorizationStatus::Invalid
        );
    }

    #[tokio::test]
    async fn remote_start_on_reserved_connector_needs_matching_tag() {
        let rig = rig().await;
        let _wire = connect(&rig.queue);

        let status = rig.manager.reserve_now(
            1,
            Utc::now() + chrono::Duration::minutes(30),
            "ABC",
            None,
            7,
        );
        assert_eq!(status, ReservationStatus::Accepted);
        assert_eq!(
            rig.manager.connector_status(1),
            Some(ChargePointStatus::Reserved)
        );

        // wrong tag is refused, state unchanged; connector 2 is free but
        // an explicit connector id pins the check to the reserved one
        let status = rig
            .manager
            .remote_start_transaction(Some(1), "XYZ", None);
        assert_eq!(status, RemoteStartStopStatus::Rejected);
        assert_eq!(
            rig.manager.connector_status(1),
            Some(ChargePointStatus::Reserved)
        );

        // the reservation holder is accepted
        let status = rig
            .manager
            .remote_start_transaction(Some(1), "ABC", None);
        assert_eq!(status, RemoteStartStopStatus::Accepted);
    }

    #[tokio::test]
    async fn stop_transaction_id_rewritten_across_reconnect() {
        let rig = rig().await;
        // offline: session starts and stops while disconnected
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;

        assert_eq!(
            rig.manager.authorize_id_tag("TAG").await,
            AuthorizationStatus::Accepted
        );
        rig.manager.start_session(1, Utc::now(), 100.0, None);
        tokio::task::yield_now().await;

        rig.manager
            .receive_power_meter(1, PowerMeterReading::energy(0, 1300.0));
        rig.manager
            .stop_transaction(1, Reason::Local, None)
            .await;
        tokio::task::yield_now().await;

        // both transactional calls are parked, start before stop
        let pending = rig.queue.pending_actions();
        let start_pos = pending.iter().position(|a| a == "StartTransaction").unwrap();
        let stop_pos = pending.iter().position(|a| a == "StopTransaction").unwrap();
        assert!(start_pos < stop_pos);

        // reconnect: StartTransactionResponse assigns id 42
        let mut wire = connect(&rig.queue);
        let stop = loop {
            rig.queue.try_dispatch();
            let sent = wire.recv().await.unwrap();
            if sent.contains("StartTransaction") {
                respond(
                    &rig.queue,
                    &sent,
                    json!({"transactionId": 42, "idTagInfo": {"status": "Accepted"}}),
                )
                .await;
            } else if sent.contains("StopTransaction") {
                break sent;
            } else {
                respond(&rig.queue, &sent, json!({})).await;
            }
        };
        assert!(stop.contains("\"transactionId\":42"));
        assert!(stop.contains("\"meterStop\":1300"));
    }

    #[tokio::test]
    async fn change_availability_while_charging_is_scheduled() {
        let rig = rig().await;
        let mut wire = connect(&rig.queue);
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;

        // drive connector 1 into a transaction
        rig.manager.bind_tag(1, "TAG", None);
        rig.manager.start_session(1, Utc::now(), 0.0, None);
        tokio::task::yield_now().await;
        assert_eq!(
            rig.manager.connector_status(1),
            Some(ChargePointStatus::Charging)
        );

        let status = rig
            .manager
            .change_availability(1, Availability::Inoperative)
            .await;
        assert_eq!(status, AvailabilityStatus::Scheduled);
        // still charging until the transaction ends
        assert_eq!(
            rig.manager.connector_status(1),
            Some(ChargePointStatus::Charging)
        );

        rig.manager.stop_transaction(1, Reason::Local, None).await;

        // flush the queue until the StopTransactionResponse went through
        loop {
            rig.queue.try_dispatch();
            let sent = wire.recv().await.unwrap();
            if sent.contains("StartTransaction") {
                respond(
                    &rig.queue,
                    &sent,
                    json!({"transactionId": 9, "idTagInfo": {"status": "Accepted"}}),
                )
                .await;
            } else if sent.contains("StopTransaction") {
                respond(&rig.queue, &sent, json!({})).await;
                break;
            } else {
                respond(&rig.queue, &sent, json!({})).await;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            rig.manager.connector_status(1),
            Some(ChargePointStatus::Unavailable)
        );
    }

    #[tokio::test]
    async fn second_tap_of_same_tag_cancels_session() {
        let rig = rig().await;
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;

        assert_eq!(
            rig.manager.authorize_id_tag("TAG").await,
            AuthorizationStatus::Accepted
        );
        // tapping again cancels the pending session
        assert_eq!(
            rig.manager.authorize_id_tag("TAG").await,
            AuthorizationStatus::Invalid
        );
        let slots = rig.manager.slots.lock().unwrap();
        assert!(slots.values().all(|s| s.authorized.is_none()));
    }

    #[tokio::test]
    async fn authorize_rejected_when_no_connector_free() {
        let rig = rig().await;
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;

        // occupy both connectors
        for (connector, tag) in [(1, "A"), (2, "B")] {
            rig.manager.bind_tag(connector, tag, None);
            rig.manager.start_session(connector, Utc::now(), 0.0, None);
            tokio::task::yield_now().await;
        }
        assert_eq!(
            rig.manager.authorize_id_tag("C").await,
            AuthorizationStatus::Invalid
        );
    }

    #[tokio::test]
    async fn ev_disconnect_unlocks_when_configured() {
        let rig = rig().await;
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;
        rig.manager.bind_tag(1, "TAG", None);
        rig.manager.start_session(1, Utc::now(), 0.0, None);
        tokio::task::yield_now().await;

        rig.manager.stop_session(1).await;
        tokio::task::yield_now().await;

        assert!(rig
            .evse
            .commands()
            .contains(&EvseCommand::Unlock(1)));
    }

    #[tokio::test]
    async fn meter_samples_accumulate_into_transaction_data() {
        let rig = rig().await;
        rig.device_model.set("AllowOfflineTxForUnknownId", "true").await;
        rig.manager.bind_tag(1, "TAG", None);
        rig.manager.start_session(1, Utc::now(), 0.0, None);
        tokio::task::yield_now().await;

        rig.manager.receive_power_meter(
            1,
            PowerMeterReading {
                timestamp: 1704067200,
                energy_wh_import: Measurement::total(500.0),
                ..Default::default()
            },
        );
        rig.manager
            .sample_transaction(1, ReadingContext::SamplePeriodic);

        let slots = rig.manager.slots.lock().unwrap();
        let tx = slots.get(&1).unwrap().transaction.as_ref().unwrap();
        assert_eq!(tx.transaction_data.len(), 1);
        assert_eq!(tx.transaction_data[0].sampled_value[0].value, "500");
    }

    #[tokio::test]
    async fn reservation_expiry_frees_connector() {
        let rig = rig().await;
        let _wire = connect(&rig.queue);
        rig.manager
            .reserve_now(1, Utc::now() - chrono::Duration::seconds(1), "ABC", None, 3);
        // already expired: the next tick releases it
        rig.manager.expire_reservations();
        assert_eq!(
            rig.manager.connector_status(1),
            Some(ChargePointStatus::Available)
        );
    }
}
