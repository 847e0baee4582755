//! Charge point runtime
//!
//! Wires the components together and drives the event loop: link events
//! into the dispatcher, boot handshake on connect, heartbeat and
//! clock-aligned timers, reservation expiry and runtime commands
//! (reset, reconnect).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::boot::{BootCoordinator, BootOutcome};
use crate::config::AppConfig;
use crate::device_model::{ConfigChange, DeviceModel, KnownKey};
use crate::dispatcher::{Dispatcher, ResetKind, RuntimeCommand};
use crate::drivers::{CertStore, EvseDriver, FileAgent, PowerMeterReading};
use crate::link::{LinkEvent, WebSocketLink};
use crate::queue::{MessageQueue, QueueKind};
use crate::smart_charging::SmartChargingHandler;
use crate::storage::Storage;
use crate::support::security::SecurityEvent;
use crate::transaction::TransactionManager;

/// How often expired reservations are collected.
const RESERVATION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct ChargePoint {
    me: std::sync::Weak<ChargePoint>,
    pub device_model: Arc<DeviceModel>,
    pub queue: Arc<MessageQueue>,
    pub storage: Arc<dyn Storage>,
    pub transactions: Arc<TransactionManager>,
    pub smart_charging: Arc<SmartChargingHandler>,
    pub boot: Arc<BootCoordinator>,
    pub dispatcher: Arc<Dispatcher>,
    link: Arc<WebSocketLink>,
    events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    commands: Mutex<Option<mpsc::UnboundedReceiver<RuntimeCommand>>>,
    command_tx: mpsc::UnboundedSender<RuntimeCommand>,
    wire: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ChargePoint {
    pub async fn new(
        config: &AppConfig,
        storage: Arc<dyn Storage>,
        evse: Arc<dyn EvseDriver>,
        cert_store: Arc<dyn CertStore>,
        file_agent: Arc<dyn FileAgent>,
    ) -> Arc<Self> {
        let device_model = Arc::new(DeviceModel::with_store(storage.clone()));
        if let Ok(snapshot) = storage.load_config().await {
            device_model.load_snapshot(snapshot);
        }
        Self::seed_identity(&device_model, config).await;

        let queue = Arc::new(MessageQueue::new(device_model.clone()));
        let smart_charging = Arc::new(SmartChargingHandler::new(
            device_model.clone(),
            storage.clone(),
        ));
        smart_charging.restore().await;

        let transactions = TransactionManager::new(
            device_model.clone(),
            queue.clone(),
            storage.clone(),
            evse.clone(),
            smart_charging.clone(),
        );
        transactions.initialize().await;

        let boot = Arc::new(BootCoordinator::new(device_model.clone(), queue.clone()));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            device_model.clone(),
            queue.clone(),
            storage.clone(),
            transactions.clone(),
            smart_charging.clone(),
            boot.clone(),
            cert_store.clone(),
            file_agent,
            evse,
            command_tx.clone(),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let link = Arc::new(WebSocketLink::new(
            device_model.clone(),
            cert_store,
            queue.clone(),
            event_tx,
        ));

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            device_model,
            queue,
            storage,
            transactions,
            smart_charging,
            boot,
            dispatcher,
            link,
            events: Mutex::new(Some(event_rx)),
            commands: Mutex::new(Some(command_rx)),
            command_tx,
            wire: Mutex::new(None),
        })
    }

    fn me(&self) -> Arc<Self> {
        self.me.upgrade().expect("charge point dropped while in use")
    }

    async fn seed_identity(device_model: &DeviceModel, config: &AppConfig) {
        let station = &config.station;
        device_model
            .set_internal(KnownKey::ChargePointId, &station.id)
            .await;
        device_model
            .set_internal(KnownKey::ChargePointModel, &station.model)
            .await;
        device_model
            .set_internal(KnownKey::ChargePointVendor, &station.vendor)
            .await;
        device_model
            .set_internal(
                KnownKey::NumberOfConnectors,
                &station.number_of_connectors.to_string(),
            )
            .await;
        if let Some(firmware) = &station.firmware_version {
            device_model
                .set_internal(KnownKey::FirmwareVersion, firmware)
                .await;
        }
        if let Some(serial) = &station.serial_number {
            device_model
                .set_internal(KnownKey::ChargePointSerialNumber, serial)
                .await;
        }
        device_model
            .set_internal(KnownKey::CentralSystemURI, &config.central_system.url)
            .await;
        device_model
            .set_internal(
                KnownKey::SecurityProfile,
                &config.central_system.security_profile.to_string(),
            )
            .await;
        if let Some(key) = &config.central_system.authorization_key {
            device_model
                .set_internal(KnownKey::AuthorizationKey, key)
                .await;
        }
    }

    // ── EVSE-facing API ────────────────────────────────────────

    /// Present a tag at the reader.
    pub async fn authorize(
        &self,
        id_tag: &str,
    ) -> rust_ocpp::v1_6::types::AuthorizationStatus {
        self.transactions.authorize_id_tag(id_tag).await
    }

    /// Cable plugged into a connector.
    pub fn plug_in(&self, connector_id: i32, energy_wh: f64) {
        self.transactions
            .start_session(connector_id, Utc::now(), energy_wh, None);
    }

    /// Cable removed from a connector.
    pub async fn plug_out(&self, connector_id: i32) {
        self.transactions.stop_session(connector_id).await;
    }

    /// New meter reading for a connector.
    pub fn receive_power_meter(&self, connector_id: i32, reading: PowerMeterReading) {
        self.transactions.receive_power_meter(connector_id, reading);
    }

    // ── Runtime ────────────────────────────────────────────────

    /// Run until a Reset is requested; returns its kind so the caller can
    /// exit (hard) or restart the stack (soft).
    pub async fn run(&self) -> ResetKind {
        let mut events = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("run() called twice");
        let mut commands = self.commands.lock().unwrap().take().expect("run() called twice");

        tokio::spawn(self.queue.clone().run());
        let mut link_task = tokio::spawn(self.link.clone().run());

        let heartbeat = self.spawn_heartbeat();
        let clock_aligned = self.spawn_clock_aligned();
        let reservations = self.spawn_reservation_sweep();
        let mut config_changes = self.device_model.subscribe();
        let mut current_profile = self.device_model.security_profile();

        self.dispatcher
            .security_event(SecurityEvent::StartupOfTheDevice, None);

        let reset = loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(LinkEvent::Connected(sender)) => {
                            *self.wire.lock().unwrap() = Some(sender);
                            self.boot.on_connected();
                            self.drive_boot();
                        }
                        Some(LinkEvent::Disconnected) => {
                            self.boot.on_disconnected();
                        }
                        Some(LinkEvent::Message(text)) => {
                            if let Some(response) = self.dispatcher.handle(&text).await {
                                self.send_raw(response);
                            }
                        }
                        Some(LinkEvent::CertificateExpiresIn(seconds)) => {
                            info!(seconds, "Client certificate expiry; reconnect scheduled");
                            let command_tx = self.command_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_secs(seconds.max(0) as u64)).await;
                                let _ = command_tx.send(RuntimeCommand::Reconnect);
                            });
                        }
                        None => {
                            error!("Link event channel closed");
                            break ResetKind::Soft;
                        }
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(RuntimeCommand::Reset(kind)) => {
                            info!(?kind, "Reset requested");
                            break kind;
                        }
                        Some(RuntimeCommand::Reconnect) => {
                            info!("Reconnecting on request");
                            link_task.abort();
                            self.queue.pause();
                            self.boot.on_disconnected();
                            link_task = tokio::spawn(self.link.clone().run());
                        }
                        None => break ResetKind::Soft,
                    }
                }

                change = config_changes.recv() => {
                    match change {
                        Ok(ConfigChange::AuthorizationKeyChanged) => {
                            let _ = self.command_tx.send(RuntimeCommand::Reconnect);
                        }
                        Ok(ConfigChange::SecurityProfile(profile)) => {
                            // if the higher profile cannot connect, the
                            // link falls back to the one that worked
                            if profile > current_profile {
                                self.link.arm_security_profile_fallback(current_profile);
                            }
                            current_profile = profile;
                            let _ = self.command_tx.send(RuntimeCommand::Reconnect);
                        }
                        Ok(ConfigChange::MeterValueSampleInterval(_)) => {
                            self.transactions.restart_samplers();
                        }
                        // heartbeat / clock-aligned tasks re-read their
                        // intervals every cycle
                        Ok(_) => {}
                        Err(_) => {}
                    }
                }
            }
        };

        link_task.abort();
        heartbeat.abort();
        clock_aligned.abort();
        reservations.abort();
        reset
    }

    fn send_raw(&self, frame: String) {
        let wire = self.wire.lock().unwrap();
        match wire.as_ref() {
            Some(sender) => {
                if sender.send(frame).is_err() {
                    warn!("Wire sender closed while responding");
                }
            }
            None => warn!("No connection to send response on"),
        }
    }

    /// Retry BootNotification until the central system accepts.
    fn drive_boot(&self) {
        let point = self.me();
        tokio::spawn(async move {
            loop {
                match point.boot.boot().await {
                    BootOutcome::Accepted { .. } => {
                        point.transactions.send_all_status_notifications();
                        break;
                    }
                    BootOutcome::RetryAfter(delay) => {
                        tokio::time::sleep(delay).await;
                    }
                    BootOutcome::Offline => break,
                }
            }
        });
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let point = self.me();
        tokio::spawn(async move {
            loop {
                let interval = point.device_model.heartbeat_interval().max(10) as u64;
                tokio::time::sleep(Duration::from_secs(interval)).await;
                if point.boot.allowed_to_send("Heartbeat") {
                    point.queue.enqueue("Heartbeat", json!({}), QueueKind::Normal);
                }
            }
        })
    }

    fn spawn_clock_aligned(&self) -> JoinHandle<()> {
        let point = self.me();
        tokio::spawn(async move {
            loop {
                let interval = point.device_model.clock_aligned_data_interval() as i64;
                if interval <= 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    continue;
                }
                let wait =
                    crate::transaction::metering::seconds_to_next_clock_aligned(Utc::now(), interval);
                tokio::time::sleep(Duration::from_secs(wait as u64)).await;
                if point.boot.allowed_to_send("MeterValues") {
                    point.transactions.sample_clock_aligned();
                }
            }
        })
    }

    fn spawn_reservation_sweep(&self) -> JoinHandle<()> {
        let point = self.me();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RESERVATION_SWEEP_INTERVAL).await;
                point.transactions.expire_reservations();
            }
        })
    }
}
