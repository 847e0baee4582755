//! Registration handshake
//!
//! Nothing but `BootNotification` may leave the station until the
//! central system accepts it. The coordinator owns the registration
//! status, drives the message-queue gate accordingly and schedules
//! re-boot attempts while the central system answers Pending or
//! Rejected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use tracing::{info, warn};

use crate::device_model::{DeviceModel, KnownKey};
use crate::queue::{MessageQueue, QueueKind, SendGate};

/// Transport + registration state, coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Socket up, registration outcome unknown.
    Connected,
    /// Registration accepted, normal operation.
    Booted,
    /// Central system answered Pending.
    Pending,
    /// Central system answered Rejected.
    Rejected,
}

/// Outcome of one boot attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BootOutcome {
    Accepted {
        interval: u32,
        current_time: DateTime<Utc>,
    },
    /// Pending or Rejected: try again after this delay.
    RetryAfter(Duration),
    Offline,
}

struct State {
    registration_status: RegistrationStatus,
    connection_state: ConnectionState,
}

pub struct BootCoordinator {
    device_model: Arc<DeviceModel>,
    queue: Arc<MessageQueue>,
    state: Mutex<State>,
}

impl BootCoordinator {
    pub fn new(device_model: Arc<DeviceModel>, queue: Arc<MessageQueue>) -> Self {
        Self {
            device_model,
            queue,
            state: Mutex::new(State {
                registration_status: RegistrationStatus::Pending,
                connection_state: ConnectionState::Disconnected,
            }),
        }
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        self.state.lock().unwrap().registration_status.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().unwrap().connection_state
    }

    /// Outbound gate: everything once accepted, else only
    /// BootNotification.
    pub fn allowed_to_send(&self, action: &str) -> bool {
        action == "BootNotification"
            || self.registration_status() == RegistrationStatus::Accepted
    }

    pub fn on_connected(&self) {
        let mut state = self.state.lock().unwrap();
        state.connection_state = ConnectionState::Connected;
        // a fresh socket does not imply acceptance
        if state.registration_status != RegistrationStatus::Accepted {
            drop(state);
            self.queue.set_gate(SendGate::BootOnly);
        }
    }

    pub fn on_disconnected(&self) {
        self.state.lock().unwrap().connection_state = ConnectionState::Disconnected;
    }

    fn request(&self) -> BootNotificationRequest {
        let raw = |key| self.device_model.raw(key).filter(|v: &String| !v.is_empty());
        BootNotificationRequest {
            charge_box_serial_number: raw(KnownKey::ChargeBoxSerialNumber),
            charge_point_model: raw(KnownKey::ChargePointModel).unwrap_or_default(),
            charge_point_serial_number: raw(KnownKey::ChargePointSerialNumber),
            charge_point_vendor: raw(KnownKey::ChargePointVendor).unwrap_or_default(),
            firmware_version: raw(KnownKey::FirmwareVersion),
            iccid: raw(KnownKey::ICCID),
            imsi: raw(KnownKey::IMSI),
            meter_serial_number: raw(KnownKey::MeterSerialNumber),
            meter_type: raw(KnownKey::MeterType),
        }
    }

    /// Send one BootNotification and apply the verdict.
    pub async fn boot(&self) -> BootOutcome {
        let payload = match serde_json::to_value(self.request()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to serialize BootNotification");
                return BootOutcome::Offline;
            }
        };

        let rx = self
            .queue
            .enqueue_async("BootNotification", payload, QueueKind::Boot);
        let message = match rx.await {
            Ok(m) => m,
            Err(_) => return BootOutcome::Offline,
        };

        let response: BootNotificationResponse = match message.result() {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Malformed BootNotificationResponse");
                    return BootOutcome::Offline;
                }
            },
            None => return BootOutcome::Offline,
        };

        let interval = response.interval;
        match response.status {
            RegistrationStatus::Accepted => {
                info!(interval, "Registration accepted");
                {
                    let mut state = self.state.lock().unwrap();
                    state.registration_status = RegistrationStatus::Accepted;
                    state.connection_state = ConnectionState::Booted;
                }
                self.queue.set_gate(SendGate::All);
                // the accepted interval becomes the heartbeat cadence
                if interval > 0 {
                    self.device_model
                        .set_internal(KnownKey::HeartbeatInterval, &interval.to_string())
                        .await;
                }
                BootOutcome::Accepted {
                    interval,
                    current_time: response.current_time,
                }
            }
            RegistrationStatus::Pending => {
                info!(interval, "Registration pending");
                {
                    let mut state = self.state.lock().unwrap();
                    state.registration_status = RegistrationStatus::Pending;
                    state.connection_state = ConnectionState::Pending;
                }
                self.queue.set_gate(SendGate::BootOnly);
                BootOutcome::RetryAfter(Self::retry_delay(interval))
            }
            RegistrationStatus::Rejected => {
                warn!(interval, "Registration rejected");
                {
                    let mut state = self.state.lock().unwrap();
                    state.registration_status = RegistrationStatus::Rejected;
                    state.connection_state = ConnectionState::Rejected;
                }
                self.queue.set_gate(SendGate::BootOnly);
                BootOutcome::RetryAfter(Self::retry_delay(interval))
            }
        }
    }

    fn retry_delay(interval: u32) -> Duration {
        // a zero interval would hammer the central system
        Duration::from_secs(interval.max(30) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::ocpp_frame::OcppFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<BootCoordinator>, Arc<MessageQueue>, mpsc::UnboundedReceiver<String>) {
        let device_model = Arc::new(DeviceModel::new());
        let queue = Arc::new(MessageQueue::new(device_model.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        queue.resume(tx);
        let boot = Arc::new(BootCoordinator::new(device_model, queue.clone()));
        (boot, queue, rx)
    }

    async fn respond(queue: &MessageQueue, wire: &mut mpsc::UnboundedReceiver<String>, payload: serde_json::Value) {
        queue.try_dispatch();
        let sent = wire.recv().await.unwrap();
        assert!(sent.contains("BootNotification"));
        let frame = OcppFrame::parse(&sent).unwrap();
        queue.handle_response(&OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload,
        });
    }

    #[tokio::test]
    async fn accepted_boot_opens_the_gate_and_sets_heartbeat() {
        let (boot, queue, mut wire) = setup();
        boot.on_connected();

        let handle = tokio::spawn({
            let boot = boot.clone();
            async move { boot.boot().await }
        });
        tokio::task::yield_now().await;
        respond(
            &queue,
            &mut wire,
            json!({"status": "Accepted", "interval": 120, "currentTime": "2024-01-01T00:00:00Z"}),
        )
        .await;

        match handle.await.unwrap() {
            BootOutcome::Accepted { interval, .. } => assert_eq!(interval, 120),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(boot.registration_status(), RegistrationStatus::Accepted);
        assert_eq!(boot.connection_state(), ConnectionState::Booted);
        assert!(boot.allowed_to_send("Heartbeat"));

        // the accepted interval replaced the heartbeat cadence
        assert_eq!(boot.device_model.heartbeat_interval(), 120);
    }

    #[tokio::test]
    async fn pending_boot_keeps_gate_closed() {
        let (boot, queue, mut wire) = setup();
        boot.on_connected();

        let handle = tokio::spawn({
            let boot = boot.clone();
            async move { boot.boot().await }
        });
        tokio::task::yield_now().await;
        respond(
            &queue,
            &mut wire,
            json!({"status": "Pending", "interval": 60, "currentTime": "2024-01-01T00:00:00Z"}),
        )
        .await;

        assert_eq!(
            handle.await.unwrap(),
            BootOutcome::RetryAfter(Duration::from_secs(60))
        );
        assert_eq!(boot.connection_state(), ConnectionState::Pending);
        assert!(!boot.allowed_to_send("Heartbeat"));
        assert!(boot.allowed_to_send("BootNotification"));

        // non-boot traffic stays parked
        queue.enqueue("Heartbeat", json!({}), QueueKind::Normal);
        queue.try_dispatch();
        assert!(wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_boot_schedules_retry() {
        let (boot, queue, mut wire) = setup();
        boot.on_connected();

        let handle = tokio::spawn({
            let boot = boot.clone();
            async move { boot.boot().await }
        });
        tokio::task::yield_now().await;
        respond(
            &queue,
            &mut wire,
            json!({"status": "Rejected", "interval": 0, "currentTime": "2024-01-01T00:00:00Z"}),
        )
        .await;

        // zero interval is clamped to a sane retry delay
        assert_eq!(
            handle.await.unwrap(),
            BootOutcome::RetryAfter(Duration::from_secs(30))
        );
        assert_eq!(boot.registration_status(), RegistrationStatus::Rejected);
    }
}
