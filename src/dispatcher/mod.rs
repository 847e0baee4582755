//! Inbound message dispatch
//!
//! Parses incoming OCPP-J frames, routes Calls from the central system to
//! their action handlers and hands CallResult/CallError frames to the
//! message queue. Unknown actions answer CallError `NotSupported`;
//! actions whose feature profile is not enabled answer `NotImplemented`;
//! unparseable payloads answer `FormationViolation`.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use rust_ocpp::v1_6::types::{DiagnosticsStatus, FirmwareStatus};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::boot::BootCoordinator;
use crate::device_model::DeviceModel;
use crate::drivers::{CertStore, EvseDriver, FileAgent};
use crate::queue::MessageQueue;
use crate::smart_charging::SmartChargingHandler;
use crate::storage::Storage;
use crate::support::errors::CallErrorCode;
use crate::support::ocpp_frame::OcppFrame;
use crate::transaction::TransactionManager;

mod handle_cancel_reservation;
mod handle_certificate_signed;
mod handle_change_availability;
mod handle_change_configuration;
mod handle_clear_cache;
mod handle_clear_charging_profile;
mod handle_data_transfer;
mod handle_delete_certificate;
mod handle_extended_trigger_message;
mod handle_get_composite_schedule;
mod handle_get_configuration;
mod handle_get_diagnostics;
mod handle_get_installed_certificate_ids;
mod handle_get_local_list_version;
mod handle_get_log;
mod handle_install_certificate;
mod handle_remote_start_transaction;
mod handle_remote_stop_transaction;
mod handle_reserve_now;
mod handle_reset;
mod handle_send_local_list;
mod handle_set_charging_profile;
mod handle_trigger_message;
mod handle_unlock_connector;
mod handle_update_firmware;

pub use handle_reset::ResetKind;

/// Commands the dispatcher raises to the runtime.
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Reset accepted: tear down after the transactions stopped.
    Reset(ResetKind),
    /// Credentials or security profile changed: reconnect the link.
    Reconnect,
}

/// A running log/diagnostics upload, cancellable by a newer request.
pub(crate) struct UploadJob {
    pub request_id: Option<i32>,
    pub interrupt: Arc<AtomicBool>,
    pub handle: JoinHandle<()>,
}

/// Routes CS-initiated Calls and tracks the transfer workers they spawn.
pub struct Dispatcher {
    me: std::sync::Weak<Dispatcher>,
    pub(crate) device_model: Arc<DeviceModel>,
    pub(crate) queue: Arc<MessageQueue>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) transactions: Arc<TransactionManager>,
    pub(crate) smart_charging: Arc<SmartChargingHandler>,
    pub(crate) boot: Arc<BootCoordinator>,
    pub(crate) cert_store: Arc<dyn CertStore>,
    pub(crate) file_agent: Arc<dyn FileAgent>,
    pub(crate) evse: Arc<dyn EvseDriver>,
    pub(crate) commands: mpsc::UnboundedSender<RuntimeCommand>,
    pub(crate) log_upload: Mutex<Option<UploadJob>>,
    pub(crate) last_diagnostics_status: Mutex<DiagnosticsStatus>,
    pub(crate) last_firmware_status: Mutex<FirmwareStatus>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_model: Arc<DeviceModel>,
        queue: Arc<MessageQueue>,
        storage: Arc<dyn Storage>,
        transactions: Arc<TransactionManager>,
        smart_charging: Arc<SmartChargingHandler>,
        boot: Arc<BootCoordinator>,
        cert_store: Arc<dyn CertStore>,
        file_agent: Arc<dyn FileAgent>,
        evse: Arc<dyn EvseDriver>,
        commands: mpsc::UnboundedSender<RuntimeCommand>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            device_model,
            queue,
            storage,
            transactions,
            smart_charging,
            boot,
            cert_store,
            file_agent,
            evse,
            commands,
            log_upload: Mutex::new(None),
            last_diagnostics_status: Mutex::new(DiagnosticsStatus::Idle),
            last_firmware_status: Mutex::new(FirmwareStatus::Idle),
        })
    }

    fn me(&self) -> Arc<Self> {
        self.me.upgrade().expect("dispatcher dropped while in use")
    }

    /// Handle one raw frame. Returns the serialized response frame for
    /// Calls; responses to our own Calls route into the queue.
    pub async fn handle(&self, text: &str) -> Option<String> {
        let frame = match OcppFrame::parse(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, raw = text, "Unparseable frame");
                return None;
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                info!(action = action.as_str(), unique_id = unique_id.as_str(), "Received Call");
                let response = match self.dispatch_call(&action, &payload).await {
                    Ok(payload) => OcppFrame::CallResult { unique_id, payload },
                    Err((code, description)) => {
                        warn!(action = action.as_str(), code = code.as_str(), "Answering CallError");
                        OcppFrame::error_response(unique_id, code, description)
                    }
                };
                Some(response.serialize())
            }
            frame @ (OcppFrame::CallResult { .. } | OcppFrame::CallError { .. }) => {
                self.queue.handle_response(&frame);
                None
            }
        }
    }

    /// Feature profile an action is reported under, for the
    /// `SupportedFeatureProfiles` gate. Security-extension actions are
    /// always admitted.
    fn required_profile(action: &str) -> Option<&'static str> {
        match action {
            "ChangeAvailability" | "ChangeConfiguration" | "ClearCache" | "DataTransfer"
            | "GetConfiguration" | "RemoteStartTransaction" | "RemoteStopTransaction" | "Reset"
            | "UnlockConnector" => Some("Core"),
            "GetDiagnostics" | "UpdateFirmware" => Some("FirmwareManagement"),
            "GetLocalListVersion" | "SendLocalList" => Some("LocalAuthListManagement"),
            "ReserveNow" | "CancelReservation" => Some("Reservation"),
            "SetChargingProfile" | "ClearChargingProfile" | "GetCompositeSchedule" => {
                Some("SmartCharging")
            }
            "TriggerMessage" => Some("RemoteTrigger"),
            _ => None,
        }
    }

    fn is_known_action(action: &str) -> bool {
        matches!(
            action,
            "CancelReservation"
                | "CertificateSigned"
                | "ChangeAvailability"
                | "ChangeConfiguration"
                | "ClearCache"
                | "ClearChargingProfile"
                | "DataTransfer"
                | "DeleteCertificate"
                | "ExtendedTriggerMessage"
                | "GetCompositeSchedule"
                | "GetConfiguration"
                | "GetDiagnostics"
                | "GetInstalledCertificateIds"
                | "GetLocalListVersion"
                | "GetLog"
                | "InstallCertificate"
                | "RemoteStartTransaction"
                | "RemoteStopTransaction"
                | "ReserveNow"
                | "Reset"
                | "SendLocalList"
                | "SetChargingProfile"
                | "SignedUpdateFirmware"
                | "TriggerMessage"
                | "UnlockConnector"
                | "UpdateFirmware"
        )
    }

    async fn dispatch_call(
        &self,
        action: &str,
        payload: &Value,
    ) -> Result<Value, (CallErrorCode, String)> {
        if !Self::is_known_action(action) {
            return Err((
                CallErrorCode::NotSupported,
                format!("Action {} is not supported", action),
            ));
        }

        if let Some(profile) = Self::required_profile(action) {
            let enabled = self.device_model.supported_feature_profiles();
            if !enabled.iter().any(|p| p == profile) {
                return Err((
                    CallErrorCode::NotImplemented,
                    format!("Feature profile {} is not enabled", profile),
                ));
            }
        }

        match action {
            "CancelReservation" => handle_cancel_reservation::handle(&self.me(), payload).await,
            "CertificateSigned" => handle_certificate_signed::handle(&self.me(), payload).await,
            "ChangeAvailability" => handle_change_availability::handle(&self.me(), payload).await,
            "ChangeConfiguration" => handle_change_configuration::handle(&self.me(), payload).await,
            "ClearCache" => handle_clear_cache::handle(&self.me(), payload).await,
            "ClearChargingProfile" => handle_clear_charging_profile::handle(&self.me(), payload).await,
            "DataTransfer" => handle_data_transfer::handle(&self.me(), payload).await,
            "DeleteCertificate" => handle_delete_certificate::handle(&self.me(), payload).await,
            "ExtendedTriggerMessage" => handle_extended_trigger_message::handle(&self.me(), payload).await,
            "GetCompositeSchedule" => handle_get_composite_schedule::handle(&self.me(), payload).await,
            "GetConfiguration" => handle_get_configuration::handle(&self.me(), payload).await,
            "GetDiagnostics" => handle_get_diagnostics::handle(&self.me(), payload).await,
            "GetInstalledCertificateIds" => {
                handle_get_installed_certificate_ids::handle(&self.me(), payload).await
            }
            "GetLocalListVersion" => handle_get_local_list_version::handle(&self.me(), payload).await,
            "GetLog" => handle_get_log::handle(&self.me(), payload).await,
            "InstallCertificate" => handle_install_certificate::handle(&self.me(), payload).await,
            "RemoteStartTransaction" => {
                handle_remote_start_transaction::handle(&self.me(), payload).await
            }
            "RemoteStopTransaction" => handle_remote_stop_transaction::handle(&self.me(), payload).await,
            "ReserveNow" => handle_reserve_now::handle(&self.me(), payload).await,
            "Reset" => handle_reset::handle(&self.me(), payload).await,
            "SendLocalList" => handle_send_local_list::handle(&self.me(), payload).await,
            "SetChargingProfile" => handle_set_charging_profile::handle(&self.me(), payload).await,
            "SignedUpdateFirmware" => handle_update_firmware::handle_signed(&self.me(), payload).await,
            "TriggerMessage" => handle_trigger_message::handle(&self.me(), payload).await,
            "UnlockConnector" => handle_unlock_connector::handle(&self.me(), payload).await,
            "UpdateFirmware" => handle_update_firmware::handle(&self.me(), payload).await,
            _ => unreachable!("known action without handler"),
        }
    }

    /// Emit a SecurityEventNotification unless disabled by configuration.
    pub fn security_event(&self, event: crate::support::security::SecurityEvent, tech_info: Option<String>) {
        if self.device_model.disable_security_event_notifications() {
            return;
        }
        let request = crate::support::security::SecurityEventNotificationRequest {
            event_type: event.as_str().to_string(),
            timestamp: chrono::Utc::now(),
            tech_info,
        };
        self.queue.enqueue(
            "SecurityEventNotification",
            serde_json::to_value(&request).unwrap_or_default(),
            crate::queue::QueueKind::Normal,
        );
    }
}

/// Deserialize a payload or produce the protocol error for it.
pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: &Value,
) -> Result<T, (CallErrorCode, String)> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        (
            CallErrorCode::FormationViolation,
            format!("Payload does not match schema: {}", e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::{SimCertStore, SimEvse, SimFileAgent};
    use crate::queue::{QueueKind, SendGate};
    use crate::storage::MemoryStorage;
    use crate::transaction::TransactionManager;
    use serde_json::json;

    async fn dispatcher() -> (Arc<Dispatcher>, mpsc::UnboundedReceiver<RuntimeCommand>) {
        let device_model = Arc::new(DeviceModel::new());
        let queue = Arc::new(MessageQueue::new(device_model.clone()));
        let storage = Arc::new(MemoryStorage::new());
        let evse = Arc::new(SimEvse::new());
        let smart_charging = Arc::new(SmartChargingHandler::new(
            device_model.clone(),
            storage.clone(),
        ));
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
            device_model,
            queue,
            storage,
            transactions,
            smart_charging,
            boot,
            Arc::new(SimCertStore),
            Arc::new(SimFileAgent),
            evse,
            command_tx,
        );
        (dispatcher, command_rx)
    }

    fn call(action: &str, payload: serde_json::Value) -> String {
        OcppFrame::Call {
            unique_id: "msg-1".to_string(),
            action: action.to_string(),
            payload,
        }
        .serialize()
    }

    fn parse_error(response: &str) -> (String, String) {
        match OcppFrame::parse(response).unwrap() {
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => (error_code, error_description),
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    fn parse_result(response: &str) -> serde_json::Value {
        match OcppFrame::parse(response).unwrap() {
            OcppFrame::CallResult { payload, .. } => payload,
            other => panic!("expected CallResult, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_action_answers_not_supported() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call("FrobnicateConnector", json!({})))
            .await
            .unwrap();
        let (code, _) = parse_error(&response);
        assert_eq!(code, "NotSupported");
    }

    #[tokio::test]
    async fn disabled_feature_profile_answers_not_implemented() {
        let (dispatcher, _rx) = dispatcher().await;
        // drop SmartCharging from the advertised profiles
        {
            let model = &dispatcher.device_model;
            model
                .set_internal(crate::device_model::KnownKey::SupportedFeatureProfiles, "Core")
                .await;
        }
        let response = dispatcher
            .handle(&call("ClearChargingProfile", json!({})))
            .await
            .unwrap();
        let (code, description) = parse_error(&response);
        assert_eq!(code, "NotImplemented");
        assert!(description.contains("SmartCharging"));
    }

    #[tokio::test]
    async fn malformed_payload_answers_formation_violation() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call("RemoteStopTransaction", json!({"transactionId": "nope"})))
            .await
            .unwrap();
        let (code, _) = parse_error(&response);
        assert_eq!(code, "FormationViolation");
    }

    #[tokio::test]
    async fn change_configuration_roundtrip() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call(
                "ChangeConfiguration",
                json!({"key": "HeartbeatInterval", "value": "120"}),
            ))
            .await
            .unwrap();
        assert_eq!(parse_result(&response)["status"], "Accepted");
        assert_eq!(dispatcher.device_model.heartbeat_interval(), 120);

        let response = dispatcher
            .handle(&call(
                "ChangeConfiguration",
                json!({"key": "HeartbeatInterval", "value": "often"}),
            ))
            .await
            .unwrap();
        assert_eq!(parse_result(&response)["status"], "Rejected");
    }

    #[tokio::test]
    async fn get_configuration_reports_unknown_keys() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call(
                "GetConfiguration",
                json!({"key": ["HeartbeatInterval", "Bogus"]}),
            ))
            .await
            .unwrap();
        let payload = parse_result(&response);
        assert_eq!(payload["configurationKey"][0]["key"], "HeartbeatInterval");
        assert_eq!(payload["unknownKey"][0], "Bogus");
    }

    #[tokio::test]
    async fn data_transfer_reports_unknown_vendor() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call("DataTransfer", json!({"vendorId": "com.example"})))
            .await
            .unwrap();
        assert_eq!(parse_result(&response)["status"], "UnknownVendorId");
    }

    #[tokio::test]
    async fn remote_stop_of_unknown_transaction_is_rejected() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call("RemoteStopTransaction", json!({"transactionId": 999})))
            .await
            .unwrap();
        assert_eq!(parse_result(&response)["status"], "Rejected");
    }

    #[tokio::test]
    async fn call_results_route_into_the_queue() {
        let (dispatcher, _rx) = dispatcher().await;
        let (wire_tx, mut wire) = mpsc::unbounded_channel();
        dispatcher.queue.resume(wire_tx);
        dispatcher.queue.set_gate(SendGate::All);

        let pending = dispatcher
            .queue
            .enqueue_async("Heartbeat", json!({}), QueueKind::Normal);
        dispatcher.queue.try_dispatch();
        let sent = wire.try_recv().unwrap();
        let unique_id = OcppFrame::parse(&sent).unwrap().unique_id().to_string();

        let response_text = OcppFrame::CallResult {
            unique_id,
            payload: json!({"currentTime": "2024-01-01T00:00:00Z"}),
        }
        .serialize();
        assert!(dispatcher.handle(&response_text).await.is_none());

        let resolved = pending.await.unwrap();
        assert!(!resolved.offline());
    }

    #[tokio::test]
    async fn second_get_log_cancels_the_first() {
        let (dispatcher, _rx) = dispatcher().await;
        let request = json!({
            "log": {"remoteLocation": "ftp://cs.example/logs"},
            "logType": "SecurityLog",
            "requestId": 1
        });
        let response = dispatcher.handle(&call("GetLog", request)).await.unwrap();
        assert_eq!(parse_result(&response)["status"], "Accepted");

        let request = json!({
            "log": {"remoteLocation": "ftp://cs.example/logs"},
            "logType": "SecurityLog",
            "requestId": 2
        });
        let response = dispatcher.handle(&call("GetLog", request)).await.unwrap();
        assert_eq!(parse_result(&response)["status"], "AcceptedCanceled");
    }

    #[tokio::test]
    async fn trigger_heartbeat_enqueues_one() {
        let (dispatcher, _rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call("TriggerMessage", json!({"requestedMessage": "Heartbeat"})))
            .await
            .unwrap();
        assert_eq!(parse_result(&response)["status"], "Accepted");
        assert!(dispatcher
            .queue
            .pending_actions()
            .contains(&"Heartbeat".to_string()));
    }

    #[tokio::test]
    async fn reset_stops_transactions_and_signals_runtime() {
        let (dispatcher, mut rx) = dispatcher().await;
        let response = dispatcher
            .handle(&call("Reset", json!({"type": "Hard"})))
            .await
            .unwrap();
        assert_eq!(parse_result(&response)["status"], "Accepted");
        match rx.recv().await.unwrap() {
            RuntimeCommand::Reset(kind) => assert_eq!(kind, ResetKind::Hard),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
