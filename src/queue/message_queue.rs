//! Outbound message queue
//!
//! OCPP 1.6 allows a single outstanding Call per direction, so every
//! outgoing request funnels through this FIFO. Transaction-related
//! messages are never dropped: they survive pause/offline stretches and
//! are retried with the configured attempt count and interval. Plain
//! telemetry listed in `MessageTypesDiscardForQueueing` is shed while the
//! link is down. A StopTransaction queued before its StartTransaction got
//! a response carries a local placeholder id that is rewritten in place
//! once the server assigns the real transaction id.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device_model::DeviceModel;
use crate::support::ocpp_frame::OcppFrame;

/// Default time a Call may await its response before it counts as failed.
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// What came back for a Call.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Result(Value),
    Error { code: String, description: String },
    /// No response: transport down or retries exhausted. Callers fall
    /// back to offline behavior (cached authorization etc.).
    Offline,
}

/// Resolution of an `enqueue_async` Call.
#[derive(Debug, Clone)]
pub struct EnhancedMessage {
    pub unique_id: String,
    pub action: String,
    pub outcome: CallOutcome,
}

impl EnhancedMessage {
    pub fn offline(&self) -> bool {
        matches!(self.outcome, CallOutcome::Offline)
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            CallOutcome::Result(v) => Some(v),
            _ => None,
        }
    }
}

/// Queueing class of a Call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// BootNotification: allowed through the registration gate.
    Boot,
    /// StartTransaction / StopTransaction / transaction meter values:
    /// at-least-once, never dropped.
    Transactional,
    /// Everything else: at-most-once.
    Normal,
}

/// Which actions may currently be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendGate {
    /// Registration not accepted: only BootNotification leaves.
    BootOnly,
    /// Normal operation.
    All,
}

struct QueuedCall {
    unique_id: String,
    action: String,
    payload: Value,
    kind: QueueKind,
    attempts: i32,
    not_before: Option<Instant>,
    responder: Option<oneshot::Sender<EnhancedMessage>>,
}

impl QueuedCall {
    fn resolve(mut self, outcome: CallOutcome) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(EnhancedMessage {
                unique_id: self.unique_id.clone(),
                action: self.action.clone(),
                outcome,
            });
        }
    }
}

struct InFlight {
    call: QueuedCall,
    deadline: Instant,
}

struct Inner {
    queue: VecDeque<QueuedCall>,
    in_flight: Option<InFlight>,
    paused: bool,
    gate: SendGate,
    sender: Option<mpsc::UnboundedSender<String>>,
}

pub struct MessageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    device_model: Arc<DeviceModel>,
}

impl MessageQueue {
    pub fn new(device_model: Arc<DeviceModel>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                in_flight: None,
                paused: true,
                gate: SendGate::BootOnly,
                sender: None,
            }),
            notify: Notify::new(),
            device_model,
        }
    }

    // ── Link lifecycle ─────────────────────────────────────────

    /// Attach the wire sender of a fresh connection and resume dispatch.
    pub fn resume(&self, sender: mpsc::UnboundedSender<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.sender = Some(sender);
        inner.paused = false;
        drop(inner);
        info!("Message queue resumed");
        self.notify.notify_one();
    }

    /// Stop dispatching. The in-flight Call is requeued when
    /// transactional, resolved offline otherwise.
    pub fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.paused = true;
        inner.sender = None;
        if let Some(in_flight) = inner.in_flight.take() {
            let mut call = in_flight.call;
            if call.kind == QueueKind::Transactional {
                debug!(action = call.action.as_str(), "Requeueing in-flight transactional call");
                call.not_before = None;
                inner.queue.push_front(call);
            } else {
                call.resolve(CallOutcome::Offline);
            }
        }
        info!("Message queue paused");
    }

    /// Update the registration gate.
    pub fn set_gate(&self, gate: SendGate) {
        self.inner.lock().unwrap().gate = gate;
        self.notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn pending_actions(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .queue
            .iter()
            .map(|c| c.action.clone())
            .collect()
    }

    // ── Enqueueing ─────────────────────────────────────────────

    /// Queue a Call without caring about its response.
    pub fn enqueue(&self, action: &str, payload: Value, kind: QueueKind) {
        let _ = self.push(action, payload, kind, None);
    }

    /// Queue a Call and receive its resolution (response, error or
    /// offline) on the returned channel.
    pub fn enqueue_async(
        &self,
        action: &str,
        payload: Value,
        kind: QueueKind,
    ) -> oneshot::Receiver<EnhancedMessage> {
        let (tx, rx) = oneshot::channel();
        if let Some(rejected) = self.push(action, payload, kind, Some(tx)) {
            rejected.resolve(CallOutcome::Offline);
        }
        rx
    }

    /// Returns the call back when it was shed instead of queued.
    fn push(
        &self,
        action: &str,
        payload: Value,
        kind: QueueKind,
        responder: Option<oneshot::Sender<EnhancedMessage>>,
    ) -> Option<QueuedCall> {
        let call = QueuedCall {
            unique_id: uuid::Uuid::new_v4().to_string(),
            action: action.to_string(),
            payload,
            kind,
            attempts: 0,
            not_before: None,
            responder,
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.paused && kind == QueueKind::Normal {
            let discard = self.device_model.message_types_discard_for_queueing();
            if discard.iter().any(|a| a == action) {
                debug!(action, "Discarding non-queued message while paused");
                return Some(call);
            }
        }
        inner.queue.push_back(call);
        drop(inner);
        self.notify.notify_one();
        None
    }

    /// Patch queued StopTransaction payloads once the server assigned the
    /// real transaction id.
    pub fn rewrite_stopped_transaction_id(&self, placeholder_id: i32, transaction_id: i32) {
        let mut inner = self.inner.lock().unwrap();
        let mut rewritten = 0;
        for call in inner.queue.iter_mut().filter(|c| c.action == "StopTransaction") {
            if call.payload.get("transactionId").and_then(Value::as_i64) == Some(placeholder_id as i64)
            {
                call.payload["transactionId"] = Value::from(transaction_id);
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            info!(placeholder_id, transaction_id, rewritten, "Rewrote queued StopTransaction ids");
        }
    }

    // ── Dispatch ───────────────────────────────────────────────

    fn allowed(gate: SendGate, call: &QueuedCall) -> bool {
        match gate {
            SendGate::All => true,
            SendGate::BootOnly => call.kind == QueueKind::Boot,
        }
    }

    /// Send the next eligible Call if the line is idle. Returns the
    /// earliest instant a deferred call becomes eligible, if any.
    pub fn try_dispatch(&self) -> Option<Instant> {
        let mut inner = self.inner.lock().unwrap();
        if inner.paused || inner.in_flight.is_some() {
            return None;
        }

        let now = Instant::now();
        let gate = inner.gate;

        // find the first eligible call, preserving FIFO order for the rest
        let position = inner.queue.iter().position(|c| {
            Self::allowed(gate, c) && c.not_before.map_or(true, |t| t <= now)
        })?;
        let mut call = inner.queue.remove(position)?;
        call.attempts += 1;

        let frame = OcppFrame::Call {
            unique_id: call.unique_id.clone(),
            action: call.action.clone(),
            payload: call.payload.clone(),
        };

        let sent = inner
            .sender
            .as_ref()
            .map(|s| s.send(frame.serialize()).is_ok())
            .unwrap_or(false);

        if sent {
            debug!(
                action = call.action.as_str(),
                unique_id = call.unique_id.as_str(),
                attempt = call.attempts,
                "Dispatched call"
            );
            inner.in_flight = Some(InFlight {
                call,
                deadline: now + MESSAGE_TIMEOUT,
            });
            None
        } else {
            // wire went away between pause notifications
            if call.kind == QueueKind::Transactional {
                call.not_before = None;
                inner.queue.push_front(call);
            } else {
                drop(inner);
                call.resolve(CallOutcome::Offline);
            }
            None
        }
    }

    /// Route a CallResult/CallError to the in-flight Call. Returns `true`
    /// when the frame matched it.
    pub fn handle_response(&self, frame: &OcppFrame) -> bool {
        let outcome = match frame {
            OcppFrame::CallResult { payload, .. } => CallOutcome::Result(payload.clone()),
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => CallOutcome::Error {
                code: error_code.clone(),
                description: error_description.clone(),
            },
            OcppFrame::Call { .. } => return false,
        };

        let mut inner = self.inner.lock().unwrap();
        match &inner.in_flight {
            Some(in_flight) if in_flight.call.unique_id == frame.unique_id() => {
                let in_flight = inner.in_flight.take().unwrap();
                drop(inner);
                in_flight.call.resolve(outcome);
                self.notify.notify_one();
                true
            }
            _ => {
                warn!(unique_id = frame.unique_id(), "Response does not match in-flight call");
                false
            }
        }
    }

    /// Expire the in-flight Call when its deadline passed. Transactional
    /// calls are retried per configuration; others resolve offline.
    pub fn check_timeout(&self) {
        let mut inner = self.inner.lock().unwrap();
        let expired = match &inner.in_flight {
            Some(in_flight) if in_flight.deadline <= Instant::now() => true,
            _ => false,
        };
        if !expired {
            return;
        }
        let mut call = inner.in_flight.take().unwrap().call;

        if call.kind == QueueKind::Transactional {
            let max_attempts = self.device_model.transaction_message_attempts();
            if call.attempts < max_attempts {
                let interval = self.device_model.transaction_message_retry_interval();
                let delay = Duration::from_secs((interval as u64) * call.attempts as u64);
                warn!(
                    action = call.action.as_str(),
                    attempt = call.attempts,
                    max_attempts,
                    retry_in_s = delay.as_secs(),
                    "Call timed out, retrying"
                );
                call.not_before = Some(Instant::now() + delay);
                inner.queue.push_front(call);
                drop(inner);
                self.notify.notify_one();
                return;
            }
        }

        warn!(
            action = call.action.as_str(),
            attempts = call.attempts,
            "Call timed out, resolving offline"
        );
        drop(inner);
        call.resolve(CallOutcome::Offline);
        self.notify.notify_one();
    }

    /// Dispatch loop: wake on new work or the nearest deadline.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.check_timeout();
            self.try_dispatch();
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue_with_wire() -> (Arc<MessageQueue>, mpsc::UnboundedReceiver<String>) {
        let queue = Arc::new(MessageQueue::new(Arc::new(DeviceModel::new())));
        let (tx, rx) = mpsc::unbounded_channel();
        queue.resume(tx);
        queue.set_gate(SendGate::All);
        (queue, rx)
    }

    #[tokio::test]
    async fn one_call_in_flight_at_a_time() {
        let (queue, mut wire) = queue_with_wire();
        queue.enqueue("Heartbeat", json!({}), QueueKind::Normal);
        queue.enqueue("StatusNotification", json!({"connectorId": 1}), QueueKind::Normal);

        queue.try_dispatch();
        let first = wire.try_recv().unwrap();
        assert!(first.contains("Heartbeat"));

        // second call must wait for the response to the first
        queue.try_dispatch();
        assert!(wire.try_recv().is_err());

        let frame = OcppFrame::parse(&first).unwrap();
        let response = OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload: json!({"currentTime": "2024-01-01T00:00:00Z"}),
        };
        assert!(queue.handle_response(&response));

        queue.try_dispatch();
        assert!(wire.try_recv().unwrap().contains("StatusNotification"));
    }

    #[tokio::test]
    async fn async_call_resolves_with_result() {
        let (queue, mut wire) = queue_with_wire();
        let rx = queue.enqueue_async("Authorize", json!({"idTag": "TAG1"}), QueueKind::Normal);
        queue.try_dispatch();
        let sent = wire.try_recv().unwrap();
        let frame = OcppFrame::parse(&sent).unwrap();

        queue.handle_response(&OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload: json!({"idTagInfo": {"status": "Accepted"}}),
        });

        let message = rx.await.unwrap();
        assert!(!message.offline());
        assert_eq!(message.result().unwrap()["idTagInfo"]["status"], "Accepted");
    }

    #[tokio::test]
    async fn discard_list_applies_only_while_paused() {
        let queue = Arc::new(MessageQueue::new(Arc::new(DeviceModel::new())));
        queue
            .device_model
            .set("MessageTypesDiscardForQueueing", "MeterValues,StatusNotification")
            .await;

        // paused (no wire attached yet): telemetry is shed
        let rx = queue.enqueue_async("MeterValues", json!({"connectorId": 1}), QueueKind::Normal);
        assert!(rx.await.unwrap().offline());
        assert_eq!(queue.pending_count(), 0);

        // transactional meter values are never shed
        queue.enqueue("MeterValues", json!({"connectorId": 1, "transactionId": 5}), QueueKind::Transactional);
        assert_eq!(queue.pending_count(), 1);

        // resumed: the same telemetry queues normally
        let (tx, _rx_wire) = mpsc::unbounded_channel();
        queue.resume(tx);
        queue.enqueue("MeterValues", json!({"connectorId": 1}), QueueKind::Normal);
        assert_eq!(queue.pending_count(), 2);
    }

    #[tokio::test]
    async fn transactional_in_flight_survives_pause() {
        let (queue, mut wire) = queue_with_wire();
        queue.enqueue("StartTransaction", json!({"connectorId": 1}), QueueKind::Transactional);
        queue.try_dispatch();
        wire.try_recv().unwrap();

        queue.pause();
        assert_eq!(queue.pending_count(), 1);

        let (tx, mut wire2) = mpsc::unbounded_channel();
        queue.resume(tx);
        queue.try_dispatch();
        assert!(wire2.try_recv().unwrap().contains("StartTransaction"));
    }

    #[tokio::test]
    async fn boot_gate_blocks_everything_but_boot() {
        let (queue, mut wire) = queue_with_wire();
        queue.set_gate(SendGate::BootOnly);
        queue.enqueue("Heartbeat", json!({}), QueueKind::Normal);
        queue.enqueue("BootNotification", json!({"chargePointModel": "M"}), QueueKind::Boot);

        queue.try_dispatch();
        let sent = wire.try_recv().unwrap();
        assert!(sent.contains("BootNotification"));

        // heartbeat still parked
        let frame = OcppFrame::parse(&sent).unwrap();
        queue.handle_response(&OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload: json!({"status": "Accepted", "interval": 300, "currentTime": "2024-01-01T00:00:00Z"}),
        });
        queue.try_dispatch();
        assert!(wire.try_recv().is_err());
        assert_eq!(queue.pending_count(), 1);

        queue.set_gate(SendGate::All);
        queue.try_dispatch();
        assert!(wire.try_recv().unwrap().contains("Heartbeat"));
    }

    #[tokio::test]
    async fn stop_transaction_id_rewrite() {
        let queue = Arc::new(MessageQueue::new(Arc::new(DeviceModel::new())));
        // offline: both transactional calls are parked
        queue.enqueue(
            "StartTransaction",
            json!({"connectorId": 1, "idTag": "X", "meterStart": 0}),
            QueueKind::Transactional,
        );
        queue.enqueue(
            "StopTransaction",
            json!({"transactionId": -3, "meterStop": 1200}),
            QueueKind::Transactional,
        );

        queue.rewrite_stopped_transaction_id(-3, 42);

        let (tx, mut wire) = mpsc::unbounded_channel();
        queue.resume(tx);
        queue.set_gate(SendGate::All);
        queue.try_dispatch();
        let start = wire.try_recv().unwrap();
        assert!(start.contains("StartTransaction"));
        let frame = OcppFrame::parse(&start).unwrap();
        queue.handle_response(&OcppFrame::CallResult {
            unique_id: frame.unique_id().to_string(),
            payload: json!({"transactionId": 42, "idTagInfo": {"status": "Accepted"}}),
        });

        queue.try_dispatch();
        let stop = wire.try_recv().unwrap();
        assert!(stop.contains("StopTransaction"));
        assert!(stop.contains("\"transactionId\":42"));
    }

    #[tokio::test(start_paused = true)]
    async fn normal_call_times_out_offline() {
        let (queue, mut wire) = queue_with_wire();
        let rx = queue.enqueue_async("DataTransfer", json!({"vendorId": "v"}), QueueKind::Normal);
        queue.try_dispatch();
        wire.try_recv().unwrap();

        tokio::time::advance(MESSAGE_TIMEOUT + Duration::from_secs(1)).await;
        queue.check_timeout();

        let message = rx.await.unwrap();
        assert!(message.offline());
    }

    #[tokio::test(start_paused = true)]
    async fn transactional_call_retries_then_goes_offline() {
        let (queue, mut wire) = queue_with_wire();
        queue.device_model.set("TransactionMessageAttempts", "2").await;
        queue.device_model.set("TransactionMessageRetryInterval", "5").await;

        let rx = queue.enqueue_async(
            "StopTransaction",
            json!({"transactionId": 7, "meterStop": 100}),
            QueueKind::Transactional,
        );

        queue.try_dispatch();
        wire.try_recv().unwrap();
        tokio::time::advance(MESSAGE_TIMEOUT + Duration::from_secs(1)).await;
        queue.check_timeout();

        // retry deferred by interval * attempt
        queue.try_dispatch();
        assert!(wire.try_recv().is_err());
        tokio::time::advance(Duration::from_secs(6)).await;
        queue.try_dispatch();
        wire.try_recv().unwrap();

        tokio::time::advance(MESSAGE_TIMEOUT + Duration::from_secs(1)).await;
        queue.check_timeout();

        let message = rx.await.unwrap();
        assert!(message.offline());
    }
}
