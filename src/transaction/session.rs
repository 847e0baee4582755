//! Charging session and transaction bookkeeping

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::MeterValue;

/// Tag that passed authorization and is waiting for (or driving) a
/// session on a connector.
#[derive(Debug, Clone)]
pub struct AuthorizedTag {
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
}

/// A billable charging session.
///
/// `transaction_id` stays at the local placeholder (negative) until the
/// `StartTransactionResponse` assigns the server id; queued
/// StopTransaction payloads are rewritten when that happens.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Server-assigned id, or the placeholder while unassigned.
    pub transaction_id: i32,
    /// Local negative id stamped into queued messages before assignment.
    pub placeholder_id: i32,
    pub connector_id: i32,
    pub id_tag: String,
    pub meter_start_wh: i32,
    pub started_at: DateTime<Utc>,
    pub reservation_id: Option<i32>,
    /// Set once StopTransaction is enqueued; the transaction itself is
    /// destroyed on the StopTransactionResponse round-trip.
    pub finished: bool,
    /// Per-sample meter values accumulated for StopTransaction's
    /// `transactionData`.
    pub transaction_data: Vec<MeterValue>,
}

impl Transaction {
    pub fn new(
        placeholder_id: i32,
        connector_id: i32,
        id_tag: String,
        meter_start_wh: i32,
        started_at: DateTime<Utc>,
        reservation_id: Option<i32>,
    ) -> Self {
        Self {
            transaction_id: placeholder_id,
            placeholder_id,
            connector_id,
            id_tag,
            meter_start_wh,
            started_at,
            reservation_id,
            finished: false,
            transaction_data: Vec::new(),
        }
    }

    /// True until the StartTransactionResponse arrived.
    pub fn awaiting_id(&self) -> bool {
        self.transaction_id == self.placeholder_id
    }
}

/// Pre-transaction session state on one connector: the cable may attach
/// before authorization or the other way around.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub started_at: Option<DateTime<Utc>>,
    pub start_energy_wh: Option<f64>,
    pub reservation_id: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_tracks_assignment() {
        let mut tx = Transaction::new(-4, 1, "TAG".into(), 100, Utc::now(), None);
        assert!(tx.awaiting_id());
        assert_eq!(tx.transaction_id, -4);
        tx.transaction_id = 42;
        assert!(!tx.awaiting_id());
    }
}
