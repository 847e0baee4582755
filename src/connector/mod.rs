//! Per-connector status state machine
//!
//! One instance per physical socket; connector 0 represents the whole
//! station and only knows Available / Unavailable / Faulted. Transitions
//! follow OCPP 1.6 Figure 4; every applied transition is reported to the
//! central system as a `StatusNotification`.

pub mod state_machine;

pub use state_machine::{ConnectorEvent, StateMachine};

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::ChargePointStatus;

/// A reservation held on a connector.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub reservation_id: i32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub expiry_date: DateTime<Utc>,
}

/// Availability requested by the central system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Operative,
    Inoperative,
}

/// Runtime state of one connector.
#[derive(Debug)]
pub struct Connector {
    pub id: i32,
    pub state_machine: StateMachine,
    pub availability: Availability,
    /// Availability change answered `Scheduled`, applied once the running
    /// transaction stops.
    pub pending_availability: Option<Availability>,
    pub reservation: Option<Reservation>,
}

impl Connector {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            state_machine: StateMachine::new(id == 0),
            availability: Availability::Operative,
            pending_availability: None,
            reservation: None,
        }
    }

    pub fn status(&self) -> ChargePointStatus {
        self.state_machine.status()
    }

    pub fn is_operative(&self) -> bool {
        self.availability == Availability::Operative
    }

    /// Drop an expired reservation, reporting whether one was removed.
    pub fn expire_reservation(&mut self, now: DateTime<Utc>) -> bool {
        match &self.reservation {
            Some(r) if r.expiry_date <= now => {
                self.reservation = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn reservation_expiry() {
        let mut connector = Connector::new(1);
        let now = Utc::now();
        connector.reservation = Some(Reservation {
            reservation_id: 7,
            id_tag: "ABC".into(),
            parent_id_tag: None,
            expiry_date: now + Duration::minutes(5),
        });
        assert!(!connector.expire_reservation(now));
        assert!(connector.expire_reservation(now + Duration::minutes(6)));
        assert!(connector.reservation.is_none());
    }
}
