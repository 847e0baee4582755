//! Status transitions (OCPP 1.6 Figure 4)

use rust_ocpp::v1_6::types::{ChargePointErrorCode, ChargePointStatus};
use tracing::warn;

/// Events driving a connector's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// Cable plugged / user interaction started.
    UsageInitiated,
    StartCharging,
    PauseChargingEv,
    PauseChargingEvse,
    TransactionStoppedAndUserActionRequired,
    BecomeAvailable,
    ReserveConnector,
    ChangeAvailabilityToUnavailable,
    FaultDetected,
    /// I1: fault cleared, return to Available.
    ReturnToAvailable,
}

/// Outcome of applying an event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: ChargePointStatus,
    pub to: ChargePointStatus,
    pub error_code: ChargePointErrorCode,
}

#[derive(Debug)]
pub struct StateMachine {
    status: ChargePointStatus,
    /// Connector 0 only moves between Available, Unavailable and Faulted.
    reduced: bool,
    /// Status to restore when a fault clears while a special state was
    /// active is always Available per I1.
    last_error_code: ChargePointErrorCode,
}

impl StateMachine {
    pub fn new(reduced: bool) -> Self {
        Self {
            status: ChargePointStatus::Available,
            reduced,
            last_error_code: ChargePointErrorCode::NoError,
        }
    }

    pub fn status(&self) -> ChargePointStatus {
        self.status.clone()
    }

    pub fn last_error_code(&self) -> ChargePointErrorCode {
        self.last_error_code.clone()
    }

    /// Apply an event. Returns the transition when the status changed;
    /// invalid events for the current state are logged and ignored.
    pub fn apply(&mut self, event: ConnectorEvent) -> Option<Transition> {
        self.apply_with_error(event, ChargePointErrorCode::NoError)
    }

    /// Apply a fault with a concrete error code.
    pub fn apply_with_error(
        &mut self,
        event: ConnectorEvent,
        error_code: ChargePointErrorCode,
    ) -> Option<Transition> {
        use ChargePointStatus::*;
        use ConnectorEvent::*;

        if self.reduced {
            return self.apply_reduced(event, error_code);
        }

        let next = match (self.status.clone(), event) {
            (Available, UsageInitiated) => Some(Preparing),
            (Available, ReserveConnector) => Some(Reserved),
            (Available, ChangeAvailabilityToUnavailable) => Some(Unavailable),

            (Preparing, StartCharging) => Some(Charging),
            (Preparing, BecomeAvailable) => Some(Available),
            (Preparing, ChangeAvailabilityToUnavailable) => Some(Unavailable),

            (Charging, PauseChargingEv) => Some(SuspendedEV),
            (Charging, PauseChargingEvse) => Some(SuspendedEVSE),

            (SuspendedEV, StartCharging) => Some(Charging),
            (SuspendedEV, PauseChargingEvse) => Some(SuspendedEVSE),
            (SuspendedEVSE, StartCharging) => Some(Charging),
            (SuspendedEVSE, PauseChargingEv) => Some(SuspendedEV),

            (Finishing, BecomeAvailable) => Some(Available),
            (Finishing, UsageInitiated) => Some(Preparing),
            (Finishing, ChangeAvailabilityToUnavailable) => Some(Unavailable),

            (Reserved, BecomeAvailable) => Some(Available),
            (Reserved, UsageInitiated) => Some(Preparing),
            (Reserved, ChangeAvailabilityToUnavailable) => Some(Unavailable),

            (Unavailable, BecomeAvailable) => Some(Available),

            (Faulted, ReturnToAvailable) => Some(Available),

            // Stopping a transaction leaves any non-faulted state for
            // Finishing.
            (from, TransactionStoppedAndUserActionRequired) if from != Faulted => Some(Finishing),

            (from, FaultDetected) if from != Faulted => Some(Faulted),

            _ => None,
        };

        self.finish(event, next, error_code)
    }

    fn apply_reduced(
        &mut self,
        event: ConnectorEvent,
        error_code: ChargePointErrorCode,
    ) -> Option<Transition> {
        use ChargePointStatus::*;
        use ConnectorEvent::*;

        let next = match (self.status.clone(), event) {
            (Available, ChangeAvailabilityToUnavailable) => Some(Unavailable),
            (Unavailable, BecomeAvailable) => Some(Available),
            (Faulted, ReturnToAvailable) => Some(Available),
            (from, FaultDetected) if from != Faulted => Some(Faulted),
            _ => None,
        };

        self.finish(event, next, error_code)
    }

    fn finish(
        &mut self,
        event: ConnectorEvent,
        next: Option<ChargePointStatus>,
        error_code: ChargePointErrorCode,
    ) -> Option<Transition> {
        match next {
            Some(to) if to != self.status => {
                let from = self.status.clone();
                self.status = to.clone();
                self.last_error_code = error_code.clone();
                Some(Transition {
                    from,
                    to,
                    error_code,
                })
            }
            Some(_) => None,
            None => {
                warn!(status = ?self.status, ?event, "Ignoring invalid connector event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChargePointStatus::*;
    use ConnectorEvent::*;

    fn machine_in(status: ChargePointStatus) -> StateMachine {
        let mut sm = StateMachine::new(false);
        // walk the machine into the requested state
        match status {
            Available => {}
            Preparing => {
                sm.apply(UsageInitiated);
            }
            Charging => {
                sm.apply(UsageInitiated);
                sm.apply(StartCharging);
            }
            SuspendedEV => {
                sm.apply(UsageInitiated);
                sm.apply(StartCharging);
                sm.apply(PauseChargingEv);
            }
            SuspendedEVSE => {
                sm.apply(UsageInitiated);
                sm.apply(StartCharging);
                sm.apply(PauseChargingEvse);
            }
            Finishing => {
                sm.apply(UsageInitiated);
                sm.apply(StartCharging);
                sm.apply(TransactionStoppedAndUserActionRequired);
            }
            Reserved => {
                sm.apply(ReserveConnector);
            }
            Unavailable => {
                sm.apply(ChangeAvailabilityToUnavailable);
            }
            Faulted => {
                sm.apply(FaultDetected);
            }
        }
        assert_eq!(sm.status(), status);
        sm
    }

    #[test]
    fn full_charge_cycle() {
        let mut sm = StateMachine::new(false);
        assert_eq!(sm.apply(UsageInitiated).unwrap().to, Preparing);
        assert_eq!(sm.apply(StartCharging).unwrap().to, Charging);
        assert_eq!(sm.apply(PauseChargingEv).unwrap().to, SuspendedEV);
        assert_eq!(sm.apply(StartCharging).unwrap().to, Charging);
        assert_eq!(
            sm.apply(TransactionStoppedAndUserActionRequired).unwrap().to,
            Finishing
        );
        assert_eq!(sm.apply(BecomeAvailable).unwrap().to, Available);
    }

    #[test]
    fn suspension_can_swap_sides() {
        let mut sm = machine_in(SuspendedEV);
        assert_eq!(sm.apply(PauseChargingEvse).unwrap().to, SuspendedEVSE);
        assert_eq!(sm.apply(PauseChargingEv).unwrap().to, SuspendedEV);
    }

    #[test]
    fn fault_from_any_state_and_recovery() {
        for status in [Available, Preparing, Charging, Reserved, Unavailable] {
            let mut sm = machine_in(status);
            let t = sm
                .apply_with_error(FaultDetected, ChargePointErrorCode::GroundFailure)
                .unwrap();
            assert_eq!(t.to, Faulted);
            assert_eq!(t.error_code, ChargePointErrorCode::GroundFailure);
            assert_eq!(sm.apply(ReturnToAvailable).unwrap().to, Available);
        }
    }

    #[test]
    fn faulted_ignores_transaction_stop() {
        let mut sm = machine_in(Faulted);
        assert!(sm.apply(TransactionStoppedAndUserActionRequired).is_none());
        assert_eq!(sm.status(), Faulted);
    }

    #[test]
    fn reservation_round_trip() {
        let mut sm = StateMachine::new(false);
        assert_eq!(sm.apply(ReserveConnector).unwrap().to, Reserved);
        assert_eq!(sm.apply(BecomeAvailable).unwrap().to, Available);
        // holder arrives: Reserved -> Preparing
        sm.apply(ReserveConnector);
        assert_eq!(sm.apply(UsageInitiated).unwrap().to, Preparing);
    }

    #[test]
    fn invalid_event_is_ignored() {
        let mut sm = StateMachine::new(false);
        assert!(sm.apply(StartCharging).is_none());
        assert_eq!(sm.status(), Available);
    }

    #[test]
    fn connector_zero_is_reduced() {
        let mut sm = StateMachine::new(true);
        assert!(sm.apply(UsageInitiated).is_none());
        assert!(sm.apply(ReserveConnector).is_none());
        assert_eq!(
            sm.apply(ChangeAvailabilityToUnavailable).unwrap().to,
            Unavailable
        );
        assert_eq!(sm.apply(BecomeAvailable).unwrap().to, Available);
        assert_eq!(sm.apply(FaultDetected).unwrap().to, Faulted);
        assert_eq!(sm.apply(ReturnToAvailable).unwrap().to, Available);
    }
}
