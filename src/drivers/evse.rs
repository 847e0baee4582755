//! EV supply equipment driver interface

use async_trait::async_trait;

/// Controls the physical power path of one connector: contactor, pilot
/// signal and connector lock.
#[async_trait]
pub trait EvseDriver: Send + Sync {
    /// Allow energy flow on the connector.
    async fn enable(&self, connector_id: i32);

    /// Block energy flow on the connector.
    async fn disable(&self, connector_id: i32);

    /// Suspend an ongoing charge without ending the session.
    async fn pause_charging(&self, connector_id: i32);

    /// Resume a suspended charge.
    async fn resume_charging(&self, connector_id: i32);

    /// Abort the charge; `reason` is the OCPP stop reason that will be
    /// reported.
    async fn cancel_charging(&self, connector_id: i32, reason: &str);

    /// Release the connector lock. Returns `false` if the motor failed or
    /// unlocking is not supported.
    async fn unlock_connector(&self, connector_id: i32) -> bool;

    /// Apply a new current limit from the composite schedule. Returns
    /// `false` if the limit could not be applied.
    async fn set_max_current(&self, connector_id: i32, amps: f32) -> bool;
}
