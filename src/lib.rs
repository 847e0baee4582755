//! # OCPP 1.6 Charge Point
//!
//! Embedded client runtime for an EV charging station speaking OCPP-J 1.6
//! to a central system.
//!
//! ## Architecture
//!
//! - **support**: OCPP-J framing, error taxonomy, security-extension types
//! - **device_model**: typed configuration registry with key catalogue
//! - **queue**: persistent outbound Call queue with retry and id rewrite
//! - **link**: reconnecting WebSocket transport (security profiles 0-3)
//! - **boot**: registration handshake gating all other traffic
//! - **connector**: per-connector status state machine
//! - **transaction**: authorization, session lifecycle, metering
//! - **smart_charging**: profile storage and composite schedule engine
//! - **dispatcher**: inbound Call routing, one handler per action
//! - **drivers**: EVSE / meter / certificate / file collaborator traits
//! - **storage**: persisted state (SQLite via SeaORM, in-memory double)

pub mod boot;
pub mod charge_point;
pub mod config;
pub mod connector;
pub mod device_model;
pub mod dispatcher;
pub mod drivers;
pub mod link;
pub mod queue;
pub mod smart_charging;
pub mod storage;
pub mod support;
pub mod transaction;

// Re-export commonly used types at crate root
pub use charge_point::ChargePoint;
pub use config::{default_config_path, AppConfig};
pub use device_model::{DeviceModel, KnownKey, SetResult};
pub use dispatcher::{Dispatcher, ResetKind};
pub use queue::{EnhancedMessage, MessageQueue};
pub use smart_charging::SmartChargingHandler;
pub use storage::{init_database, DatabaseConfig, MemoryStorage, SqliteStorage, Storage};
pub use support::{CallErrorCode, ChargePointError, OcppFrame};
pub use transaction::TransactionManager;
