//! Device model: typed key/value configuration store
//!
//! The central system introspects and reconfigures the station through
//! `GetConfiguration` / `ChangeConfiguration`; every other component reads
//! its tunables from here.

pub mod catalogue;
pub mod store;

pub use catalogue::{CslKind, FeatureProfile, KeyMeta, KnownKey, Mutability, Validator};
pub use store::{ConfigChange, DeviceModel, SetResult};
