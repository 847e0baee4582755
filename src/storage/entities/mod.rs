//! SeaORM entities for persisted charge point state

pub mod auth_cache;
pub mod charging_profile;
pub mod config_entry;
pub mod connector_availability;
pub mod local_list;
