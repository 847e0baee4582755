//! Error taxonomy
//!
//! Protocol-boundary errors map onto OCPP-J CallError codes; internal
//! errors are split into transport (transient, retried by the message
//! queue), validation, storage and driver categories.

use thiserror::Error;

/// OCPP-J CallError codes (OCPP 1.6 section 4.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl CallErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised inside the charge point core.
#[derive(Debug, Error)]
pub enum ChargePointError {
    #[error("Transport: {0}")]
    Transport(String),

    #[error("Offline: no response from central system")]
    Offline,

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Unknown connector: {0}")]
    UnknownConnector(i32),

    #[error("No transaction active on connector {0}")]
    NoTransaction(i32),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Driver error: {0}")]
    Driver(String),
}

impl ChargePointError {
    /// Transport errors recover via queue retry; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Offline)
    }
}

/// Errors from the persisted-state layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ChargePointError>;
