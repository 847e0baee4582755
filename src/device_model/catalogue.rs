//! Known configuration key catalogue
//!
//! Every standard key has compile-time metadata: the feature profile it is
//! reported under, its mutability, its validator and whether a write only
//! takes effect after reboot. Keys outside the catalogue are handled through
//! the dynamic custom-key path in [`crate::device_model::DeviceModel`].

use std::fmt;

/// Feature profile a configuration key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureProfile {
    Core,
    FirmwareManagement,
    LocalAuthListManagement,
    Reservation,
    SmartCharging,
    RemoteTrigger,
    Security,
    PnC,
    CostAndPrice,
    Internal,
    Custom,
}

impl FeatureProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::FirmwareManagement => "FirmwareManagement",
            Self::LocalAuthListManagement => "LocalAuthListManagement",
            Self::Reservation => "Reservation",
            Self::SmartCharging => "SmartCharging",
            Self::RemoteTrigger => "RemoteTrigger",
            Self::Security => "Security",
            Self::PnC => "PnC",
            Self::CostAndPrice => "CostAndPrice",
            Self::Internal => "Internal",
            Self::Custom => "Custom",
        }
    }
}

impl fmt::Display for FeatureProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may change a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Elements allowed inside comma-separated-list keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CslKind {
    Measurands,
    FeatureProfiles,
    PhaseRotation,
    ChargingRateUnits,
    MessageTypes,
    ProfilePurposes,
    FileTransferProtocols,
}

/// Value-format rule applied on `ChangeConfiguration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Free-form string.
    Any,
    /// Decimal integer >= 0.
    PositiveInteger,
    /// Decimal integer within the inclusive range.
    IntegerRange(i64, i64),
    /// Exactly `"true"` or `"false"`.
    Boolean,
    /// Comma-separated list of the given element kind.
    Csl(CslKind),
    /// Structured JSON object (CostAndPrice keys).
    JsonObject,
    /// String length bounds (inclusive).
    StringLen(usize, usize),
    /// AuthorizationKey rule: >= 8 chars, or >= 40 hex chars decoding to
    /// >= 8 bytes.
    AuthorizationKey,
}

/// Compile-time metadata for a known key.
#[derive(Debug, Clone, Copy)]
pub struct KeyMeta {
    pub profile: FeatureProfile,
    pub mutability: Mutability,
    pub validator: Validator,
    pub reboot_required: bool,
}

macro_rules! known_keys {
    ($( $variant:ident => ($profile:ident, $mutability:ident, $validator:expr, $reboot:literal) ),+ $(,)?) => {
        /// Standard configuration keys understood by the charge point.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum KnownKey {
            $( $variant, )+
        }

        impl KnownKey {
            pub const ALL: &'static [KnownKey] = &[ $( KnownKey::$variant, )+ ];

            /// The key name as it appears on the wire.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )+
                }
            }

            /// Look a key up by its wire name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( stringify!($variant) => Some(Self::$variant), )+
                    _ => None,
                }
            }

            pub fn meta(&self) -> KeyMeta {
                match self {
                    $( Self::$variant => KeyMeta {
                        profile: FeatureProfile::$profile,
                        mutability: Mutability::$mutability,
                        validator: $validator,
                        reboot_required: $reboot,
                    }, )+
                }
            }
        }
    };
}

const OCSP_REQUEST_INTERVAL_MIN: i64 = 86400;

known_keys! {
    // ── Core profile ───────────────────────────────────────────
    AllowOfflineTxForUnknownId => (Core, ReadWrite, Validator::Boolean, false),
    AuthorizationCacheEnabled => (Core, ReadWrite, Validator::Boolean, false),
    AuthorizeRemoteTxRequests => (Core, ReadWrite, Validator::Boolean, false),
    BlinkRepeat => (Core, ReadWrite, Validator::PositiveInteger, false),
    ClockAlignedDataInterval => (Core, ReadWrite, Validator::PositiveInteger, false),
    ConnectionTimeOut => (Core, ReadWrite, Validator::PositiveInteger, false),
    ConnectorPhaseRotation => (Core, ReadWrite, Validator::Csl(CslKind::PhaseRotation), false),
    ConnectorPhaseRotationMaxLength => (Core, ReadOnly, Validator::PositiveInteger, false),
    GetConfigurationMaxKeys => (Core, ReadOnly, Validator::PositiveInteger, false),
    HeartbeatInterval => (Core, ReadWrite, Validator::PositiveInteger, false),
    LightIntensity => (Core, ReadWrite, Validator::IntegerRange(0, 100), false),
    LocalAuthorizeOffline => (Core, ReadWrite, Validator::Boolean, false),
    LocalPreAuthorize => (Core, ReadWrite, Validator::Boolean, false),
    MaxEnergyOnInvalidId => (Core, ReadWrite, Validator::PositiveInteger, false),
    MeterValuesAlignedData => (Core, ReadWrite, Validator::Csl(CslKind::Measurands), false),
    MeterValuesAlignedDataMaxLength => (Core, ReadOnly, Validator::PositiveInteger, false),
    MeterValuesSampledData => (Core, ReadWrite, Validator::Csl(CslKind::Measurands), false),
    MeterValuesSampledDataMaxLength => (Core, ReadOnly, Validator::PositiveInteger, false),
    MeterValueSampleInterval => (Core, ReadWrite, Validator::PositiveInteger, false),
    MinimumStatusDuration => (Core, ReadWrite, Validator::PositiveInteger, false),
    NumberOfConnectors => (Core, ReadOnly, Validator::PositiveInteger, false),
    ResetRetries => (Core, ReadWrite, Validator::PositiveInteger, false),
    StopTransactionOnEVSideDisconnect => (Core, ReadWrite, Validator::Boolean, false),
    StopTransactionOnInvalidId => (Core, ReadWrite, Validator::Boolean, false),
    StopTxnAlignedData => (Core, ReadWrite, Validator::Csl(CslKind::Measurands), false),
    StopTxnAlignedDataMaxLength => (Core, ReadOnly, Validator::PositiveInteger, false),
    StopTxnSampledData => (Core, ReadWrite, Validator::Csl(CslKind::Measurands), false),
    StopTxnSampledDataMaxLength => (Core, ReadOnly, Validator::PositiveInteger, false),
    SupportedFeatureProfiles => (Core, ReadOnly, Validator::Csl(CslKind::FeatureProfiles), false),
    SupportedFeatureProfilesMaxLength => (Core, ReadOnly, Validator::PositiveInteger, false),
    TransactionMessageAttempts => (Core, ReadWrite, Validator::PositiveInteger, false),
    TransactionMessageRetryInterval => (Core, ReadWrite, Validator::PositiveInteger, false),
    UnlockConnectorOnEVSideDisconnect => (Core, ReadWrite, Validator::Boolean, false),
    WebSocketPingInterval => (Core, ReadWrite, Validator::PositiveInteger, false),

    // ── FirmwareManagement profile ─────────────────────────────
    SupportedFileTransferProtocols => (FirmwareManagement, ReadOnly, Validator::Csl(CslKind::FileTransferProtocols), false),

    // ── LocalAuthListManagement profile ────────────────────────
    LocalAuthListEnabled => (LocalAuthListManagement, ReadWrite, Validator::Boolean, false),
    LocalAuthListMaxLength => (LocalAuthListManagement, ReadOnly, Validator::PositiveInteger, false),
    SendLocalListMaxLength => (LocalAuthListManagement, ReadOnly, Validator::PositiveInteger, false),

    // ── Reservation profile ────────────────────────────────────
    ReserveConnectorZeroSupported => (Reservation, ReadOnly, Validator::Boolean, false),

    // ── SmartCharging profile ──────────────────────────────────
    ChargeProfileMaxStackLevel => (SmartCharging, ReadOnly, Validator::PositiveInteger, false),
    ChargingScheduleAllowedChargingRateUnit => (SmartCharging, ReadOnly, Validator::Csl(CslKind::ChargingRateUnits), false),
    ChargingScheduleMaxPeriods => (SmartCharging, ReadOnly, Validator::PositiveInteger, false),
    ConnectorSwitch3to1PhaseSupported => (SmartCharging, ReadOnly, Validator::Boolean, false),
    MaxChargingProfilesInstalled => (SmartCharging, ReadOnly, Validator::PositiveInteger, false),

    // ── Security profile ───────────────────────────────────────
    AdditionalRootCertificateCheck => (Security, ReadOnly, Validator::Boolean, false),
    AuthorizationKey => (Security, WriteOnly, Validator::AuthorizationKey, false),
    CertificateSignedMaxChainSize => (Security, ReadOnly, Validator::PositiveInteger, false),
    CertificateStoreMaxLength => (Security, ReadOnly, Validator::PositiveInteger, false),
    CpoName => (Security, ReadWrite, Validator::Any, false),
    DisableSecurityEventNotifications => (Security, ReadWrite, Validator::Boolean, false),
    SecurityProfile => (Security, ReadWrite, Validator::IntegerRange(0, 3), false),

    // ── PnC profile ────────────────────────────────────────────
    CentralContractValidationAllowed => (PnC, ReadWrite, Validator::Boolean, false),
    ContractValidationOffline => (PnC, ReadWrite, Validator::Boolean, false),
    ISO15118CertificateManagementEnabled => (PnC, ReadWrite, Validator::Boolean, false),
    ISO15118PnCEnabled => (PnC, ReadWrite, Validator::Boolean, false),
    OcspRequestInterval => (PnC, ReadWrite, Validator::IntegerRange(OCSP_REQUEST_INTERVAL_MIN, i64::MAX), false),
    SeccLeafSubjectCommonName => (PnC, ReadWrite, Validator::StringLen(7, 64), false),
    SeccLeafSubjectCountry => (PnC, ReadWrite, Validator::StringLen(2, 2), false),
    SeccLeafSubjectOrganization => (PnC, ReadWrite, Validator::StringLen(1, 64), false),

    // ── CostAndPrice profile ───────────────────────────────────
    CustomDisplayCostAndPrice => (CostAndPrice, ReadOnly, Validator::Boolean, false),
    DefaultPrice => (CostAndPrice, ReadWrite, Validator::JsonObject, false),
    DefaultPriceText => (CostAndPrice, ReadWrite, Validator::JsonObject, false),
    CustomIdleFeeAfterStop => (CostAndPrice, ReadWrite, Validator::Boolean, false),
    CustomMultiLanguageMessages => (CostAndPrice, ReadOnly, Validator::Boolean, false),
    Language => (CostAndPrice, ReadWrite, Validator::StringLen(2, 8), false),
    NumberOfDecimalsForCostValues => (CostAndPrice, ReadWrite, Validator::IntegerRange(0, 9), false),
    SupportedLanguages => (CostAndPrice, ReadOnly, Validator::Any, false),
    WaitForSetUserPriceTimeout => (CostAndPrice, ReadWrite, Validator::IntegerRange(0, 30000), false),

    // ── Internal keys (not reported via GetConfiguration) ──────
    AllowChargingProfileWithoutStartSchedule => (Internal, ReadWrite, Validator::Boolean, false),
    AuthorizeConnectorZeroOnConnectorOne => (Internal, ReadOnly, Validator::Boolean, false),
    CentralSystemURI => (Internal, ReadWrite, Validator::Any, false),
    ChargeBoxSerialNumber => (Internal, ReadOnly, Validator::Any, false),
    ChargePointId => (Internal, ReadOnly, Validator::Any, false),
    ChargePointModel => (Internal, ReadOnly, Validator::Any, false),
    ChargePointSerialNumber => (Internal, ReadOnly, Validator::Any, false),
    ChargePointVendor => (Internal, ReadOnly, Validator::Any, false),
    CompositeScheduleDefaultLimitAmps => (Internal, ReadWrite, Validator::PositiveInteger, false),
    CompositeScheduleDefaultLimitWatts => (Internal, ReadWrite, Validator::PositiveInteger, false),
    CompositeScheduleDefaultNumberPhases => (Internal, ReadWrite, Validator::IntegerRange(1, 3), false),
    ConnectorEvseIds => (Internal, ReadWrite, Validator::Any, false),
    FirmwareVersion => (Internal, ReadOnly, Validator::Any, false),
    HostName => (Internal, ReadWrite, Validator::Any, true),
    ICCID => (Internal, ReadOnly, Validator::Any, false),
    IFace => (Internal, ReadWrite, Validator::Any, true),
    IMSI => (Internal, ReadOnly, Validator::Any, false),
    IgnoredProfilePurposesOffline => (Internal, ReadWrite, Validator::Csl(CslKind::ProfilePurposes), false),
    MaxCompositeScheduleDuration => (Internal, ReadOnly, Validator::PositiveInteger, false),
    MaxMessageSize => (Internal, ReadWrite, Validator::PositiveInteger, true),
    MessageQueueSizeThreshold => (Internal, ReadWrite, Validator::PositiveInteger, false),
    MessageTypesDiscardForQueueing => (Internal, ReadWrite, Validator::Csl(CslKind::MessageTypes), false),
    MeterSerialNumber => (Internal, ReadOnly, Validator::Any, false),
    MeterType => (Internal, ReadOnly, Validator::Any, false),
    QueueAllMessages => (Internal, ReadWrite, Validator::Boolean, false),
    RetryBackoffRandomRange => (Internal, ReadWrite, Validator::PositiveInteger, false),
    RetryBackoffRepeatTimes => (Internal, ReadWrite, Validator::PositiveInteger, false),
    RetryBackoffWaitMinimum => (Internal, ReadWrite, Validator::PositiveInteger, false),
    SupplyVoltage => (Internal, ReadWrite, Validator::PositiveInteger, false),
    SupportedChargingProfilePurposeTypes => (Internal, ReadOnly, Validator::Csl(CslKind::ProfilePurposes), false),
    SupportedCiphers12 => (Internal, ReadOnly, Validator::Any, false),
    SupportedCiphers13 => (Internal, ReadOnly, Validator::Any, false),
    SupportedMeasurands => (Internal, ReadOnly, Validator::Csl(CslKind::Measurands), false),
    StopTransactionIfUnlockNotSupported => (Internal, ReadWrite, Validator::Boolean, false),
    TimeOffset => (Internal, ReadWrite, Validator::Any, false),
    UseSslDefaultVerifyPaths => (Internal, ReadWrite, Validator::Boolean, true),
    VerifyCsmsAllowWildcards => (Internal, ReadWrite, Validator::Boolean, false),
    VerifyCsmsCommonName => (Internal, ReadOnly, Validator::Boolean, false),
    WaitForStopTransactionsOnResetTimeout => (Internal, ReadWrite, Validator::PositiveInteger, false),
    WebsocketPingPayload => (Internal, ReadOnly, Validator::Any, false),
    WebsocketPongTimeout => (Internal, ReadWrite, Validator::PositiveInteger, false),
}

// ── Value validation ───────────────────────────────────────────

pub(crate) fn is_positive_integer(value: &str) -> bool {
    !value.is_empty() && value.parse::<i64>().map_or(false, |v| v >= 0)
}

pub(crate) fn is_bool(value: &str) -> bool {
    value == "true" || value == "false"
}

fn csl_elements(value: &str) -> Vec<&str> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(',').map(|s| s.trim()).collect()
}

fn valid_csl_element(kind: CslKind, element: &str) -> bool {
    match kind {
        CslKind::Measurands => matches!(
            element,
            "Current.Export"
                | "Current.Import"
                | "Current.Offered"
                | "Energy.Active.Export.Register"
                | "Energy.Active.Import.Register"
                | "Energy.Reactive.Export.Register"
                | "Energy.Reactive.Import.Register"
                | "Energy.Active.Export.Interval"
                | "Energy.Active.Import.Interval"
                | "Energy.Reactive.Export.Interval"
                | "Energy.Reactive.Import.Interval"
                | "Frequency"
                | "Power.Active.Export"
                | "Power.Active.Import"
                | "Power.Factor"
                | "Power.Offered"
                | "Power.Reactive.Export"
                | "Power.Reactive.Import"
                | "RPM"
                | "SoC"
                | "Temperature"
                | "Voltage"
        ),
        CslKind::FeatureProfiles => matches!(
            element,
            "Core"
                | "FirmwareManagement"
                | "LocalAuthListManagement"
                | "Reservation"
                | "SmartCharging"
                | "RemoteTrigger"
        ),
        CslKind::PhaseRotation => {
            // Each element is "<connectorId>.<rotation>"
            match element.split_once('.') {
                Some((connector, rotation)) => {
                    connector.parse::<u32>().is_ok()
                        && matches!(rotation, "NotApplicable" | "Unknown" | "RST" | "RTS" | "SRT" | "STR" | "TRS" | "TSR")
                }
                None => false,
            }
        }
        CslKind::ChargingRateUnits => matches!(element, "Current" | "Power" | "A" | "W"),
        CslKind::MessageTypes => matches!(
            element,
            "BootNotification"
                | "Authorize"
                | "DataTransfer"
                | "DiagnosticsStatusNotification"
                | "FirmwareStatusNotification"
                | "Heartbeat"
                | "LogStatusNotification"
                | "MeterValues"
                | "SecurityEventNotification"
                | "SignCertificate"
                | "SignedFirmwareStatusNotification"
                | "StatusNotification"
        ),
        CslKind::ProfilePurposes => matches!(
            element,
            "ChargePointMaxProfile" | "TxDefaultProfile" | "TxProfile"
        ),
        CslKind::FileTransferProtocols => {
            matches!(element, "FTP" | "FTPS" | "HTTP" | "HTTPS" | "SFTP")
        }
    }
}

/// Check whether `value` is a well-formed AuthorizationKey: at least 8
/// characters, or a hex string of 40+ characters decoding to 8+ bytes.
pub(crate) fn is_valid_authorization_key(value: &str) -> bool {
    if value.len() >= 40 && value.len() % 2 == 0 {
        if let Ok(decoded) = hex::decode(value) {
            return decoded.len() >= 8;
        }
    }
    value.len() >= 8
}

impl Validator {
    /// Apply this rule to a candidate value.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::PositiveInteger => is_positive_integer(value),
            Self::IntegerRange(lo, hi) => value
                .parse::<i64>()
                .map_or(false, |v| v >= *lo && v <= *hi),
            Self::Boolean => is_bool(value),
            Self::Csl(kind) => csl_elements(value)
                .iter()
                .all(|e| valid_csl_element(*kind, e)),
            Self::JsonObject => serde_json::from_str::<serde_json::Value>(value)
                .map_or(false, |v| v.is_object()),
            Self::StringLen(lo, hi) => value.len() >= *lo && value.len() <= *hi,
            Self::AuthorizationKey => is_valid_authorization_key(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            KnownKey::from_name("HeartbeatInterval"),
            Some(KnownKey::HeartbeatInterval)
        );
        assert_eq!(KnownKey::from_name("NoSuchKey"), None);
        assert_eq!(KnownKey::HeartbeatInterval.name(), "HeartbeatInterval");
    }

    #[test]
    fn booleans_are_strict() {
        assert!(Validator::Boolean.accepts("true"));
        assert!(Validator::Boolean.accepts("false"));
        assert!(!Validator::Boolean.accepts("1"));
        assert!(!Validator::Boolean.accepts("True"));
    }

    #[test]
    fn positive_integer_rejects_signs_and_text() {
        assert!(Validator::PositiveInteger.accepts("0"));
        assert!(Validator::PositiveInteger.accepts("900"));
        assert!(!Validator::PositiveInteger.accepts("-1"));
        assert!(!Validator::PositiveInteger.accepts("12.5"));
        assert!(!Validator::PositiveInteger.accepts(""));
    }

    #[test]
    fn number_phases_range() {
        let meta = KnownKey::CompositeScheduleDefaultNumberPhases.meta();
        assert!(meta.validator.accepts("1"));
        assert!(meta.validator.accepts("3"));
        assert!(!meta.validator.accepts("0"));
        assert!(!meta.validator.accepts("4"));
    }

    #[test]
    fn measurand_csl() {
        let v = Validator::Csl(CslKind::Measurands);
        assert!(v.accepts("Energy.Active.Import.Register,Power.Active.Import"));
        assert!(v.accepts("SoC"));
        assert!(!v.accepts("Energy.Active.Import.Register,NotAMeasurand"));
    }

    #[test]
    fn phase_rotation_csl() {
        let v = Validator::Csl(CslKind::PhaseRotation);
        assert!(v.accepts("1.RST,2.RTS"));
        assert!(v.accepts("0.Unknown"));
        assert!(!v.accepts("1.XYZ"));
        assert!(!v.accepts("RST"));
    }

    #[test]
    fn authorization_key_rules() {
        // plain text key must be at least 8 chars
        assert!(is_valid_authorization_key("s3cr3tkey"));
        assert!(!is_valid_authorization_key("short"));
        // 40-char hex decodes to 20 bytes
        assert!(is_valid_authorization_key(
            "00112233445566778899aabbccddeeff00112233"
        ));
    }

    #[test]
    fn authorization_key_is_write_only() {
        let meta = KnownKey::AuthorizationKey.meta();
        assert_eq!(meta.mutability, Mutability::WriteOnly);
        assert_eq!(meta.profile, FeatureProfile::Security);
    }

    #[test]
    fn ocsp_interval_minimum() {
        let meta = KnownKey::OcspRequestInterval.meta();
        assert!(!meta.validator.accepts("3600"));
        assert!(meta.validator.accepts("86400"));
    }
}
