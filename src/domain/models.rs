use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a discovered radio peer (its Bluetooth address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Why the link is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Radio powered off, unsupported, unauthorized or resetting.
    RadioUnavailable,
    DiscoveryFailed,
    ConnectFailed,
    LinkLost,
}

impl FailureKind {
    /// Whether the automatic rescan loop picks up after this failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::RadioUnavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ConnectionFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting(PeerId),
    DiscoveringServices(PeerId),
    DiscoveringCharacteristics(PeerId),
    Connected(PeerId),
    Failed(ConnectionFailure),
}

impl ConnectionState {
    /// The peer this state is bound to, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::Connecting(p)
            | Self::DiscoveringServices(p)
            | Self::DiscoveringCharacteristics(p)
            | Self::Connected(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting(p) => write!(f, "Connecting({p})"),
            Self::DiscoveringServices(p) => write!(f, "DiscoveringServices({p})"),
            Self::DiscoveringCharacteristics(p) => write!(f, "DiscoveringCharacteristics({p})"),
            Self::Connected(p) => write!(f, "Connected({p})"),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Sensor and PID diagnostics for one heated zone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoneReading {
    pub measured_temperature: f32,
    pub pid_error: f32,
    pub pid_integral: f32,
    pub pid_derivative: f32,
    /// Device-reported output, 0-100.
    pub heater_power: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    pub acceleration: (f32, f32, f32),
    pub gyro: (f32, f32, f32),
    pub board_temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub left: ZoneReading,
    pub right: ZoneReading,
    pub imu: Option<ImuSample>,
}

/// Telemetry wire layouts, one per firmware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    /// One float: measured temperature.
    LegacyTemperature,
    /// One zone of PID diagnostics with a byte-wide power field.
    SingleZonePid,
    /// Two zones with byte-wide power fields and unaligned floats after.
    DualZonePacked,
    /// Two zones with 4-byte power fields, IMU block optional.
    DualZone,
    /// Two zones plus a mandatory IMU block.
    DualZoneImu,
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LegacyTemperature => "legacy temperature",
            Self::SingleZonePid => "single-zone PID",
            Self::DualZonePacked => "dual-zone packed",
            Self::DualZone => "dual-zone",
            Self::DualZoneImu => "dual-zone + IMU",
        };
        f.write_str(name)
    }
}

/// One decoded notification, shaped by the layout it was decoded as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Telemetry {
    /// Float-only temperature from the earliest firmware.
    Temperature(f32),
    SingleZone(ZoneReading),
    DualZone(TelemetryFrame),
}

impl Telemetry {
    pub fn frame(&self) -> Option<&TelemetryFrame> {
        match self {
            Self::DualZone(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Manual override of a zone's closed-loop control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForcePowerLevel {
    Off,
    Pct0,
    Pct25,
    Pct50,
    Pct100,
    #[default]
    TrackTemperature,
}

impl ForcePowerLevel {
    pub const ALL: [ForcePowerLevel; 6] = [
        Self::Off,
        Self::Pct0,
        Self::Pct25,
        Self::Pct50,
        Self::Pct100,
        Self::TrackTemperature,
    ];

    /// Ordinal sent on the wire.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Pct0 => 1,
            Self::Pct25 => 2,
            Self::Pct50 => 3,
            Self::Pct100 => 4,
            Self::TrackTemperature => 5,
        }
    }

    /// Successor in cycling order, wrapping after `TrackTemperature`.
    pub fn next(self) -> Self {
        let idx = self.as_byte() as usize;
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCommand {
    pub target_temperature_right: f32,
    pub target_temperature_left: f32,
    pub force_power_level_right: ForcePowerLevel,
    pub force_power_level_left: ForcePowerLevel,
}

impl ControlCommand {
    /// Both zones tracking the same target.
    pub fn tracking(target: f32) -> Self {
        Self {
            target_temperature_right: target,
            target_temperature_left: target,
            force_power_level_right: ForcePowerLevel::TrackTemperature,
            force_power_level_left: ForcePowerLevel::TrackTemperature,
        }
    }
}

/// Outbound request to the heater, in either protocol generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Legacy single-zone power percentage.
    PowerPercent(f32),
    Control(ControlCommand),
}

/// Non-fatal events surfaced on the diagnostic channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    DecodeFailed { len: usize, reason: String },
    CommandDropped { state: ConnectionState },
    CommandSendFailed { reason: String },
    IgnoredEvent { detail: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecodeFailed { len, reason } => {
                write!(f, "dropped {len}-byte frame: {reason}")
            }
            Self::CommandDropped { state } => write!(f, "command dropped while {state}"),
            Self::CommandSendFailed { reason } => write!(f, "command send failed: {reason}"),
            Self::IgnoredEvent { detail } => write!(f, "ignored event: {detail}"),
        }
    }
}
