//! BootHeater Protocol
//!
//! Wire identifiers, telemetry frame decoding and command encoding. Everything
//! here is a pure function over byte slices.

use crate::domain::models::{
    Command, ControlCommand, FrameLayout, ImuSample, Telemetry, TelemetryFrame, ZoneReading,
};
use thiserror::Error;
use uuid::Uuid;

/// Heater GATT service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Control characteristic - commands are written here
pub const CONTROL_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Telemetry characteristic - frames arrive as notifications
pub const TELEMETRY_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a9);

/// Advertised local name of the device
pub const DEVICE_NAME: &str = "BootHeater";

/// Largest value an ATT attribute can carry
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Size of the trailing IMU block (7 floats)
pub const IMU_BLOCK_LEN: usize = 28;

/// Bounds applied to every outbound target before narrowing to a byte
pub const TARGET_MIN: f32 = 0.0;
pub const TARGET_MAX: f32 = 100.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short for {layout} layout: need {expected} bytes, got {actual}")]
    FrameTooShort {
        layout: FrameLayout,
        expected: usize,
        actual: usize,
    },
    #[error("no known layout for a {len}-byte frame")]
    UnknownLayout { len: usize },
}

impl FrameLayout {
    /// Bytes required before any field of this layout can be read.
    pub const fn min_len(self) -> usize {
        match self {
            Self::LegacyTemperature => 4,
            Self::SingleZonePid => 17,
            Self::DualZonePacked => 34,
            Self::DualZone => 40,
            Self::DualZoneImu => 40 + IMU_BLOCK_LEN,
        }
    }
}

/// Decode a telemetry buffer as `layout`.
///
/// # Frame layouts (little-endian)
///
/// ```text
/// DualZone (40 bytes, +28 optional IMU)
/// [0-15]  : Right temperature, error, integral, derivative (f32 x4)
/// [16-19] : Right heater power (u32)
/// [20-35] : Left temperature, error, integral, derivative (f32 x4)
/// [36-39] : Left heater power (u32)
/// [40-67] : Accel X/Y/Z, Gyro X/Y/Z, board temperature (f32 x7)
///
/// DualZonePacked (34 bytes)
/// [0-15]  : Right floats    [16] : Right power (u8)
/// [17-32] : Left floats     [33] : Left power (u8)
///
/// SingleZonePid (17 bytes)
/// [0-15]  : Floats          [16] : Power (u8)
///
/// LegacyTemperature (4 bytes)
/// [0-3]   : Temperature (f32)
/// ```
pub fn decode(bytes: &[u8], layout: FrameLayout) -> Result<Telemetry, DecodeError> {
    let expected = layout.min_len();
    if bytes.len() < expected {
        return Err(DecodeError::FrameTooShort {
            layout,
            expected,
            actual: bytes.len(),
        });
    }

    let telemetry = match layout {
        FrameLayout::LegacyTemperature => Telemetry::Temperature(read_f32(bytes, 0)),
        FrameLayout::SingleZonePid => Telemetry::SingleZone(read_zone_u8_power(bytes, 0)),
        FrameLayout::DualZonePacked => Telemetry::DualZone(TelemetryFrame {
            right: read_zone_u8_power(bytes, 0),
            left: read_zone_u8_power(bytes, 17),
            imu: None,
        }),
        FrameLayout::DualZone | FrameLayout::DualZoneImu => {
            let imu = if bytes.len() >= FrameLayout::DualZoneImu.min_len() {
                Some(read_imu(bytes, FrameLayout::DualZone.min_len()))
            } else {
                None
            };
            Telemetry::DualZone(TelemetryFrame {
                right: read_zone_u32_power(bytes, 0),
                left: read_zone_u32_power(bytes, 20),
                imu,
            })
        }
    };

    Ok(telemetry)
}

/// Callers have checked the length against the layout minimum.
fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_pid(bytes: &[u8], offset: usize, heater_power: u32) -> ZoneReading {
    ZoneReading {
        measured_temperature: read_f32(bytes, offset),
        pid_error: read_f32(bytes, offset + 4),
        pid_integral: read_f32(bytes, offset + 8),
        pid_derivative: read_f32(bytes, offset + 12),
        heater_power,
    }
}

fn read_zone_u32_power(bytes: &[u8], offset: usize) -> ZoneReading {
    read_pid(bytes, offset, read_u32(bytes, offset + 16))
}

fn read_zone_u8_power(bytes: &[u8], offset: usize) -> ZoneReading {
    read_pid(bytes, offset, bytes[offset + 16] as u32)
}

fn read_imu(bytes: &[u8], offset: usize) -> ImuSample {
    let f = |i: usize| read_f32(bytes, offset + i * 4);
    ImuSample {
        acceleration: (f(0), f(1), f(2)),
        gyro: (f(3), f(4), f(5)),
        board_temperature: f(6),
    }
}

/// Saturate into `[0, 100]` and truncate to a byte. NaN encodes as 0.
pub fn clamp_to_byte(value: f32) -> u8 {
    // `as` saturates and maps NaN to 0
    value.clamp(TARGET_MIN, TARGET_MAX) as u8
}

/// Legacy single-zone power command.
pub fn encode_power_percent(power: f32) -> [u8; 1] {
    [clamp_to_byte(power)]
}

/// Dual-zone packet: `[target_right, target_left, force_right, force_left]`.
pub fn encode_control(command: &ControlCommand) -> [u8; 4] {
    [
        clamp_to_byte(command.target_temperature_right),
        clamp_to_byte(command.target_temperature_left),
        command.force_power_level_right.as_byte(),
        command.force_power_level_left.as_byte(),
    ]
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::PowerPercent(power) => encode_power_percent(*power).to_vec(),
            Self::Control(command) => encode_control(command).to_vec(),
        }
    }
}
