//! BLE telemetry and control link for the BootHeater dual-zone boot heater.

pub mod domain;
pub mod infrastructure;
