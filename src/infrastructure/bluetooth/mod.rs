//! Bluetooth Module
//!
//! Provides the BLE link to the BootHeater dual-zone boot heater.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │   (event loop - publishes to BluetoothHandle consumers)  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ Connection │ │ Negotiator │ │  Protocol  │
//! │            │ │            │ │            │
//! │ - state    │ │ - frame    │ │ - UUIDs    │
//! │   machine  │ │   layout   │ │ - decode   │
//! │ - GATT     │ │   sniffing │ │ - encode   │
//! └─────┬──────┘ └────────────┘ └────────────┘
//!       │ RadioStack
//!       ▼
//! ┌────────────┐
//! │   Radio    │──── RadioRequest ───▶ WinRT worker
//! │            │◀─── RadioEvent ──────
//! └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Identifiers, telemetry decoding, and command encoding
//! - [`negotiator`] - Telemetry frame layout selection
//! - [`radio`] - Radio-stack boundary and the channel-backed implementation
//! - [`connection`] - Connection lifecycle state machine
//! - [`service`] - Event loop and consumer handle
//! - `winrt` - Windows Bluetooth LE backend (Windows only)

pub mod connection;
pub mod negotiator;
pub mod protocol;
pub mod radio;
pub mod service;
#[cfg(windows)]
pub mod winrt;

pub use service::{BluetoothHandle, BluetoothService};
