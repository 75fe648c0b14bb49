//! Radio-stack boundary
//!
//! The connection machine issues requests through [`RadioStack`] and learns
//! their outcome later from [`RadioEvent`]s. A request returning `Ok` only
//! means it was handed to the backend.

use crate::domain::models::PeerId;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio backend is gone")]
    BackendClosed,
    #[error("{0}")]
    Rejected(String),
}

/// Adapter power/authorization state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioPower {
    PoweredOn,
    PoweredOff,
    Unsupported,
    Unauthorized,
    Resetting,
    Unknown,
}

impl RadioPower {
    pub fn description(&self) -> &'static str {
        match self {
            Self::PoweredOn => "Bluetooth is powered on",
            Self::PoweredOff => "Bluetooth is powered off",
            Self::Unsupported => "Bluetooth is not supported",
            Self::Unauthorized => "Bluetooth permission denied",
            Self::Resetting => "Bluetooth is resetting",
            Self::Unknown => "Bluetooth state unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub peer: PeerId,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub peer: PeerId,
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Everything the backend reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    StateChanged(RadioPower),
    /// The backend could not start scanning although the radio is up.
    ScanFailed(String),
    Discovered {
        peer: PeerId,
        name: Option<String>,
    },
    Connected(PeerId),
    ConnectFailed {
        peer: PeerId,
        reason: String,
    },
    Disconnected {
        peer: PeerId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peer: PeerId,
        result: Result<Vec<ServiceHandle>, String>,
    },
    CharacteristicsDiscovered {
        peer: PeerId,
        result: Result<Vec<CharacteristicHandle>, String>,
    },
    Subscribed {
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    },
    Notification {
        peer: PeerId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    WriteCompleted {
        characteristic: Uuid,
        result: Result<(), String>,
    },
}

pub trait RadioStack {
    fn start_scan(&mut self) -> Result<(), RadioError>;
    fn stop_scan(&mut self) -> Result<(), RadioError>;
    fn connect(&mut self, peer: PeerId) -> Result<(), RadioError>;
    fn disconnect(&mut self, peer: PeerId) -> Result<(), RadioError>;
    fn discover_services(&mut self, peer: PeerId, services: &[Uuid]) -> Result<(), RadioError>;
    fn discover_characteristics(
        &mut self,
        service: &ServiceHandle,
        characteristics: &[Uuid],
    ) -> Result<(), RadioError>;
    fn subscribe(&mut self, characteristic: &CharacteristicHandle) -> Result<(), RadioError>;
    fn write(&mut self, characteristic: &CharacteristicHandle, bytes: &[u8])
        -> Result<(), RadioError>;
}

/// Request queued to a backend worker.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioRequest {
    StartScan,
    StopScan,
    Connect(PeerId),
    Disconnect(PeerId),
    DiscoverServices {
        peer: PeerId,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        service: ServiceHandle,
        characteristics: Vec<Uuid>,
    },
    Subscribe(CharacteristicHandle),
    Write {
        characteristic: CharacteristicHandle,
        bytes: Vec<u8>,
    },
}

/// [`RadioStack`] that forwards every request to a backend task.
pub struct ChannelRadio {
    requests: mpsc::UnboundedSender<RadioRequest>,
}

impl ChannelRadio {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RadioRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { requests: tx }, rx)
    }

    fn send(&self, request: RadioRequest) -> Result<(), RadioError> {
        self.requests
            .send(request)
            .map_err(|_| RadioError::BackendClosed)
    }
}

impl RadioStack for ChannelRadio {
    fn start_scan(&mut self) -> Result<(), RadioError> {
        self.send(RadioRequest::StartScan)
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.send(RadioRequest::StopScan)
    }

    fn connect(&mut self, peer: PeerId) -> Result<(), RadioError> {
        self.send(RadioRequest::Connect(peer))
    }

    fn disconnect(&mut self, peer: PeerId) -> Result<(), RadioError> {
        self.send(RadioRequest::Disconnect(peer))
    }

    fn discover_services(&mut self, peer: PeerId, services: &[Uuid]) -> Result<(), RadioError> {
        self.send(RadioRequest::DiscoverServices {
            peer,
            services: services.to_vec(),
        })
    }

    fn discover_characteristics(
        &mut self,
        service: &ServiceHandle,
        characteristics: &[Uuid],
    ) -> Result<(), RadioError> {
        self.send(RadioRequest::DiscoverCharacteristics {
            service: service.clone(),
            characteristics: characteristics.to_vec(),
        })
    }

    fn subscribe(&mut self, characteristic: &CharacteristicHandle) -> Result<(), RadioError> {
        self.send(RadioRequest::Subscribe(characteristic.clone()))
    }

    fn write(
        &mut self,
        characteristic: &CharacteristicHandle,
        bytes: &[u8],
    ) -> Result<(), RadioError> {
        self.send(RadioRequest::Write {
            characteristic: characteristic.clone(),
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_radio_forwards() {
        let (mut radio, mut rx) = ChannelRadio::new();
        radio.start_scan().unwrap();
        radio.connect(PeerId(9)).unwrap();

        assert_eq!(rx.try_recv().unwrap(), RadioRequest::StartScan);
        assert_eq!(rx.try_recv().unwrap(), RadioRequest::Connect(PeerId(9)));
    }

    #[test]
    fn test_channel_radio_closed_backend() {
        let (mut radio, rx) = ChannelRadio::new();
        drop(rx);
        assert_eq!(radio.stop_scan(), Err(RadioError::BackendClosed));
    }
}
