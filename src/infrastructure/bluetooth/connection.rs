//! BLE Connection Module
//!
//! The connection state machine: scanning, connecting, GATT resolution and
//! subscription, plus routing of telemetry notifications and outbound
//! commands. Every input runs to completion and returns what it produced.

use crate::domain::models::{
    Command, ConnectionFailure, ConnectionState, Diagnostic, FailureKind, PeerId, Telemetry,
};
use crate::domain::settings::LayoutSelection;
use crate::infrastructure::bluetooth::negotiator;
use crate::infrastructure::bluetooth::protocol::{
    self, CONTROL_CHAR_UUID, DEVICE_NAME, SERVICE_UUID, TELEMETRY_CHAR_UUID,
};
use crate::infrastructure::bluetooth::radio::{
    CharacteristicHandle, RadioEvent, RadioPower, RadioStack, ServiceHandle,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Something the machine wants published.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOutput {
    Transition(ConnectionState),
    Telemetry(Telemetry),
    Diagnostic(Diagnostic),
}

pub struct ConnectionMachine<R: RadioStack> {
    radio: R,
    state: ConnectionState,
    radio_powered: bool,
    control_characteristic: Option<CharacteristicHandle>,
    layout: LayoutSelection,
    log_raw_data: bool,
    outputs: Vec<MachineOutput>,
}

impl<R: RadioStack> ConnectionMachine<R> {
    pub fn new(radio: R, layout: LayoutSelection) -> Self {
        Self {
            radio,
            state: ConnectionState::Disconnected,
            radio_powered: false,
            control_characteristic: None,
            layout,
            log_raw_data: false,
            outputs: Vec::new(),
        }
    }

    /// Trace every inbound telemetry buffer.
    pub fn with_raw_data_logging(mut self, enabled: bool) -> Self {
        self.log_raw_data = enabled;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Start looking for the heater. No-op while a session is in progress.
    pub fn request_scan(&mut self) -> Vec<MachineOutput> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed(_) => {
                if self.radio_powered {
                    self.begin_scan();
                } else if !self.radio_unavailable() {
                    self.transition(ConnectionState::Failed(ConnectionFailure::new(
                        FailureKind::RadioUnavailable,
                        "Bluetooth is not powered on",
                    )));
                }
            }
            _ => debug!("Scan request ignored while {}", self.state),
        }
        self.take_outputs()
    }

    /// Write a command if the link is fully set up, drop it otherwise.
    pub fn send_command(&mut self, command: &Command) -> Vec<MachineOutput> {
        match (&self.state, &self.control_characteristic) {
            (ConnectionState::Connected(_), Some(control)) => {
                let bytes = command.encode();
                trace!("Writing command {:02X?}", bytes);
                if let Err(e) = self.radio.write(control, &bytes) {
                    warn!("Failed to send command: {}", e);
                    self.outputs
                        .push(MachineOutput::Diagnostic(Diagnostic::CommandSendFailed {
                            reason: e.to_string(),
                        }));
                }
            }
            _ => {
                debug!("Command dropped while {}", self.state);
                self.outputs
                    .push(MachineOutput::Diagnostic(Diagnostic::CommandDropped {
                        state: self.state.clone(),
                    }));
            }
        }
        self.take_outputs()
    }

    pub fn handle_event(&mut self, event: RadioEvent) -> Vec<MachineOutput> {
        match event {
            RadioEvent::StateChanged(power) => self.on_power(power),
            RadioEvent::ScanFailed(reason) => {
                if self.state == ConnectionState::Scanning {
                    self.scan_failed(reason);
                } else {
                    let detail = format!("scan failure while {}", self.state);
                    self.ignore(detail);
                }
            }
            RadioEvent::Discovered { peer, name } => self.on_discovered(peer, name),
            RadioEvent::Connected(peer) => self.on_connected(peer),
            RadioEvent::ConnectFailed { peer, reason } => {
                if self.state == ConnectionState::Connecting(peer) {
                    self.fail(FailureKind::ConnectFailed, reason);
                } else {
                    self.ignore(format!("connect failure from {peer}"));
                }
            }
            RadioEvent::Disconnected { peer, reason } => self.on_disconnected(peer, reason),
            RadioEvent::ServicesDiscovered { peer, result } => {
                self.on_services_discovered(peer, result)
            }
            RadioEvent::CharacteristicsDiscovered { peer, result } => {
                self.on_characteristics_discovered(peer, result)
            }
            RadioEvent::Subscribed {
                characteristic,
                result,
            } => self.on_subscribed(characteristic, result),
            RadioEvent::Notification {
                peer,
                characteristic,
                value,
            } => self.on_notification(peer, characteristic, &value),
            RadioEvent::WriteCompleted {
                characteristic,
                result,
            } => match result {
                Ok(()) => trace!("Write to {} completed", characteristic),
                Err(reason) => {
                    warn!("Write to {} failed: {}", characteristic, reason);
                    self.outputs
                        .push(MachineOutput::Diagnostic(Diagnostic::CommandSendFailed {
                            reason,
                        }));
                }
            },
        }
        self.take_outputs()
    }

    fn on_power(&mut self, power: RadioPower) {
        if power == RadioPower::PoweredOn {
            info!("{}", power.description());
            self.radio_powered = true;
            if matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::Failed(_)
            ) {
                self.begin_scan();
            }
            return;
        }

        warn!("{}", power.description());
        self.radio_powered = false;
        self.control_characteristic = None;
        self.release_peer();
        self.transition(ConnectionState::Failed(ConnectionFailure::new(
            FailureKind::RadioUnavailable,
            power.description(),
        )));
    }

    fn on_discovered(&mut self, peer: PeerId, name: Option<String>) {
        if self.state != ConnectionState::Scanning {
            return;
        }
        if name.as_deref() != Some(DEVICE_NAME) {
            trace!("Skipping {} ({:?})", peer, name);
            return;
        }

        info!("Found {} at {}", DEVICE_NAME, peer);
        if let Err(e) = self.radio.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        match self.radio.connect(peer) {
            Ok(()) => self.transition(ConnectionState::Connecting(peer)),
            Err(e) => self.fail(FailureKind::ConnectFailed, e.to_string()),
        }
    }

    fn on_connected(&mut self, peer: PeerId) {
        if self.state != ConnectionState::Connecting(peer) {
            self.ignore(format!("connect from {peer}"));
            return;
        }

        self.transition(ConnectionState::DiscoveringServices(peer));
        if let Err(e) = self.radio.discover_services(peer, &[SERVICE_UUID]) {
            self.fail(FailureKind::DiscoveryFailed, e.to_string());
        }
    }

    fn on_disconnected(&mut self, peer: PeerId, reason: Option<String>) {
        if self.state.peer() != Some(peer) {
            self.ignore(format!("disconnect from {peer}"));
            return;
        }

        let reason = reason.unwrap_or_else(|| "remote disconnect".to_string());
        if self.state.is_connected() {
            info!("Link to {} lost: {}", peer, reason);
            self.control_characteristic = None;
            self.release_peer();
            self.transition(ConnectionState::Disconnected);
            if self.radio_powered {
                self.begin_scan();
            }
        } else {
            self.fail(FailureKind::LinkLost, reason);
        }
    }

    fn on_services_discovered(&mut self, peer: PeerId, result: Result<Vec<ServiceHandle>, String>) {
        if self.state != ConnectionState::DiscoveringServices(peer) {
            self.ignore(format!("services from {peer}"));
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => {
                self.fail(
                    FailureKind::DiscoveryFailed,
                    format!("Service discovery failed: {e}"),
                );
                return;
            }
        };

        let Some(service) = services.into_iter().find(|s| s.uuid == SERVICE_UUID) else {
            self.fail(FailureKind::DiscoveryFailed, "Heater service not found");
            return;
        };

        info!("Found heater service");
        self.transition(ConnectionState::DiscoveringCharacteristics(peer));
        if let Err(e) = self
            .radio
            .discover_characteristics(&service, &[CONTROL_CHAR_UUID, TELEMETRY_CHAR_UUID])
        {
            self.fail(FailureKind::DiscoveryFailed, e.to_string());
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        peer: PeerId,
        result: Result<Vec<CharacteristicHandle>, String>,
    ) {
        if self.state != ConnectionState::DiscoveringCharacteristics(peer) {
            self.ignore(format!("characteristics from {peer}"));
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                self.fail(
                    FailureKind::DiscoveryFailed,
                    format!("Characteristic discovery failed: {e}"),
                );
                return;
            }
        };

        match resolve_characteristics(characteristics) {
            Ok((control, telemetry)) => {
                if let Err(e) = self.radio.subscribe(&telemetry) {
                    self.fail(
                        FailureKind::DiscoveryFailed,
                        format!("Notification subscription failed: {e}"),
                    );
                    return;
                }
                info!("Found control and telemetry characteristics");
                self.control_characteristic = Some(control);
                self.transition(ConnectionState::Connected(peer));
            }
            Err(detail) => self.fail(FailureKind::DiscoveryFailed, detail),
        }
    }

    fn on_subscribed(&mut self, characteristic: CharacteristicHandle, result: Result<(), String>) {
        let current = self.state == ConnectionState::Connected(characteristic.peer)
            && characteristic.uuid == TELEMETRY_CHAR_UUID;
        match result {
            Ok(()) => debug!("Notifications enabled on {}", characteristic.uuid),
            Err(e) if current => self.fail(
                FailureKind::DiscoveryFailed,
                format!("Notification subscription failed: {e}"),
            ),
            Err(e) => self.ignore(format!("subscription failure {e}")),
        }
    }

    fn on_notification(&mut self, peer: PeerId, characteristic: Uuid, value: &[u8]) {
        if self.state != ConnectionState::Connected(peer) || characteristic != TELEMETRY_CHAR_UUID
        {
            let detail = format!(
                "{}-byte notification on {} while {}",
                value.len(),
                characteristic,
                self.state
            );
            self.ignore(detail);
            return;
        }

        if self.log_raw_data {
            trace!("Raw packet: {:02X?}", value);
        }

        let decoded = negotiator::select(value.len(), self.layout)
            .and_then(|layout| protocol::decode(value, layout));
        match decoded {
            Ok(telemetry) => self.outputs.push(MachineOutput::Telemetry(telemetry)),
            Err(e) => {
                warn!("Dropping telemetry frame: {}", e);
                self.outputs
                    .push(MachineOutput::Diagnostic(Diagnostic::DecodeFailed {
                        len: value.len(),
                        reason: e.to_string(),
                    }));
            }
        }
    }

    fn radio_unavailable(&self) -> bool {
        matches!(
            &self.state,
            ConnectionState::Failed(f) if f.kind == FailureKind::RadioUnavailable
        )
    }

    fn begin_scan(&mut self) {
        match self.radio.start_scan() {
            Ok(()) => {
                info!("Scanning for {}...", DEVICE_NAME);
                self.transition(ConnectionState::Scanning);
            }
            Err(e) => self.scan_failed(e.to_string()),
        }
    }

    /// Park in `Failed` with the radio still usable; the next
    /// `request_scan` or power-on retries.
    fn scan_failed(&mut self, reason: String) {
        warn!("Failed to start scan: {}", reason);
        self.transition(ConnectionState::Failed(ConnectionFailure::new(
            FailureKind::DiscoveryFailed,
            format!("Failed to start scan: {reason}"),
        )));
    }

    /// Tell the backend to drop whatever peer the current state is bound to.
    fn release_peer(&mut self) {
        if let Some(peer) = self.state.peer() {
            if let Err(e) = self.radio.disconnect(peer) {
                debug!("Failed to drop {}: {}", peer, e);
            }
        }
    }

    /// Enter `Failed` and, when recoverable, go straight back to scanning.
    fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) {
        let failure = ConnectionFailure::new(kind, detail);
        warn!("Connection failed: {}", failure);

        self.release_peer();
        self.control_characteristic = None;
        self.transition(ConnectionState::Failed(failure));
        if kind.is_recoverable() && self.radio_powered {
            self.begin_scan();
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        info!("Connection state: {} -> {}", self.state, next);
        self.state = next.clone();
        self.outputs.push(MachineOutput::Transition(next));
    }

    fn ignore(&mut self, detail: String) {
        debug!("Ignoring {}", detail);
        self.outputs
            .push(MachineOutput::Diagnostic(Diagnostic::IgnoredEvent { detail }));
    }

    fn take_outputs(&mut self) -> Vec<MachineOutput> {
        std::mem::take(&mut self.outputs)
    }
}

/// Pick the control and telemetry characteristics and check their capabilities.
fn resolve_characteristics(
    characteristics: Vec<CharacteristicHandle>,
) -> Result<(CharacteristicHandle, CharacteristicHandle), String> {
    let mut control = None;
    let mut telemetry = None;

    for c in characteristics {
        if c.uuid == CONTROL_CHAR_UUID {
            control = Some(c);
        } else if c.uuid == TELEMETRY_CHAR_UUID {
            telemetry = Some(c);
        }
    }

    let control = control.ok_or("Control characteristic not found")?;
    let telemetry = telemetry.ok_or("Telemetry characteristic not found")?;

    if !control.properties.can_write() {
        return Err("Control characteristic is not writable".to_string());
    }
    if !telemetry.properties.notify {
        return Err("Telemetry characteristic does not notify".to_string());
    }

    Ok((control, telemetry))
}
