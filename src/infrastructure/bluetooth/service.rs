//! Bluetooth Service Module
//!
//! Owns the connection machine and the telemetry sink, and runs the single
//! event loop that feeds them radio events and consumer requests.

use crate::domain::models::{Command, ConnectionState, ControlCommand, Diagnostic, Telemetry};
use crate::domain::settings::{CommandProtocol, Settings};
use crate::domain::telemetry::{TelemetrySink, TelemetryView};
use crate::infrastructure::bluetooth::connection::{ConnectionMachine, MachineOutput};
use crate::infrastructure::bluetooth::radio::{RadioEvent, RadioStack};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

/// Requests from the presentation side.
#[derive(Debug, Clone, PartialEq)]
pub enum BluetoothRequest {
    StartScan,
    Command(Command),
}

/// Presentation-side handle: fire-and-forget requests plus read access to
/// the latest published values.
#[derive(Clone)]
pub struct BluetoothHandle {
    requests: mpsc::UnboundedSender<BluetoothRequest>,
    view: TelemetryView,
    command_protocol: CommandProtocol,
}

impl BluetoothHandle {
    pub fn request_scan(&self) {
        self.send(BluetoothRequest::StartScan);
    }

    /// Send targets and force levels. Under the legacy protocol only the
    /// right-zone target goes out, as a power percentage.
    pub fn request_control_command(&self, command: ControlCommand) {
        let command = match self.command_protocol {
            CommandProtocol::DualZone => Command::Control(command),
            CommandProtocol::LegacyPower => Command::PowerPercent(command.target_temperature_right),
        };
        self.send(BluetoothRequest::Command(command));
    }

    /// Legacy single-zone heater power, 0-100.
    pub fn request_power_percent(&self, power: f32) {
        self.send(BluetoothRequest::Command(Command::PowerPercent(power)));
    }

    pub fn state(&self) -> ConnectionState {
        self.view.state()
    }

    pub fn latest_telemetry(&self) -> Option<Telemetry> {
        self.view.latest()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.view.watch_state()
    }

    pub fn watch_telemetry(&self) -> watch::Receiver<Option<Telemetry>> {
        self.view.watch_telemetry()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.view.diagnostics()
    }

    pub fn view(&self) -> &TelemetryView {
        &self.view
    }

    fn send(&self, request: BluetoothRequest) {
        if self.requests.send(request).is_err() {
            debug!("Bluetooth service stopped, request dropped");
        }
    }
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<R: RadioStack> {
    machine: ConnectionMachine<R>,
    sink: TelemetrySink,
    requests: mpsc::UnboundedReceiver<BluetoothRequest>,
}

impl<R: RadioStack> BluetoothService<R> {
    pub fn new(radio: R, settings: &Settings) -> (Self, BluetoothHandle) {
        let (sink, view) = TelemetrySink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = ConnectionMachine::new(radio, settings.layout)
            .with_raw_data_logging(settings.debug_raw_data_logging);

        let handle = BluetoothHandle {
            requests: tx,
            view,
            command_protocol: settings.command_protocol,
        };

        (
            Self {
                machine,
                sink,
                requests: rx,
            },
            handle,
        )
    }

    /// Process radio events and requests one at a time until both sources close.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<RadioEvent>) {
        info!("Bluetooth service started");
        let mut events_open = true;
        let mut requests_open = true;

        while events_open || requests_open {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("Radio event channel closed");
                        events_open = false;
                    }
                },
                request = self.requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("Request channel closed");
                        requests_open = false;
                    }
                },
            }
        }

        info!("Bluetooth service stopped");
    }

    pub fn handle_event(&mut self, event: RadioEvent) {
        let outputs = self.machine.handle_event(event);
        self.publish(outputs);
    }

    pub fn handle_request(&mut self, request: BluetoothRequest) {
        let outputs = match request {
            BluetoothRequest::StartScan => self.machine.request_scan(),
            BluetoothRequest::Command(command) => self.machine.send_command(&command),
        };
        self.publish(outputs);
    }

    fn publish(&self, outputs: Vec<MachineOutput>) {
        for output in outputs {
            match output {
                MachineOutput::Transition(state) => self.sink.publish_state(state),
                MachineOutput::Telemetry(telemetry) => self.sink.publish_telemetry(telemetry),
                MachineOutput::Diagnostic(diagnostic) => self.sink.report(diagnostic),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ForcePowerLevel, PeerId};
    use crate::infrastructure::bluetooth::connection::tests::{
        control_char, heater_service, telemetry_char,
    };
    use crate::infrastructure::bluetooth::protocol::tests::dual_zone_frame;
    use crate::infrastructure::bluetooth::protocol::{DEVICE_NAME, TELEMETRY_CHAR_UUID};
    use crate::infrastructure::bluetooth::radio::{ChannelRadio, RadioPower, RadioRequest};

    const PEER: PeerId = PeerId(0xB007);

    fn connect_events() -> Vec<RadioEvent> {
        vec![
            RadioEvent::StateChanged(RadioPower::PoweredOn),
            RadioEvent::Discovered {
                peer: PEER,
                name: Some(DEVICE_NAME.to_string()),
            },
            RadioEvent::Connected(PEER),
            RadioEvent::ServicesDiscovered {
                peer: PEER,
                result: Ok(vec![heater_service(PEER)]),
            },
            RadioEvent::CharacteristicsDiscovered {
                peer: PEER,
                result: Ok(vec![control_char(PEER), telemetry_char(PEER)]),
            },
        ]
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RadioRequest>) -> Vec<RadioRequest> {
        let mut out = Vec::new();
        while let Ok(r) = rx.try_recv() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_publishes_state_and_telemetry() {
        let (radio, _radio_rx) = ChannelRadio::new();
        let (mut service, handle) = BluetoothService::new(radio, &Settings::default());

        for event in connect_events() {
            service.handle_event(event);
        }
        assert_eq!(handle.state(), ConnectionState::Connected(PEER));
        assert_eq!(handle.latest_telemetry(), None);

        service.handle_event(RadioEvent::Notification {
            peer: PEER,
            characteristic: TELEMETRY_CHAR_UUID,
            value: dual_zone_frame(),
        });
        let first = handle.latest_telemetry().unwrap();
        assert_eq!(first.frame().unwrap().right.measured_temperature, 31.5);

        // A malformed frame leaves the last good one in place
        let mut diagnostics = handle.diagnostics();
        service.handle_event(RadioEvent::Notification {
            peer: PEER,
            characteristic: TELEMETRY_CHAR_UUID,
            value: vec![0xAA],
        });
        assert_eq!(handle.latest_telemetry(), Some(first));
        assert_eq!(handle.view().decode_failures(), 1);
        assert!(matches!(
            diagnostics.try_recv(),
            Ok(Diagnostic::DecodeFailed { len: 1, .. })
        ));
        assert_eq!(handle.state(), ConnectionState::Connected(PEER));
    }

    #[test]
    fn test_commands_reach_radio_only_when_connected() {
        let (radio, mut radio_rx) = ChannelRadio::new();
        let (mut service, handle) = BluetoothService::new(radio, &Settings::default());
        let command = ControlCommand {
            target_temperature_right: 150.0,
            target_temperature_left: -5.0,
            force_power_level_right: ForcePowerLevel::Off,
            force_power_level_left: ForcePowerLevel::TrackTemperature,
        };

        service.handle_request(BluetoothRequest::Command(Command::Control(command)));
        assert!(drain(&mut radio_rx).is_empty());

        for event in connect_events() {
            service.handle_event(event);
        }
        drain(&mut radio_rx);

        service.handle_request(BluetoothRequest::Command(Command::Control(command)));
        assert_eq!(
            drain(&mut radio_rx),
            vec![RadioRequest::Write {
                characteristic: control_char(PEER),
                bytes: vec![100, 0, 0, 5],
            }]
        );
        drop(handle);
    }

    #[test]
    fn test_legacy_protocol_handle() {
        let (radio, _radio_rx) = ChannelRadio::new();
        let settings = Settings {
            command_protocol: CommandProtocol::LegacyPower,
            ..Settings::default()
        };
        let (mut service, handle) = BluetoothService::new(radio, &settings);

        handle.request_control_command(ControlCommand::tracking(120.0));
        let request = service.requests.try_recv().unwrap();
        assert_eq!(
            request,
            BluetoothRequest::Command(Command::PowerPercent(120.0))
        );
    }

    #[test]
    fn test_power_percent_request_is_clamped_on_the_wire() {
        let (radio, mut radio_rx) = ChannelRadio::new();
        let (mut service, handle) = BluetoothService::new(radio, &Settings::default());
        for event in connect_events() {
            service.handle_event(event);
        }
        drain(&mut radio_rx);

        handle.request_power_percent(250.0);
        handle.request_power_percent(37.9);
        while let Ok(request) = service.requests.try_recv() {
            service.handle_request(request);
        }

        let writes: Vec<Vec<u8>> = drain(&mut radio_rx)
            .into_iter()
            .filter_map(|r| match r {
                RadioRequest::Write { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![vec![100], vec![37]]);
    }

    #[tokio::test]
    async fn test_run_loop_end_to_end() {
        let (radio, mut radio_rx) = ChannelRadio::new();
        let (service, handle) = BluetoothService::new(radio, &Settings::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut state_rx = handle.watch_state();
        let task = tokio::spawn(service.run(event_rx));

        for event in connect_events() {
            event_tx.send(event).unwrap();
        }
        state_rx
            .wait_for(|s| *s == ConnectionState::Connected(PEER))
            .await
            .unwrap();

        handle.request_control_command(ControlCommand::tracking(72.0));
        let mut writes = Vec::new();
        while writes.is_empty() {
            match radio_rx.recv().await.unwrap() {
                RadioRequest::Write { bytes, .. } => writes.push(bytes),
                _ => continue,
            }
        }
        assert_eq!(writes[0], vec![72, 72, 5, 5]);

        event_tx
            .send(RadioEvent::Disconnected {
                peer: PEER,
                reason: None,
            })
            .unwrap();
        state_rx
            .wait_for(|s| *s == ConnectionState::Scanning)
            .await
            .unwrap();

        drop(event_tx);
        drop(handle);
        task.await.unwrap();
    }

    #[test]
    fn test_repeated_scan_requests() {
        let (radio, mut radio_rx) = ChannelRadio::new();
        let (mut service, handle) = BluetoothService::new(radio, &Settings::default());
        service.handle_event(RadioEvent::StateChanged(RadioPower::PoweredOn));

        handle.request_scan();
        handle.request_scan();
        while let Ok(request) = service.requests.try_recv() {
            service.handle_request(request);
        }

        let scans = drain(&mut radio_rx)
            .into_iter()
            .filter(|r| *r == RadioRequest::StartScan)
            .count();
        assert_eq!(scans, 1);
        assert_eq!(handle.state(), ConnectionState::Scanning);
    }
}
