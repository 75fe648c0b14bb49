//! WinRT Radio Backend
//!
//! Executes [`RadioRequest`]s one at a time against the Windows Bluetooth LE
//! APIs and reports every outcome as a [`RadioEvent`]. WinRT callbacks
//! (advertisements, value changes, link and radio state) only push events.

use crate::domain::models::PeerId;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::radio::{
    CharacteristicHandle, CharacteristicProperties, RadioEvent, RadioPower, RadioRequest,
    ServiceHandle,
};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use windows::core::{IInspectable, Ref, GUID};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothAdapter, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Devices::Radios::{Radio, RadioState};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct WinRtConfig {
    /// Keep the link up between GATT operations
    pub maintain_connection: bool,
    /// Maximum CCCD write attempts
    pub subscribe_max_retries: u32,
    /// Delay between CCCD attempts in milliseconds
    pub subscribe_retry_delay_ms: u64,
}

impl From<&Settings> for WinRtConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            maintain_connection: settings.maintain_connection,
            subscribe_max_retries: settings.subscribe_max_retries.max(1),
            subscribe_retry_delay_ms: settings.subscribe_retry_delay_ms,
        }
    }
}

/// GATT objects resolved for the current peer.
struct ConnectedDevice {
    peer: PeerId,
    device: BluetoothLEDevice,
    // Held so Windows keeps the link open
    _session: Option<GattSession>,
    services: HashMap<Uuid, GattDeviceService>,
    characteristics: HashMap<Uuid, GattCharacteristic>,
}

pub struct WinRtWorker {
    events: mpsc::UnboundedSender<RadioEvent>,
    config: WinRtConfig,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    // Held so the StateChanged subscription stays registered
    radio: Option<Radio>,
    device: Option<ConnectedDevice>,
}

impl WinRtWorker {
    pub fn new(events: mpsc::UnboundedSender<RadioEvent>, config: WinRtConfig) -> Self {
        Self {
            events,
            config,
            watcher: None,
            radio: None,
            device: None,
        }
    }

    /// Report the adapter state, then serve requests until the channel closes.
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<RadioRequest>) {
        match self.watch_radio().await {
            Ok(power) => self.emit(RadioEvent::StateChanged(power)),
            Err(e) => {
                error!("No usable Bluetooth adapter: {}", e);
                self.emit(RadioEvent::StateChanged(RadioPower::Unsupported));
            }
        }

        while let Some(request) = requests.recv().await {
            debug!("Radio request: {:?}", request);
            self.execute(request).await;
        }

        self.stop_scan();
        self.close_device();
        info!("WinRT radio backend stopped");
    }

    async fn execute(&mut self, request: RadioRequest) {
        match request {
            RadioRequest::StartScan => {
                if let Err(e) = self.start_scan() {
                    error!("Failed to start scan: {}", e);
                    self.emit(RadioEvent::ScanFailed(e.to_string()));
                }
            }
            RadioRequest::StopScan => self.stop_scan(),
            RadioRequest::Connect(peer) => {
                if let Err(e) = self.connect(peer).await {
                    self.emit(RadioEvent::ConnectFailed {
                        peer,
                        reason: e.to_string(),
                    });
                }
            }
            RadioRequest::Disconnect(peer) => {
                if self.device.as_ref().map(|d| d.peer) == Some(peer) {
                    self.close_device();
                }
            }
            RadioRequest::DiscoverServices { peer, services } => {
                let result = self
                    .discover_services(peer, &services)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::ServicesDiscovered { peer, result });
            }
            RadioRequest::DiscoverCharacteristics {
                service,
                characteristics,
            } => {
                let result = self
                    .discover_characteristics(&service, &characteristics)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::CharacteristicsDiscovered {
                    peer: service.peer,
                    result,
                });
            }
            RadioRequest::Subscribe(characteristic) => {
                let result = self
                    .subscribe(&characteristic)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::Subscribed {
                    characteristic,
                    result,
                });
            }
            RadioRequest::Write {
                characteristic,
                bytes,
            } => {
                let result = self
                    .write(&characteristic, &bytes)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::WriteCompleted {
                    characteristic: characteristic.uuid,
                    result,
                });
            }
        }
    }

    /// Look up the default adapter and follow its radio state.
    async fn watch_radio(&mut self) -> Result<RadioPower> {
        let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
        if !adapter.IsLowEnergySupported()? {
            return Ok(RadioPower::Unsupported);
        }

        let radio = adapter.GetRadioAsync()?.await?;
        let sender = self.events.clone();
        radio.StateChanged(&TypedEventHandler::new(
            move |radio: Ref<Radio>, _: Ref<IInspectable>| {
                if let Some(radio) = radio.as_ref() {
                    let power = map_radio_state(radio.State()?);
                    let _ = sender.send(RadioEvent::StateChanged(power));
                }
                Ok(())
            },
        ))?;

        let power = map_radio_state(radio.State()?);
        info!("Bluetooth radio state: {:?}", power);
        self.radio = Some(radio);
        Ok(power)
    }

    fn start_scan(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        info!("Starting BLE scan");
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: Ref<BluetoothLEAdvertisementWatcher>,
                  args: Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let peer = PeerId(args.BluetoothAddress()?);
                    let _ = sender.send(RadioEvent::Discovered {
                        peer,
                        name: (!name.is_empty()).then_some(name),
                    });
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            if let Err(e) = watcher.Stop() {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }

    async fn connect(&mut self, peer: PeerId) -> Result<()> {
        self.close_device();
        info!("Connecting to Bluetooth device: {}", peer);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(peer.0)?.await?;
        info!("Device connected: {:?}", device.Name()?);

        let session = if self.config.maintain_connection {
            match self.create_gatt_session(&device).await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Failed to create GattSession, continuing anyway: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let sender = self.events.clone();
        device.ConnectionStatusChanged(&TypedEventHandler::new(
            move |dev: Ref<BluetoothLEDevice>, _: Ref<IInspectable>| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = sender.send(RadioEvent::Disconnected {
                            peer,
                            reason: None,
                        });
                    }
                }
                Ok(())
            },
        ))?;

        self.device = Some(ConnectedDevice {
            peer,
            device,
            _session: session,
            services: HashMap::new(),
            characteristics: HashMap::new(),
        });
        self.emit(RadioEvent::Connected(peer));
        Ok(())
    }

    async fn create_gatt_session(&self, device: &BluetoothLEDevice) -> Result<GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    fn close_device(&mut self) {
        if let Some(connected) = self.device.take() {
            if let Err(e) = connected.device.Close() {
                debug!("Failed to close device: {}", e);
            }
            info!("Disconnected from device {}", connected.peer);
        }
    }

    fn device_for(&mut self, peer: PeerId) -> Result<&mut ConnectedDevice> {
        self.device
            .as_mut()
            .filter(|d| d.peer == peer)
            .ok_or_else(|| anyhow::anyhow!("Device {} is not connected", peer))
    }

    async fn discover_services(
        &mut self,
        peer: PeerId,
        uuids: &[Uuid],
    ) -> Result<Vec<ServiceHandle>> {
        let connected = self.device_for(peer)?;
        let mut handles = Vec::new();

        for uuid in uuids {
            let result = connected
                .device
                .GetGattServicesForUuidAsync(to_guid(uuid))?
                .await?;
            let status = result.Status()?;
            if status != GattCommunicationStatus::Success {
                anyhow::bail!("Failed to get GATT services: {:?}", status);
            }

            let services = result.Services()?;
            for i in 0..services.Size()? {
                let service = services.GetAt(i)?;
                let service_uuid = from_guid(&service.Uuid()?);
                connected.services.insert(service_uuid, service);
                handles.push(ServiceHandle {
                    peer,
                    uuid: service_uuid,
                });
            }
        }

        info!("Found {} matching services", handles.len());
        Ok(handles)
    }

    async fn discover_characteristics(
        &mut self,
        service: &ServiceHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>> {
        let connected = self.device_for(service.peer)?;
        let gatt_service = connected
            .services
            .get(&service.uuid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Service {} was not discovered", service.uuid))?;

        let result = gatt_service.GetCharacteristicsAsync()?.await?;
        let status = result.Status()?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Failed to get characteristics: {:?}", status);
        }

        let characteristics = result.Characteristics()?;
        info!("Found {} characteristics", characteristics.Size()?);

        let mut handles = Vec::new();
        for i in 0..characteristics.Size()? {
            let c = characteristics.GetAt(i)?;
            let uuid = from_guid(&c.Uuid()?);
            if !uuids.contains(&uuid) {
                continue;
            }

            let props = c.CharacteristicProperties()?;
            debug!("Characteristic {} properties: {:?}", uuid, props);
            handles.push(CharacteristicHandle {
                peer: service.peer,
                service: service.uuid,
                uuid,
                properties: map_properties(props),
            });
            connected.characteristics.insert(uuid, c);
        }

        Ok(handles)
    }

    /// Enable notifications with retry logic and forward every value change.
    async fn subscribe(&mut self, handle: &CharacteristicHandle) -> Result<()> {
        let max_attempts = self.config.subscribe_max_retries;
        let delay = tokio::time::Duration::from_millis(self.config.subscribe_retry_delay_ms);
        let characteristic = self.characteristic(handle)?;

        let sender = self.events.clone();
        let peer = handle.peer;
        let uuid = handle.uuid;
        characteristic.ValueChanged(&TypedEventHandler::new(
            move |_: Ref<GattCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    match read_buffer(&args.CharacteristicValue()?) {
                        Ok(value) => {
                            let _ = sender.send(RadioEvent::Notification {
                                peer,
                                characteristic: uuid,
                                value,
                            });
                        }
                        Err(e) => debug!("Unreadable notification: {}", e),
                    }
                }
                Ok(())
            },
        ))?;

        for attempt in 1..=max_attempts {
            info!(
                "Enabling notifications (attempt {}/{})...",
                attempt, max_attempts
            );
            let outcome = characteristic
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::Notify,
                )?
                .await;

            match outcome {
                Ok(GattCommunicationStatus::Success) => {
                    info!("Notifications enabled successfully");
                    return Ok(());
                }
                Ok(status) => warn!("Notification subscription returned status: {:?}", status),
                Err(e) => warn!("Notification subscription attempt {} failed: {}", attempt, e),
            }

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        anyhow::bail!(
            "Failed to enable notifications after {} attempts",
            max_attempts
        )
    }

    async fn write(&mut self, handle: &CharacteristicHandle, bytes: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(handle)?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(bytes)?;
        let buffer = writer.DetachBuffer()?;

        let status = characteristic.WriteValueAsync(&buffer)?.await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Write returned status: {:?}", status);
        }
        Ok(())
    }

    fn characteristic(&mut self, handle: &CharacteristicHandle) -> Result<GattCharacteristic> {
        self.device_for(handle.peer)?
            .characteristics
            .get(&handle.uuid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Characteristic {} was not discovered", handle.uuid))
    }

    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            debug!("Radio event dropped, service stopped");
        }
    }
}

fn read_buffer(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn map_radio_state(state: RadioState) -> RadioPower {
    match state {
        RadioState::On => RadioPower::PoweredOn,
        RadioState::Off | RadioState::Disabled => RadioPower::PoweredOff,
        _ => RadioPower::Unknown,
    }
}

fn map_properties(props: GattCharacteristicProperties) -> CharacteristicProperties {
    let has = |flag: GattCharacteristicProperties| props.0 & flag.0 != 0;
    CharacteristicProperties {
        write: has(GattCharacteristicProperties::Write),
        write_without_response: has(GattCharacteristicProperties::WriteWithoutResponse),
        notify: has(GattCharacteristicProperties::Notify),
    }
}

fn to_guid(uuid: &Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn from_guid(guid: &GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}
