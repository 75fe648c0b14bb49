use anyhow::Result;
use boot_heater_link::domain::settings::{Settings, SettingsService};
use boot_heater_link::infrastructure::bluetooth::BluetoothHandle;
use boot_heater_link::infrastructure::logging::init_logger;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "boot-heater-link")]
#[command(about = "Headless BootHeater link monitor")]
struct Args {
    /// Send a tracking command (°F) on every connect. Without a value the
    /// configured default target is used.
    #[arg(long, value_name = "FAHRENHEIT", num_args = 0..=1)]
    target: Option<Option<f32>>,
}

impl Args {
    fn target(&self, settings: &Settings) -> Option<f32> {
        self.target
            .map(|t| t.unwrap_or(settings.default_target_temperature))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting BootHeater link monitor");
    match settings_service.load_error() {
        Some(e) => info!(
            "Using default settings ({}): {}",
            settings_service.path().display(),
            e
        ),
        None => info!("Settings loaded from {}", settings_service.path().display()),
    }

    let target = args.target(&settings);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(settings, target))
}

#[cfg(windows)]
async fn run(settings: Settings, target: Option<f32>) -> Result<()> {
    use boot_heater_link::infrastructure::bluetooth::radio::ChannelRadio;
    use boot_heater_link::infrastructure::bluetooth::winrt::{WinRtConfig, WinRtWorker};
    use boot_heater_link::infrastructure::bluetooth::BluetoothService;
    use tokio::sync::mpsc;

    let (radio, radio_requests) = ChannelRadio::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let worker = WinRtWorker::new(event_tx, WinRtConfig::from(&settings));
    // Scanning starts once the worker reports the radio powered on
    let (service, handle) = BluetoothService::new(radio, &settings);

    tokio::join!(
        worker.run(radio_requests),
        service.run(event_rx),
        monitor(handle, target),
    );
    Ok(())
}

#[cfg(not(windows))]
async fn run(_settings: Settings, _target: Option<f32>) -> Result<()> {
    anyhow::bail!("no radio backend available on this platform")
}

/// Log every state transition, telemetry update, and diagnostic.
#[cfg_attr(not(windows), allow(dead_code))]
async fn monitor(handle: BluetoothHandle, target: Option<f32>) {
    use boot_heater_link::domain::models::{ConnectionState, ControlCommand};
    use tokio::sync::broadcast::error::RecvError;

    let mut state_rx = handle.watch_state();
    let mut telemetry_rx = handle.watch_telemetry();
    let mut diagnostics = handle.diagnostics();

    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                info!("Connection state: {}", state);
                match (&state, target) {
                    (ConnectionState::Connected(_), Some(target)) => {
                        info!("Sending target temperature {:.1}°F", target);
                        handle.request_control_command(ControlCommand::tracking(target));
                    }
                    (ConnectionState::Failed(failure), _) if !failure.kind.is_recoverable() => {
                        info!("Waiting for the Bluetooth radio to come back");
                    }
                    _ => {}
                }
            }
            changed = telemetry_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(telemetry) = telemetry_rx.borrow_and_update().clone() {
                    info!("Telemetry: {:?}", telemetry);
                }
            }
            diagnostic = diagnostics.recv() => match diagnostic {
                Ok(diagnostic) => tracing::warn!("{}", diagnostic),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} diagnostics", skipped)
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(argv: &[&str]) -> Result<Option<f32>, clap::Error> {
        let argv = std::iter::once("boot-heater-link").chain(argv.iter().copied());
        let args = Args::try_parse_from(argv)?;
        Ok(args.target(&Settings::default()))
    }

    #[test]
    fn test_target_argument_forms() {
        assert_eq!(target(&[]).unwrap(), None);
        assert_eq!(target(&["--target", "95"]).unwrap(), Some(95.0));
        assert_eq!(target(&["--target=95"]).unwrap(), Some(95.0));
        assert_eq!(target(&["--target"]).unwrap(), Some(70.0));
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(target(&["--tagret", "95"]).is_err());
        assert!(target(&["--target", "warm"]).is_err());
    }
}
