use crate::domain::models::FrameLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// How inbound telemetry buffers are mapped onto a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "revision")]
pub enum LayoutSelection {
    /// Guess from buffer length.
    #[default]
    Auto,
    Fixed(FrameLayout),
}

/// Which command format the device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandProtocol {
    /// Single power-percent byte.
    LegacyPower,
    /// Four-byte target + force-level packet.
    #[default]
    DualZone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Protocol Settings
    #[serde(default)]
    pub layout: LayoutSelection,
    #[serde(default)]
    pub command_protocol: CommandProtocol,
    /// Target temperature offered to the user before any change (°F)
    #[serde(default = "default_target_temperature")]
    pub default_target_temperature: f32,

    // Advanced BLE Settings
    #[serde(default = "default_true")]
    pub maintain_connection: bool,
    #[serde(default = "default_subscribe_max_retries")]
    pub subscribe_max_retries: u32,
    #[serde(default = "default_subscribe_retry_delay_ms")]
    pub subscribe_retry_delay_ms: u64,

    // Debug Settings
    #[serde(default = "default_false")]
    pub debug_raw_data_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            layout: LayoutSelection::default(),
            command_protocol: CommandProtocol::default(),
            default_target_temperature: default_target_temperature(),
            maintain_connection: default_true(),
            subscribe_max_retries: default_subscribe_max_retries(),
            subscribe_retry_delay_ms: default_subscribe_retry_delay_ms(),
            debug_raw_data_logging: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "boot_heater_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_target_temperature() -> f32 {
    70.0
}
fn default_subscribe_max_retries() -> u32 {
    3
}
fn default_subscribe_retry_delay_ms() -> u64 {
    500
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
    load_error: Option<anyhow::Error>,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit path, falling back to defaults. The reason for
    /// a fallback is kept in [`Self::load_error`] until logging is up.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let (settings, load_error) = match Self::load_from_file(&settings_path) {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e)),
        };

        Self {
            settings,
            settings_path,
            load_error,
        }
    }

    pub fn load_error(&self) -> Option<&anyhow::Error> {
        self.load_error.as_ref()
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BootHeaterLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.layout, LayoutSelection::Auto);
        assert_eq!(settings.command_protocol, CommandProtocol::DualZone);
        assert_eq!(settings.default_target_temperature, 70.0);
        assert_eq!(settings.subscribe_max_retries, 3);
        assert_eq!(settings.log_settings.level, "info");
        assert!(!settings.debug_raw_data_logging);
    }

    #[test]
    fn test_fixed_layout_json() {
        let json = r#"{"layout":{"mode":"fixed","revision":"dual_zone_packed"}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(
            settings.layout,
            LayoutSelection::Fixed(FrameLayout::DualZonePacked)
        );
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "boot_heater_link_settings_{}.json",
            std::process::id()
        ));
        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().command_protocol = CommandProtocol::LegacyPower;
        service.get_mut().layout = LayoutSelection::Fixed(FrameLayout::SingleZonePid);
        service.save().unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert!(reloaded.load_error().is_none());
        assert_eq!(reloaded.get().command_protocol, CommandProtocol::LegacyPower);
        assert_eq!(
            reloaded.get().layout,
            LayoutSelection::Fixed(FrameLayout::SingleZonePid)
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let path = std::env::temp_dir().join(format!(
            "boot_heater_link_corrupt_{}.json",
            std::process::id()
        ));
        fs::write(&path, "{ not json").unwrap();
        let service = SettingsService::with_path(path.clone());
        assert_eq!(service.get().layout, LayoutSelection::Auto);
        assert!(service.load_error().is_some());
        let _ = fs::remove_file(path);
    }
}
