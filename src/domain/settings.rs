use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize, // 0 keeps every file
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
            max_log_files: default_max_log_files(),
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
    "ble_connector".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_max_log_files() -> usize {
    7
}

/// Which BLE backend the shell drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Btleplug,
    Simulated,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Btleplug
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Channel Settings
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: String,

    #[serde(default)]
    pub transport: TransportKind,

    // Session Settings
    #[serde(default = "default_true")]
    pub enforce_permissions: bool,
    #[serde(default = "default_false")]
    pub show_unnamed_devices: bool,
    #[serde(default)]
    pub last_connected_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            transport: TransportKind::default(),
            enforce_permissions: default_true(),
            show_unnamed_devices: default_false(),
            last_connected_id: None,
        }
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_characteristic_uuid() -> String {
    protocol::CHARACTERISTIC_UUID.to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable. Later saves go to the same path.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleConnector");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
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

    /// Log settings with a relative `log_dir` placed next to the settings
    /// file, so logs land in the same place whatever the working directory.
    pub fn log_settings(&self) -> LogSettings {
        let mut log_settings = self.settings.log_settings.clone();
        let log_dir = Path::new(&log_settings.log_dir);
        if log_dir.is_relative() {
            if let Some(base) = self.settings_path.parent() {
                log_settings.log_dir = base.join(log_dir).to_string_lossy().into_owned();
            }
        }
        log_settings
    }

    pub fn remember_connection(&mut self, id: &str) -> anyhow::Result<()> {
        if self.settings.last_connected_id.as_deref() != Some(id) {
            self.settings.last_connected_id = Some(id.to_string());
            self.save()?;
        }
        Ok(())
    }
}
