use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
    "accel_stream".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub known_device_ids: Vec<String>,
    #[serde(default)]
    pub last_connected_id: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Scan Settings
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default)]
    pub scan_service_filter: Option<String>,

    // Connection Settings
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: Vec<u64>,
    #[serde(default = "default_connect_settle_ms")]
    pub connect_settle_ms: u64,
    #[serde(default = "default_resume_settle_ms")]
    pub resume_settle_ms: u64,
    #[serde(default = "default_preferred_mtu")]
    pub preferred_mtu: u16,

    // Probing Settings
    #[serde(default = "default_trial_timeout_ms")]
    pub trial_timeout_ms: u64,
    #[serde(default = "default_arming_opcodes")]
    pub arming_opcodes: Vec<u8>,
    #[serde(default = "default_arming_gap_ms")]
    pub arming_gap_ms: u64,

    // Session Settings
    #[serde(default = "default_display_throttle_ms")]
    pub display_throttle_ms: u64,
    #[serde(default = "default_simulated_rate_hz")]
    pub simulated_rate_hz: u32,
    #[serde(default = "default_export_dir")]
    pub export_dir: String,

    // Debug Settings
    #[serde(default = "default_false")]
    pub debug_raw_data_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            known_device_ids: Vec::new(),
            last_connected_id: None,
            log_settings: LogSettings::default(),

            scan_window_ms: default_scan_window_ms(),
            scan_service_filter: None,

            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            connect_settle_ms: default_connect_settle_ms(),
            resume_settle_ms: default_resume_settle_ms(),
            preferred_mtu: default_preferred_mtu(),

            trial_timeout_ms: default_trial_timeout_ms(),
            arming_opcodes: default_arming_opcodes(),
            arming_gap_ms: default_arming_gap_ms(),

            display_throttle_ms: default_display_throttle_ms(),
            simulated_rate_hz: default_simulated_rate_hz(),
            export_dir: default_export_dir(),

            debug_raw_data_logging: false,
        }
    }
}

fn default_scan_window_ms() -> u64 {
    10_000
}
fn default_reconnect_backoff_ms() -> Vec<u64> {
    vec![500, 1000, 2000, 4000, 8000]
}
fn default_connect_settle_ms() -> u64 {
    300
}
fn default_resume_settle_ms() -> u64 {
    500
}
fn default_preferred_mtu() -> u16 {
    247
}
fn default_trial_timeout_ms() -> u64 {
    8000
}
fn default_arming_opcodes() -> Vec<u8> {
    vec![0x01, 0x02, 0xFF, 0x00]
}
fn default_arming_gap_ms() -> u64 {
    250
}
fn default_display_throttle_ms() -> u64 {
    33
}
fn default_simulated_rate_hz() -> u32 {
    50
}
fn default_export_dir() -> String {
    "recordings".to_string()
}

/// Timings and policies the BLE engine runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub scan_window: Duration,
    pub scan_service_filter: Option<String>,
    pub reconnect_backoff: Vec<Duration>,
    pub connect_settle: Duration,
    pub resume_settle: Duration,
    pub preferred_mtu: u16,
    pub trial_timeout: Duration,
    pub arming_opcodes: Vec<u8>,
    pub arming_gap: Duration,
    pub display_throttle: Duration,
    pub simulated_rate_hz: u32,
    pub log_raw_payloads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for EngineConfig {
    fn from(s: &Settings) -> Self {
        Self {
            scan_window: Duration::from_millis(s.scan_window_ms),
            scan_service_filter: s
                .scan_service_filter
                .clone()
                .filter(|filter| !filter.trim().is_empty()),
            reconnect_backoff: s
                .reconnect_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            connect_settle: Duration::from_millis(s.connect_settle_ms),
            resume_settle: Duration::from_millis(s.resume_settle_ms),
            preferred_mtu: s.preferred_mtu,
            trial_timeout: Duration::from_millis(s.trial_timeout_ms),
            arming_opcodes: s.arming_opcodes.clone(),
            arming_gap: Duration::from_millis(s.arming_gap_ms),
            display_throttle: Duration::from_millis(s.display_throttle_ms),
            simulated_rate_hz: s.simulated_rate_hz.max(1),
            log_raw_payloads: s.debug_raw_data_logging,
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::at_path(settings_path))
    }

    /// Load from `settings_path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn at_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({})", e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("AccelStream");
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

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from(&self.settings)
    }

    /// Resolve the export directory; relative paths live under the
    /// user's document directory when one exists.
    pub fn export_dir(&self) -> PathBuf {
        let dir = PathBuf::from(&self.settings.export_dir);
        if dir.is_absolute() {
            return dir;
        }
        match dirs::document_dir() {
            Some(mut docs) => {
                docs.push("AccelStream");
                docs.push(dir);
                docs
            }
            None => dir,
        }
    }

    pub fn remember_device(&mut self, id: &str) -> anyhow::Result<()> {
        self.settings.last_connected_id = Some(id.to_string());
        if !self.settings.known_device_ids.iter().any(|known| known == id) {
            self.settings.known_device_ids.push(id.to_string());
        }
        self.save()
    }
}
