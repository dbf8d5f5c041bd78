//! Monitor configuration management

use anyhow::{Context, Result, anyhow};
use inventory::{
    AdmissionFilter, DEFAULT_CAPACITY, DEFAULT_DEFERRED_QUEUE, EngineConfig, OverflowPolicy,
    parse_vid_pid,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Log levels accepted in `[monitor] log_level`
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub inventory: InventorySettings,
    #[serde(default)]
    pub admission: AdmissionSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "MonitorSettings::default_log_level")]
    pub log_level: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl MonitorSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Inventory sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySettings {
    /// Maximum number of records kept
    #[serde(default = "InventorySettings::default_capacity")]
    pub capacity: usize,
    /// "reject-newest" or "evict-oldest-disconnected"
    #[serde(default = "InventorySettings::default_overflow_policy")]
    pub overflow_policy: String,
    /// Events that may wait for a busy store lock
    #[serde(default = "InventorySettings::default_deferred_queue")]
    pub deferred_queue: usize,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            overflow_policy: Self::default_overflow_policy(),
            deferred_queue: Self::default_deferred_queue(),
        }
    }
}

impl InventorySettings {
    fn default_capacity() -> usize {
        DEFAULT_CAPACITY
    }

    fn default_overflow_policy() -> String {
        OverflowPolicy::default().as_str().to_string()
    }

    fn default_deferred_queue() -> usize {
        DEFAULT_DEFERRED_QUEUE
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionMode {
    #[default]
    AllowAll,
    Whitelist,
}

/// Admission policy
///
/// # Example Configuration
/// ```toml
/// [admission]
/// mode = "whitelist"
/// whitelist = ["0xffff:0x5678", "0x04f9:0x0042"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionSettings {
    #[serde(default)]
    pub mode: AdmissionMode,
    /// VID:PID pairs, only consulted in whitelist mode
    #[serde(default)]
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    /// Unix socket the report is served on; `~` is expanded
    #[serde(default = "ReportSettings::default_socket_path")]
    pub socket_path: PathBuf,
    /// Append event counters to every report
    #[serde(default = "ReportSettings::default_include_stats")]
    pub include_stats: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            socket_path: Self::default_socket_path(),
            include_stats: Self::default_include_stats(),
        }
    }
}

impl ReportSettings {
    fn default_socket_path() -> PathBuf {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            runtime_dir.join("usb-monitor.sock")
        } else {
            PathBuf::from("/tmp/usb-monitor.sock")
        }
    }

    fn default_include_stats() -> bool {
        true
    }
}

impl MonitorConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand_path(&p),
            None => Self::find_config_file()
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from the standard locations
    ///
    /// Defaults are used only when no configuration file exists. A file that
    /// exists but cannot be read, parsed or validated is an error.
    pub fn load_or_default() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load(Some(path)),
            None => Ok(Self::default()),
        }
    }

    /// Standard configuration locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/usb-monitor/monitor.toml"),
        ]
    }

    /// First standard location holding a file
    pub fn find_config_file() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-monitor").join("monitor.toml")
        } else {
            PathBuf::from(".config/usb-monitor/monitor.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.monitor.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.monitor.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.inventory.capacity == 0 {
            return Err(anyhow!("Inventory capacity must be greater than 0"));
        }

        if self.inventory.deferred_queue == 0 {
            return Err(anyhow!("Deferred queue size must be greater than 0"));
        }

        self.overflow_policy()?;

        for filter in &self.admission.whitelist {
            Self::validate_filter(filter)?;
        }

        if self.admission.mode == AdmissionMode::Whitelist && self.admission.whitelist.is_empty() {
            return Err(anyhow!(
                "Admission mode 'whitelist' requires at least one VID:PID entry"
            ));
        }

        Ok(())
    }

    /// Validate a whitelist entry (`0xVID:0xPID`)
    pub fn validate_filter(filter: &str) -> Result<()> {
        parse_vid_pid(filter)
            .map(|_| ())
            .map_err(|e| anyhow!("Invalid whitelist entry: {}", e))
    }

    pub fn overflow_policy(&self) -> Result<OverflowPolicy> {
        self.inventory
            .overflow_policy
            .parse()
            .map_err(|e| anyhow!("Invalid overflow policy: {}", e))
    }

    pub fn admission_filter(&self) -> Result<AdmissionFilter> {
        match self.admission.mode {
            AdmissionMode::AllowAll => Ok(AdmissionFilter::AllowAll),
            AdmissionMode::Whitelist => AdmissionFilter::from_patterns(&self.admission.whitelist)
                .map_err(|e| anyhow!("Invalid admission whitelist: {}", e)),
        }
    }

    /// Engine parameters described by this configuration
    pub fn engine_config(&self) -> Result<EngineConfig> {
        self.validate()?;

        Ok(EngineConfig {
            capacity: self.inventory.capacity,
            overflow_policy: self.overflow_policy()?,
            deferred_queue: self.inventory.deferred_queue,
            filter: self.admission_filter()?,
        })
    }

    /// Report socket path with `~` expanded
    pub fn socket_path(&self) -> PathBuf {
        expand_path(&self.report.socket_path)
    }
}

/// Expand a leading `~` in a path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
