//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/kiosk.toml
//!
//! Secrets and per-kiosk values can be overridden from the environment
//! (`CHECKIN_BREEZE_API_KEY`, `CHECKIN_BREEZE_SUBDOMAIN`, `CHECKIN_PRINTER_NAME`).

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const ENV_API_KEY: &str = "CHECKIN_BREEZE_API_KEY";
pub const ENV_SUBDOMAIN: &str = "CHECKIN_BREEZE_SUBDOMAIN";
pub const ENV_PRINTER_NAME: &str = "CHECKIN_PRINTER_NAME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterMode {
    /// Submit jobs to CUPS via `lp`
    Cups,
    /// Only log labels (kiosks without a printer attached)
    Log,
}

impl PrinterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterMode::Cups => "cups",
            PrinterMode::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Kiosk identifier used as the metrics label
    #[serde(default = "default_kiosk_id")]
    pub kiosk_id: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interval for logging the metrics summary (0 to disable)
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_kiosk_id() -> String {
    "kiosk".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_metrics_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kiosk_id: default_kiosk_id(),
            bind_address: default_bind_address(),
            port: default_port(),
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreezeConfig {
    #[serde(default = "default_subdomain")]
    pub subdomain: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_breeze_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_subdomain() -> String {
    "connectionpointchurch".to_string()
}

fn default_breeze_timeout_ms() -> u64 {
    30_000
}

impl Default for BreezeConfig {
    fn default() -> Self {
        Self {
            subdomain: default_subdomain(),
            api_key: String::new(),
            timeout_ms: default_breeze_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrinterConfig {
    #[serde(default = "default_printer_mode")]
    pub mode: PrinterMode,
    #[serde(default = "default_printer_name")]
    pub name: String,
    /// CUPS media name for the 30256 shipping label
    #[serde(default = "default_page_size")]
    pub page_size: String,
    #[serde(default = "default_print_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_printer_mode() -> PrinterMode {
    PrinterMode::Cups
}

fn default_printer_name() -> String {
    "DYMO_LabelWriter_550".to_string()
}

fn default_page_size() -> String {
    "w167h288".to_string()
}

fn default_print_timeout_ms() -> u64 {
    30_000
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            mode: default_printer_mode(),
            name: default_printer_name(),
            page_size: default_page_size(),
            timeout_ms: default_print_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinConfig {
    /// Breeze allows roughly 20 requests/min; leave headroom
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Extra text of each aggregate label appended to a family batch
    #[serde(default = "default_aggregate_labels")]
    pub aggregate_labels: Vec<String>,
}

fn default_max_batch_size() -> usize {
    15
}

fn default_aggregate_labels() -> Vec<String> {
    vec!["parent".to_string()]
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            aggregate_labels: default_aggregate_labels(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub breeze: BreezeConfig,
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub checkin: CheckinConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    kiosk_id: String,
    bind_address: String,
    port: u16,
    metrics_interval_secs: u64,
    breeze_subdomain: String,
    breeze_api_key: String,
    breeze_timeout_ms: u64,
    printer_mode: PrinterMode,
    printer_name: String,
    printer_page_size: String,
    printer_timeout_ms: u64,
    max_batch_size: usize,
    aggregate_labels: Vec<String>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            kiosk_id: toml_config.server.kiosk_id,
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            metrics_interval_secs: toml_config.server.metrics_interval_secs,
            breeze_subdomain: toml_config.breeze.subdomain,
            breeze_api_key: toml_config.breeze.api_key,
            breeze_timeout_ms: toml_config.breeze.timeout_ms,
            printer_mode: toml_config.printer.mode,
            printer_name: toml_config.printer.name,
            printer_page_size: toml_config.printer.page_size,
            printer_timeout_ms: toml_config.printer.timeout_ms,
            max_batch_size: toml_config.checkin.max_batch_size,
            aggregate_labels: toml_config.checkin.aggregate_labels,
            config_file,
        }
    }

    /// Determine config file path: explicit argument, then CONFIG_FILE, then default
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/kiosk.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, config_file: String) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        let config = Self::from_toml(toml_config, config_file);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_batch_size > 0, "checkin.max_batch_size must be at least 1");
        anyhow::ensure!(
            !self.aggregate_labels.is_empty(),
            "checkin.aggregate_labels must name at least one label"
        );
        anyhow::ensure!(!self.breeze_subdomain.is_empty(), "breeze.subdomain must not be empty");
        Ok(())
    }

    /// Load configuration - tries TOML file first, falls back to defaults.
    /// Environment overrides are applied either way.
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        };
        config.with_env_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.breeze_api_key = key;
        }
        if let Some(subdomain) = lookup(ENV_SUBDOMAIN).filter(|v| !v.is_empty()) {
            self.breeze_subdomain = subdomain;
        }
        if let Some(name) = lookup(ENV_PRINTER_NAME).filter(|v| !v.is_empty()) {
            self.printer_name = name;
        }
        self
    }

    // Getters for all config fields
    pub fn kiosk_id(&self) -> &str {
        &self.kiosk_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn breeze_subdomain(&self) -> &str {
        &self.breeze_subdomain
    }

    pub fn breeze_api_key(&self) -> &str {
        &self.breeze_api_key
    }

    pub fn breeze_timeout_ms(&self) -> u64 {
        self.breeze_timeout_ms
    }

    pub fn printer_mode(&self) -> PrinterMode {
        self.printer_mode
    }

    pub fn printer_name(&self) -> &str {
        &self.printer_name
    }

    pub fn printer_page_size(&self) -> &str {
        &self.printer_page_size
    }

    pub fn printer_timeout_ms(&self) -> u64 {
        self.printer_timeout_ms
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn aggregate_labels(&self) -> &[String] {
        &self.aggregate_labels
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to switch printer mode
    pub fn with_printer_mode(mut self, mode: PrinterMode) -> Self {
        self.printer_mode = mode;
        self
    }

    /// Builder method for tests to set max_batch_size
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }
}
