//! Configuration file support for ibdiag-exporter
//!
//! Loads and validates exporter configuration from TOML files.
//! Default location: /etc/ibdiag-exporter/config.toml

use crate::alias::AliasTable;
use crate::error::{ExporterError, Result};
use crate::pm::CounterBase;
use crate::refresh::RunMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the metrics endpoint binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Dump locations and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Root for `data/` and `config/`
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Net dump, default `<work_dir>/data/ibdiagnet2/ibdiagnet2.net_dump`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_dump_file: Option<PathBuf>,

    /// PM dump, default `<work_dir>/data/ibdiagnet2/ibdiagnet2.pm`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm_file: Option<PathBuf>,

    /// Baseline snapshot, default `<work_dir>/config/config.yaml`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_file: Option<PathBuf>,

    /// How dumps are refreshed before each scrape
    #[serde(default)]
    pub mode: RunMode,

    /// Diagnostic command run in agent mode
    #[serde(default = "default_diag_command")]
    pub diag_command: String,

    /// Directory the diagnostic command writes its report to
    #[serde(default = "default_diag_output_dir")]
    pub diag_output_dir: PathBuf,
}

/// Parsing behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Parse once, write the baseline snapshot and exit
    #[serde(default)]
    pub capture_mode: bool,

    /// Name uplinks after the leaf switch learned from adapter neighbors
    #[serde(default)]
    pub map_name_mode: bool,

    /// Numeric base of PM counter values
    #[serde(default)]
    pub counter_base: CounterBase,
}

/// Complete exporter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub dump: DumpConfig,

    #[serde(default)]
    pub parse: ParseConfig,

    /// `[aliases.devices]` and `[aliases.leaf_names]`
    #[serde(default)]
    pub aliases: AliasTable,
}

// Default functions
fn default_listen_addr() -> String {
    "0.0.0.0:9690".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./")
}

fn default_diag_command() -> String {
    "ibdiagnet".to_string()
}

fn default_diag_output_dir() -> PathBuf {
    PathBuf::from("/var/tmp/ibdiagnet2")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            net_dump_file: None,
            pm_file: None,
            snapshot_file: None,
            mode: RunMode::default(),
            diag_command: default_diag_command(),
            diag_output_dir: default_diag_output_dir(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            ExporterError::Configuration(format!(
                "Invalid listen_addr '{}': {}",
                self.listen_addr, e
            ))
        })
    }

    /// Keep the bind address, replace the port
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.socket_addr()?;
        addr.set_port(port);
        self.listen_addr = addr.to_string();
        Ok(())
    }
}

impl DumpConfig {
    /// Directory the diagnostic report is copied into
    pub fn data_dir(&self) -> PathBuf {
        self.work_dir.join("data")
    }

    fn report_dir(&self) -> PathBuf {
        self.data_dir().join("ibdiagnet2")
    }

    pub fn net_dump_path(&self) -> PathBuf {
        self.net_dump_file
            .clone()
            .unwrap_or_else(|| self.report_dir().join("ibdiagnet2.net_dump"))
    }

    pub fn pm_path(&self) -> PathBuf {
        self.pm_file
            .clone()
            .unwrap_or_else(|| self.report_dir().join("ibdiagnet2.pm"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join("config").join("config.yaml"))
    }
}

impl ExporterConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    ExporterError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ExporterError::io(path, e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default("/etc/ibdiag-exporter/config.toml")
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            ExporterError::Configuration(format!("Failed to serialize config: {}", e))
        })?;
        fs::write(path, content).map_err(|e| ExporterError::io(path, e))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;

        if self.dump.mode == RunMode::Agent && self.dump.diag_command.trim().is_empty() {
            return Err(ExporterError::Configuration(
                "diag_command must be set in agent mode".to_string(),
            ));
        }
        if let Some((alias, _)) = self
            .aliases
            .devices
            .iter()
            .find(|(alias, canonical)| alias.is_empty() || canonical.is_empty())
        {
            return Err(ExporterError::Configuration(format!(
                "device alias '{}' has an empty side",
                alias
            )));
        }
        Ok(())
    }
}
