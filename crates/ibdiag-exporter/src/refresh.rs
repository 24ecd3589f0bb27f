//! Dump refresh before a scrape
//!
//! In `dev` mode the dumps on disk are used as they are. In `agent` mode the
//! exporter runs on a fabric host: it reruns the diagnostic tool and copies
//! its report into the work dir. `local` mode pulls the report from a switch's
//! management interface, which this crate does not implement.

use crate::config_file::DumpConfig;
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How fresh dumps reach the work dir
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Read whatever is on disk
    #[default]
    Dev,
    /// Run the diagnostic tool locally
    Agent,
    /// Fetch the report from a switch
    Local,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Dev => write!(f, "dev"),
            RunMode::Agent => write!(f, "agent"),
            RunMode::Local => write!(f, "local"),
        }
    }
}

impl FromStr for RunMode {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(RunMode::Dev),
            "agent" => Ok(RunMode::Agent),
            "local" => Ok(RunMode::Local),
            other => Err(ExporterError::Configuration(format!(
                "unknown run mode '{}', expected dev, agent or local",
                other
            ))),
        }
    }
}

/// Stages fresh dump files before the pipelines read them
#[async_trait]
pub trait DumpRefresher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn refresh(&self) -> Result<()>;
}

/// Refresher for [`RunMode`] and the dump settings
pub fn refresher_for(mode: RunMode, dump: &DumpConfig) -> Arc<dyn DumpRefresher> {
    match mode {
        RunMode::Dev => Arc::new(NoopRefresher),
        RunMode::Agent => Arc::new(AgentRefresher::new(
            dump.diag_command.clone(),
            dump.diag_output_dir.clone(),
            dump.data_dir(),
        )),
        RunMode::Local => Arc::new(RemoteFetchRefresher),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefresher;

#[async_trait]
impl DumpRefresher for NoopRefresher {
    fn name(&self) -> &'static str {
        "dev"
    }

    async fn refresh(&self) -> Result<()> {
        debug!("Dev mode, dumps used as found");
        Ok(())
    }
}

/// Reruns the diagnostic tool and copies its report into the data dir
#[derive(Debug, Clone)]
pub struct AgentRefresher {
    diag_command: String,
    output_dir: PathBuf,
    data_dir: PathBuf,
}

impl AgentRefresher {
    pub fn new(diag_command: impl Into<String>, output_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            diag_command: diag_command.into(),
            output_dir: output_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    fn copy_command(&self) -> String {
        format!(
            "cp -Rf {} {}/",
            shellquote(&self.output_dir.to_string_lossy()),
            shellquote(&self.data_dir.to_string_lossy())
        )
    }
}

#[async_trait]
impl DumpRefresher for AgentRefresher {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn refresh(&self) -> Result<()> {
        exec_or_fail(&self.diag_command).await?;

        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| ExporterError::io(&self.data_dir, e))?;
        exec_or_fail(&self.copy_command()).await?;

        info!(
            output_dir = %self.output_dir.display(),
            data_dir = %self.data_dir.display(),
            "Diagnostic report refreshed"
        );
        Ok(())
    }
}

/// Stands in for the switch fetch client, which lives outside this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteFetchRefresher;

#[async_trait]
impl DumpRefresher for RemoteFetchRefresher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn refresh(&self) -> Result<()> {
        Err(ExporterError::Refresh(
            "remote fetch not supported".to_string(),
        ))
    }
}

/// Characters that need escaping inside shell double quotes
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Double-quote `s` for `/bin/sh`
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Run `cmd` through `/bin/sh -c`; a non-zero exit is a refresh error.
async fn exec_or_fail(cmd: &str) -> Result<String> {
    debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ExporterError::Refresh(format!("failed to spawn '{}': {}", cmd, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }

    let exit_code = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    warn!(command = %cmd, exit_code, stderr = %stderr, "Command failed");
    Err(ExporterError::Refresh(format!(
        "'{}' exited with {}: {}",
        cmd,
        exit_code,
        if stderr.is_empty() { stdout } else { stderr }
    )))
}
