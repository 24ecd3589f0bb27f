//! Link state baseline
//!
//! The baseline is the last known good set of link facts, keyed by
//! `"{remoteGuid}_{remotePort}"` and persisted as a flat YAML mapping:
//!
//! ```yaml
//! 0x0c42a10300a1b2c3_1:
//!   remoteName: MF0;leaf-01:MQM8700/U1
//!   remoteGuid: '0x0c42a10300a1b2c3'
//!   remotePort: '1'
//!   state: ACT
//!   localGuid: '0x0c42a10300d4e5f6'
//!   localName: node01 mlx5_0
//!   localPort: ''
//! ```
//!
//! Serving uses [`Baseline`] read-only. A capture pass writes the next
//! snapshot through [`CaptureWriter`]; the two never share an in-memory map.

use crate::error::{ExporterError, Result};
use crate::link::{guid_of_key, LinkRecord};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persisted form of a baseline
pub type Snapshot = BTreeMap<String, LinkRecord>;

/// Read-shared link baseline
#[derive(Debug, Default)]
pub struct Baseline {
    entries: RwLock<Snapshot>,
    source: Option<PathBuf>,
}

impl Baseline {
    /// An empty baseline, as on first run
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Snapshot) -> Self {
        Self {
            entries: RwLock::new(entries),
            source: None,
        }
    }

    /// Load a persisted snapshot.
    ///
    /// A missing file is a first run and yields an empty baseline. A file that
    /// exists but does not parse is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries = read_snapshot(path)?;
        Ok(Self {
            entries: RwLock::new(entries),
            source: Some(path.to_path_buf()),
        })
    }

    /// Re-read the snapshot this baseline was loaded from.
    ///
    /// On error the current entries are kept.
    pub fn reload(&self) -> Result<usize> {
        let path = self.source.as_deref().ok_or_else(|| {
            ExporterError::Configuration("baseline was not loaded from a file".to_string())
        })?;
        let entries = read_snapshot(path)?;
        let count = entries.len();
        *self.entries.write() = entries;
        info!(path = %path.display(), entries = count, "Baseline reloaded");
        Ok(count)
    }

    pub fn get(&self, key: &str) -> Option<LinkRecord> {
        self.entries.read().get(key).cloned()
    }

    /// Distinct guids of all keys
    pub fn all_guids(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .keys()
            .map(|key| guid_of_key(key).to_string())
            .collect()
    }

    pub fn contains_guid(&self, guid: &str) -> bool {
        self.entries
            .read()
            .keys()
            .any(|key| guid_of_key(key) == guid)
    }

    /// First entry, in key order, whose neighbor is `guid`
    pub fn find_by_local_guid(&self, guid: &str) -> Option<LinkRecord> {
        self.entries
            .read()
            .values()
            .find(|entry| entry.local_guid == guid)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Baseline snapshot not found, starting empty");
            return Ok(Snapshot::new());
        }
        Err(e) => return Err(ExporterError::io(path, e)),
    };

    if content.trim().is_empty() {
        return Ok(Snapshot::new());
    }

    let snapshot: Snapshot = serde_yaml::from_str(&content).map_err(|e| ExporterError::Baseline {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(normalize_guids(snapshot))
}

/// Lowercase the guid part of every key and the guids of every entry, the
/// same form the dump parsers produce.
fn normalize_guids(snapshot: Snapshot) -> Snapshot {
    snapshot
        .into_iter()
        .map(|(key, mut entry)| {
            let key = match key.split_once('_') {
                Some((guid, port)) => format!("{}_{}", guid.to_ascii_lowercase(), port),
                None => key.to_ascii_lowercase(),
            };
            entry.remote_guid.make_ascii_lowercase();
            entry.local_guid.make_ascii_lowercase();
            (key, entry)
        })
        .collect()
}

/// Writes the baseline a capture pass produces
#[derive(Debug, Clone)]
pub struct CaptureWriter {
    path: PathBuf,
}

impl CaptureWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key every record by `remoteGuid_remotePort`; later records win.
    pub fn snapshot(records: &[LinkRecord]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for record in records {
            if snapshot
                .insert(record.cache_key(), record.clone())
                .is_some()
            {
                warn!(key = %record.cache_key(), "Duplicate link key in capture, keeping last");
            }
        }
        snapshot
    }

    /// Serialize `records` and replace the snapshot file atomically.
    ///
    /// The YAML is written to a temporary file next to the target and renamed
    /// over it.
    pub fn write(&self, records: &[LinkRecord]) -> Result<usize> {
        let snapshot = Self::snapshot(records);
        let yaml = serde_yaml::to_string(&snapshot)
            .map_err(|e| ExporterError::Other(format!("Failed to serialize baseline: {}", e)))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| ExporterError::io(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ExporterError::io(&dir, e))?;
        if let Err(e) = tmp.write_all(yaml.as_bytes()) {
            return Err(ExporterError::io(tmp.path(), e));
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| ExporterError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| ExporterError::io(&self.path, e.error))?;

        info!(
            path = %self.path.display(),
            entries = snapshot.len(),
            "Baseline snapshot written"
        );
        Ok(snapshot.len())
    }
}
