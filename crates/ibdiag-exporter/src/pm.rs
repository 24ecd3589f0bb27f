//! Port performance counters
//!
//! `ibdiagnet2.pm` holds one block per port:
//!
//! ```text
//! Port=1 Lid=0x000c GUID=0x0c42a10300a1b2c3 Device=54000 Port Name=leaf-01/1
//! link_down_counter=0x0
//! port_xmit_data=0x1f4
//! port_rcv_data=NA
//! ```
//!
//! Each block becomes a [`PmRecord`]. The baseline classifies the port owner
//! as a switch or a channel adapter and supplies a friendlier name.

use crate::baseline::Baseline;
use crate::error::{ExporterError, Result};
use crate::link::cache_key;
use crate::segment::{read_dump, BlockSegmenter};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Per-port block header
pub const PM_HEADER_PATTERN: &str = r"(?m)Port=(?P<port>\d+)\sLid=(?P<lid>\w+)\sGUID=(?P<guid>\w{18})\sDevice=(?P<device>\d+)\sPort\sName=(?P<name>.*)";

/// Token ibdiagnet prints for a counter the port does not support
const NOT_AVAILABLE: &str = "NA";

/// Counters exported per port, in exposition order
pub const PM_COUNTERS: [&str; 51] = [
    "link_down_counter",
    "link_error_recovery_counter",
    "symbol_error_counter",
    "port_rcv_remote_physical_errors",
    "port_rcv_errors",
    "port_xmit_discard",
    "port_rcv_switch_relay_errors",
    "excessive_buffer_errors",
    "local_link_integrity_errors",
    "port_rcv_constraint_errors",
    "port_xmit_constraint_errors",
    "vl15_dropped",
    "port_xmit_data",
    "port_rcv_data",
    "port_xmit_pkts",
    "port_rcv_pkts",
    "port_xmit_wait",
    "port_xmit_data_extended",
    "port_rcv_data_extended",
    "port_xmit_pkts_extended",
    "port_rcv_pkts_extended",
    "port_unicast_xmit_pkts",
    "port_unicast_rcv_pkts",
    "port_multicast_xmit_pkts",
    "port_multicast_rcv_pkts",
    "symbol_error_counter_extended",
    "link_error_recovery_counter_extended",
    "link_downed_counter_extended",
    "port_rcv_errors_extended",
    "port_rcv_remote_physical_errors_extended",
    "port_rcv_switch_relay_errors_extended",
    "port_xmit_discards_extended",
    "port_xmit_constraint_errors_extended",
    "port_rcv_constraint_errors_extended",
    "local_link_integrity_errors_extended",
    "excessive_buffer_overrun_errors_extended",
    "vl15_dropped_extended",
    "port_xmit_wait_extended",
    "qp1_dropped_extended",
    "retransmission_per_sec",
    "max_retransmission_rate",
    "port_local_physical_errors",
    "port_malformed_packet_errors",
    "port_buffer_overrun_errors",
    "port_dlid_mapping_errors",
    "port_vl_mapping_errors",
    "port_looping_errors",
    "port_inactive_discards",
    "port_neighbor_mtu_discards",
    "port_sw_lifetime_limit_discards",
    "port_sw_hoq_lifetime_limit_discards",
];

/// Numeric base of counter tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBase {
    /// Tokens are hexadecimal, with or without a `0x` prefix
    #[default]
    Hex,
    Decimal,
}

impl CounterBase {
    pub fn radix(self) -> u32 {
        match self {
            CounterBase::Hex => 16,
            CounterBase::Decimal => 10,
        }
    }
}

impl fmt::Display for CounterBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterBase::Hex => write!(f, "hex"),
            CounterBase::Decimal => write!(f, "decimal"),
        }
    }
}

/// Decode one counter token.
///
/// `NA` is 0. Otherwise a `0x`/`0X` prefix is stripped and the rest parsed in
/// `base`; a token that does not parse is logged and read as 0.
pub fn decode_counter(token: &str, base: CounterBase) -> f64 {
    if token == NOT_AVAILABLE {
        return 0.0;
    }
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);

    match u64::from_str_radix(digits, base.radix()) {
        Ok(value) => value as f64,
        Err(e) => {
            warn!(token, base = %base, error = %e, "Undecodable counter value, using 0");
            0.0
        }
    }
}

/// Kind of node owning a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Switch,
    ChannelAdapter,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Switch => "switch",
            Component::ChannelAdapter => "ca",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters of one port for one scrape
#[derive(Debug, Clone, PartialEq)]
pub struct PmRecord {
    pub component: Component,
    pub port: String,
    pub lid: String,
    pub guid: String,
    pub device: String,
    pub name: String,
    /// `(counter, value)` in [`PM_COUNTERS`] order
    pub counters: Vec<(&'static str, f64)>,
}

impl PmRecord {
    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters
            .iter()
            .find(|(counter, _)| *counter == name)
            .map(|(_, value)| *value)
    }
}

/// Parses the PM dump
#[derive(Debug, Clone)]
pub struct PmExtractor {
    pm_path: PathBuf,
    segmenter: BlockSegmenter,
    header: Regex,
    counters: Vec<(&'static str, Regex)>,
    baseline: Arc<Baseline>,
    base: CounterBase,
}

impl PmExtractor {
    pub fn new(pm_path: impl Into<PathBuf>, baseline: Arc<Baseline>, base: CounterBase) -> Result<Self> {
        let segmenter = BlockSegmenter::new("pm_header", PM_HEADER_PATTERN)?;
        let header = Regex::new(PM_HEADER_PATTERN).map_err(|source| ExporterError::Grammar {
            grammar: "pm_header",
            source,
        })?;

        let counters = PM_COUNTERS
            .iter()
            .map(|&name| {
                Regex::new(&format!(r"\b{}=(\w+)", name))
                    .map(|regex| (name, regex))
                    .map_err(|source| ExporterError::Grammar {
                        grammar: name,
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pm_path: pm_path.into(),
            segmenter,
            header,
            counters,
            baseline,
            base,
        })
    }

    pub fn pm_path(&self) -> &Path {
        &self.pm_path
    }

    pub fn base(&self) -> CounterBase {
        self.base
    }

    #[instrument(skip(self), fields(path = %self.pm_path.display()))]
    pub fn run(&self) -> Result<Vec<PmRecord>> {
        let text = read_dump(&self.pm_path)?;
        let records = self.parse(&text)?;
        info!(ports = records.len(), "PM dump parsed");
        Ok(records)
    }

    /// One record per port block, in file order
    pub fn parse(&self, text: &str) -> Result<Vec<PmRecord>> {
        self.segmenter
            .segment(text)
            .into_iter()
            .map(|block| self.parse_block(block))
            .collect()
    }

    fn parse_block(&self, block: &str) -> Result<PmRecord> {
        let caps = self
            .header
            .captures(block)
            .ok_or_else(|| ExporterError::malformed_header(block))?;

        let guid = caps["guid"].to_ascii_lowercase();
        let port = caps["port"].to_string();

        let component = if self.baseline.contains_guid(&guid) {
            Component::Switch
        } else {
            Component::ChannelAdapter
        };
        let name = self.display_name(&guid, &port, caps["name"].trim());

        let counters = self
            .counters
            .iter()
            .map(|(name, regex)| {
                let value = regex
                    .captures(block)
                    .and_then(|c| c.get(1))
                    .map(|token| decode_counter(token.as_str(), self.base))
                    .unwrap_or(0.0);
                (*name, value)
            })
            .collect();

        Ok(PmRecord {
            component,
            port,
            lid: caps["lid"].to_string(),
            guid,
            device: caps["device"].to_string(),
            name,
            counters,
        })
    }

    /// Switch port name from the baseline, then the name the baseline knows
    /// the adapter by, then the dump's own port name.
    fn display_name(&self, guid: &str, port: &str, port_name: &str) -> String {
        if let Some(entry) = self.baseline.get(&cache_key(guid, port)) {
            if !entry.remote_name.is_empty() {
                return entry.remote_name;
            }
        }
        if let Some(entry) = self.baseline.find_by_local_guid(guid) {
            if !entry.local_name.is_empty() {
                return entry.local_name;
            }
        }
        port_name.to_string()
    }
}
