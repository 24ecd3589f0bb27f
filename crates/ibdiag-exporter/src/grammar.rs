//! Port line grammars for the net dump
//!
//! Every port row of a node block is a `:`-separated column list:
//!
//! ```text
//! Port  : IB# : Sta : PhysSta : LWA : LSA : MTU  : FEC mode : Retrans mode : Neighbor Guid      : N#           : NLID : Neighbor Description
//! 1/1/1 : 1   : ACT : LINK UP : 4   : 50G : 4096 : RS_FEC   : NO-RTR       : 0x0c42a10300d4e5f6 : mlx5_0/1/1/1 : 35   : "node01 HCA-1"
//! ```
//!
//! Active rows come in two shapes that differ only in the neighbor port and
//! description columns: adapters report `<device>/<a>/<b>/<c>` and a
//! `"<hostname> <alias>"` description, switches report `<a>/<b>/<c>` and a
//! free-form node description. Down rows carry `N/A` in the neighbor columns.
//!
//! Grammars are kept as an ordered list of `(pattern, extractor)` pairs; the
//! first grammar that matches a line wins.

use crate::error::{ExporterError, Result};
use regex::{Captures, Regex};
use tracing::debug;

/// Columns shared by every active row, up to the neighbor guid
const ACTIVE_COLUMNS: &str = r"^\s*(?P<local_port>\d+/\d+/\d+)\s+:\s(?P<port>\d+)\s+:\s(?P<state>\w+)\s+:\s+(?P<phys_state>\w+\s\w+)\s+:\s+(?P<lwa>\d+)\s+:\s+(?P<lsa>\d+\w+)\s+:\s+(?P<mtu>\d+)\s+:\s+(?P<fec>\w+)\s+:\s+(?P<retrans>.*)\s+:\s+(?P<neighbor_guid>\w{18})";

/// Adapter neighbor: device-qualified port and `"<hostname> <alias>"`
const ADAPTER_NEIGHBOR: &str = r#"\s+:\s+(?P<neighbor_port>\w+/\d+/\d+/\d+)\s+:\s+(?P<neighbor_lid>\d+)\s+:\s+"(?P<host>[\w-]+)\s(?P<alias>[\w-]+)""#;

/// Switch neighbor: bare port triple and free-form description
const SWITCH_NEIGHBOR: &str = r#"\s+:\s+(?P<neighbor_port>\d+/\d+/\d+)\s+:\s+(?P<neighbor_lid>\d+)\s+:\s+"(?P<description>.*)""#;

/// Down row: state columns followed by `N/A` neighbor columns
const DOWN_ROW: &str =
    r"^\s*(?P<local_port>\d+/\d+/\d+)\s+:\s+(?P<port>\d+)\s+:\s+(?P<state>\w+)\s+:\s+(?P<phys_state>\w+).*N/A";

/// A named, compiled line pattern
#[derive(Debug, Clone)]
pub struct LineGrammar {
    name: &'static str,
    regex: Regex,
}

impl LineGrammar {
    pub fn compile(name: &'static str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| ExporterError::Grammar {
            grammar: name,
            source,
        })?;
        Ok(Self { name, regex })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn captures<'h>(&self, line: &'h str) -> Option<Captures<'h>> {
        self.regex.captures(line)
    }
}

/// Neighbor side of an active row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor<'h> {
    /// Host channel adapter, described as `"<host> <alias>"`
    Adapter { host: &'h str, alias: &'h str },
    /// Another switch, described by its node description
    Switch { description: &'h str },
}

/// Fields of an active row that feed a link record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveLine<'h> {
    pub grammar: &'static str,
    pub port: &'h str,
    pub state: &'h str,
    pub neighbor_guid: &'h str,
    pub neighbor: Neighbor<'h>,
}

/// Fields of a down row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownLine<'h> {
    pub port: &'h str,
    pub state: &'h str,
}

type ActiveExtract = for<'h> fn(&'static str, &Captures<'h>) -> Option<ActiveLine<'h>>;

fn extract_adapter<'h>(grammar: &'static str, caps: &Captures<'h>) -> Option<ActiveLine<'h>> {
    Some(ActiveLine {
        grammar,
        port: caps.name("port")?.as_str(),
        state: caps.name("state")?.as_str(),
        neighbor_guid: caps.name("neighbor_guid")?.as_str(),
        neighbor: Neighbor::Adapter {
            host: caps.name("host")?.as_str(),
            alias: caps.name("alias")?.as_str(),
        },
    })
}

fn extract_switch<'h>(grammar: &'static str, caps: &Captures<'h>) -> Option<ActiveLine<'h>> {
    Some(ActiveLine {
        grammar,
        port: caps.name("port")?.as_str(),
        state: caps.name("state")?.as_str(),
        neighbor_guid: caps.name("neighbor_guid")?.as_str(),
        neighbor: Neighbor::Switch {
            description: caps.name("description")?.as_str(),
        },
    })
}

/// The ordered active grammars plus the down grammar
#[derive(Clone)]
pub struct LinkGrammars {
    active: Vec<(LineGrammar, ActiveExtract)>,
    down: LineGrammar,
}

impl std::fmt::Debug for LinkGrammars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkGrammars")
            .field("active", &self.active_order())
            .field("down", &self.down.name())
            .finish()
    }
}

impl LinkGrammars {
    /// Compile the built-in grammars. Adapter rows are tried before switch
    /// rows.
    pub fn new() -> Result<Self> {
        let adapter = LineGrammar::compile(
            "active_adapter",
            &format!("{}{}", ACTIVE_COLUMNS, ADAPTER_NEIGHBOR),
        )?;
        let switch = LineGrammar::compile(
            "active_switch",
            &format!("{}{}", ACTIVE_COLUMNS, SWITCH_NEIGHBOR),
        )?;
        let down = LineGrammar::compile("down", DOWN_ROW)?;

        Ok(Self {
            active: vec![
                (adapter, extract_adapter as ActiveExtract),
                (switch, extract_switch as ActiveExtract),
            ],
            down,
        })
    }

    /// Grammar names in the order they are tried
    pub fn active_order(&self) -> Vec<&'static str> {
        self.active.iter().map(|(g, _)| g.name()).collect()
    }

    /// First active grammar that matches `line`. A line that later grammars
    /// match as well stays with the first one and is logged.
    pub fn match_active<'h>(&self, line: &'h str) -> Option<ActiveLine<'h>> {
        let mut matches = self.active.iter().filter_map(|(grammar, extract)| {
            let caps = grammar.captures(line)?;
            extract(grammar.name(), &caps)
        });
        let first = matches.next()?;
        for other in matches {
            debug!(
                kept = first.grammar,
                also = other.grammar,
                line = line.trim(),
                "Line matches more than one active grammar"
            );
        }
        Some(first)
    }

    pub fn match_down<'h>(&self, line: &'h str) -> Option<DownLine<'h>> {
        let caps = self.down.captures(line)?;
        Some(DownLine {
            port: caps.name("port")?.as_str(),
            state: caps.name("state")?.as_str(),
        })
    }
}
