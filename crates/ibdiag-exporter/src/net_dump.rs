//! Net-dump link pipeline
//!
//! Turns `ibdiagnet2.net_dump` into link records and switch presence:
//!
//! 1. split the dump into node blocks
//! 2. read the node header of each block
//! 3. extract active rows, resolving adapter aliases
//! 4. extract down rows and backfill them from the baseline
//! 5. capture: write the next baseline; serve: diff switch presence

use crate::alias::AliasResolver;
use crate::baseline::{Baseline, CaptureWriter};
use crate::error::Result;
use crate::grammar::{ActiveLine, DownLine, LinkGrammars, Neighbor};
use crate::link::{cache_key, LinkRecord, SwitchPresence};
use crate::presence::diff_switches;
use crate::segment::{read_dump, BlockSegmenter, HeaderExtractor, NodeHeader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What a pipeline run is for
#[derive(Debug, Clone)]
pub enum LinkDumpMode {
    /// Serve metrics, backfilling down links from the baseline
    Serve { baseline: Arc<Baseline> },
    /// Parse once and write the next baseline
    Capture { writer: CaptureWriter },
}

/// Result of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDump {
    pub records: Vec<LinkRecord>,
    /// Empty after a capture run
    pub switches: Vec<SwitchPresence>,
}

/// A matched port row of one block
enum PortRow<'h> {
    Active(ActiveLine<'h>),
    Down(DownLine<'h>),
}

/// Per-scrape scratch state
#[derive(Debug, Default)]
struct ScrapeState {
    /// Switch guid → leaf name learned from its adapter neighbors
    leaf_names: HashMap<String, String>,
}

/// Parses and reconciles the net dump
#[derive(Debug, Clone)]
pub struct LinkDumpPipeline {
    dump_path: PathBuf,
    segmenter: BlockSegmenter,
    headers: HeaderExtractor,
    grammars: LinkGrammars,
    resolver: Arc<AliasResolver>,
    mode: LinkDumpMode,
    map_name: bool,
}

impl LinkDumpPipeline {
    /// Compiles every grammar up front; a pattern that does not compile is
    /// reported here instead of on the first scrape.
    pub fn new(
        dump_path: impl Into<PathBuf>,
        resolver: Arc<AliasResolver>,
        mode: LinkDumpMode,
        map_name: bool,
    ) -> Result<Self> {
        Ok(Self {
            dump_path: dump_path.into(),
            segmenter: BlockSegmenter::net_dump()?,
            headers: HeaderExtractor::new()?,
            grammars: LinkGrammars::new()?,
            resolver,
            mode,
            map_name,
        })
    }

    pub fn dump_path(&self) -> &Path {
        &self.dump_path
    }

    pub fn is_capture(&self) -> bool {
        matches!(self.mode, LinkDumpMode::Capture { .. })
    }

    /// Read the dump file and run the whole pass
    #[instrument(skip(self), fields(path = %self.dump_path.display()))]
    pub fn run(&self) -> Result<LinkDump> {
        let text = read_dump(&self.dump_path)?;
        let records = self.parse(&text)?;

        let switches = match &self.mode {
            LinkDumpMode::Capture { writer } => {
                writer.write(&records)?;
                Vec::new()
            }
            LinkDumpMode::Serve { baseline } => diff_switches(&records, baseline),
        };

        info!(
            records = records.len(),
            switches = switches.len(),
            "Net dump parsed"
        );
        Ok(LinkDump { records, switches })
    }

    /// Link records for dump text, in block order then line order
    pub fn parse(&self, text: &str) -> Result<Vec<LinkRecord>> {
        let mut state = ScrapeState::default();
        let mut records = Vec::new();

        for block in self.segmenter.segment(text) {
            let header = self.headers.extract(block)?;
            self.parse_block(&header, block, &mut state, &mut records);
        }
        Ok(records)
    }

    fn parse_block(
        &self,
        header: &NodeHeader,
        block: &str,
        state: &mut ScrapeState,
        records: &mut Vec<LinkRecord>,
    ) {
        // The header line itself never matches a port grammar.
        let rows: Vec<PortRow<'_>> = block
            .lines()
            .skip(1)
            .filter_map(|line| {
                if let Some(active) = self.grammars.match_active(line) {
                    Some(PortRow::Active(active))
                } else if let Some(down) = self.grammars.match_down(line) {
                    Some(PortRow::Down(down))
                } else {
                    if !line.trim().is_empty() {
                        debug!(guid = %header.guid, line = line.trim(), "Line matches no link grammar");
                    }
                    None
                }
            })
            .collect();

        // Every adapter row is seen before any record is built, so all
        // records of the block share one remote name.
        for row in &rows {
            if let PortRow::Active(active) = row {
                self.learn_leaf_name(header, active, state);
            }
        }
        let remote_name = self.remote_name(header, state);

        for row in &rows {
            let record = match row {
                PortRow::Active(active) => self.active_record(header, active, &remote_name),
                PortRow::Down(down) => self.down_record(header, down, &remote_name),
            };
            records.push(record);
        }
    }

    /// Remember the leaf switch an adapter neighbor is cabled to
    fn learn_leaf_name(&self, header: &NodeHeader, line: &ActiveLine<'_>, state: &mut ScrapeState) {
        if let Neighbor::Adapter { alias, .. } = line.neighbor {
            if let Some(leaf) = self.resolver.leaf_name(self.resolver.resolve(alias)) {
                state
                    .leaf_names
                    .entry(header.guid.clone())
                    .or_insert_with(|| leaf.to_string());
            }
        }
    }

    /// Remote name for records of this block: the header name, or the leaf
    /// name learned for the switch when map-name mode is on.
    fn remote_name(&self, header: &NodeHeader, state: &ScrapeState) -> String {
        if self.map_name {
            if let Some(leaf) = state.leaf_names.get(&header.guid) {
                return leaf.clone();
            }
        }
        header.name.clone()
    }

    fn active_record(&self, header: &NodeHeader, line: &ActiveLine<'_>, remote_name: &str) -> LinkRecord {
        let local_name = match line.neighbor {
            Neighbor::Adapter { host, alias } => {
                format!("{} {}", host, self.resolver.resolve(alias))
            }
            Neighbor::Switch { description } => description.to_string(),
        };

        LinkRecord {
            remote_guid: header.guid.clone(),
            remote_name: remote_name.to_string(),
            remote_port: line.port.to_string(),
            state: line.state.to_string(),
            local_guid: line.neighbor_guid.to_ascii_lowercase(),
            local_name,
            local_port: String::new(),
        }
    }

    fn down_record(&self, header: &NodeHeader, line: &DownLine<'_>, remote_name: &str) -> LinkRecord {
        let mut record = LinkRecord {
            remote_guid: header.guid.clone(),
            remote_name: remote_name.to_string(),
            remote_port: line.port.to_string(),
            state: line.state.to_string(),
            ..Default::default()
        };

        if let LinkDumpMode::Serve { baseline } = &self.mode {
            backfill_down_link(&mut record, &header.name, baseline);
        }
        record
    }
}

/// Copy the last known neighbor of a down link from the baseline.
///
/// The remote name is only replaced while it is still the block header's own
/// name. A miss leaves the local fields empty: a port that was never seen
/// active has nothing to recover.
pub fn backfill_down_link(record: &mut LinkRecord, header_name: &str, baseline: &Baseline) {
    let Some(cached) = baseline.get(&cache_key(&record.remote_guid, &record.remote_port)) else {
        return;
    };

    if record.remote_name == header_name && !cached.remote_name.is_empty() {
        record.remote_name = cached.remote_name;
    }
    record.local_guid = cached.local_guid;
    record.local_name = cached.local_name;
    record.local_port = cached.local_port;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasTable;
    use crate::baseline::Snapshot;
    use pretty_assertions::assert_eq;

    const LEAF_GUID: &str = "0x0c42a10300a1b2c3";

    fn dump(rows: &[&str]) -> String {
        let mut text = format!("\"MF0;leaf-01:MQM8700/U1\", SW, {}, LID 12\n", LEAF_GUID);
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    const ADAPTER_ROW: &str = r#"      1/1/1 : 1   : ACT : LINK UP : 4 : 50G : 4096 : RS_FEC : NO-RTR : 0x0c42a10300d4e5f6 : mlx5_0/1/1/1 : 35 : "node01 HCA-3""#;
    const SWITCH_ROW: &str = r#"      1/2/1 : 5   : ACT : LINK UP : 4 : 50G : 4096 : RS_FEC : NO-RTR : 0x0c42a10300ffee01 : 1/1/1 : 40 : "MF0;spine-01:MQM8700/U1""#;
    const DOWN_ROW: &str = "      1/3/1 : 3   : DOWN : POLLING : N/A : N/A : N/A : N/A : N/A : N/A : N/A : N/A : N/A";

    fn serve(entries: Snapshot, table: AliasTable, map_name: bool) -> LinkDumpPipeline {
        LinkDumpPipeline::new(
            "/unused",
            Arc::new(AliasResolver::new(table)),
            LinkDumpMode::Serve {
                baseline: Arc::new(Baseline::from_entries(entries)),
            },
            map_name,
        )
        .unwrap()
    }

    fn cached(remote_name: &str, local_guid: &str, local_name: &str, local_port: &str) -> LinkRecord {
        LinkRecord {
            remote_guid: LEAF_GUID.to_string(),
            remote_name: remote_name.to_string(),
            remote_port: "3".to_string(),
            state: "ACT".to_string(),
            local_guid: local_guid.to_string(),
            local_name: local_name.to_string(),
            local_port: local_port.to_string(),
        }
    }

    #[test]
    fn test_adapter_row_resolves_alias() {
        let pipeline = serve(Snapshot::new(), AliasTable::default(), false);
        let records = pipeline.parse(&dump(&[ADAPTER_ROW])).unwrap();

        assert_eq!(
            records,
            vec![LinkRecord {
                remote_guid: LEAF_GUID.to_string(),
                remote_name: "MF0;leaf-01:MQM8700/U1".to_string(),
                remote_port: "1".to_string(),
                state: "ACT".to_string(),
                local_guid: "0x0c42a10300d4e5f6".to_string(),
                local_name: "node01 mlx5_10".to_string(),
                local_port: String::new(),
            }]
        );
    }

    #[test]
    fn test_switch_row_keeps_description() {
        let pipeline = serve(Snapshot::new(), AliasTable::default(), false);
        let records = pipeline.parse(&dump(&[SWITCH_ROW])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].local_name, "MF0;spine-01:MQM8700/U1");
        assert_eq!(records[0].remote_port, "5");
    }

    #[test]
    fn test_down_row_backfilled_from_baseline() {
        let mut entries = Snapshot::new();
        entries.insert(
            format!("{}_3", LEAF_GUID),
            cached("r2", "g2", "n2", "p2"),
        );
        let pipeline = serve(entries, AliasTable::default(), false);
        let records = pipeline.parse(&dump(&[DOWN_ROW])).unwrap();

        assert_eq!(
            records,
            vec![LinkRecord {
                remote_guid: LEAF_GUID.to_string(),
                remote_name: "r2".to_string(),
                remote_port: "3".to_string(),
                state: "DOWN".to_string(),
                local_guid: "g2".to_string(),
                local_name: "n2".to_string(),
                local_port: "p2".to_string(),
            }]
        );
    }

    #[test]
    fn test_down_row_cache_miss_leaves_local_side_empty() {
        let pipeline = serve(Snapshot::new(), AliasTable::default(), false);
        let records = pipeline.parse(&dump(&[DOWN_ROW])).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, "DOWN");
        assert_eq!(records[0].remote_port, "3");
        assert_eq!(records[0].remote_name, "MF0;leaf-01:MQM8700/U1");
        assert!(records[0].local_guid.is_empty());
        assert!(records[0].local_name.is_empty());
        assert!(records[0].local_port.is_empty());
    }

    #[test]
    fn test_map_name_substitutes_learned_leaf() {
        let mut table = AliasTable::default();
        table
            .leaf_names
            .insert("mlx5_10".to_string(), "leaf-rack3".to_string());
        let mut entries = Snapshot::new();
        entries.insert(format!("{}_3", LEAF_GUID), cached("r2", "g2", "n2", ""));

        let pipeline = serve(entries, table, true);
        let records = pipeline
            .parse(&dump(&[ADAPTER_ROW, SWITCH_ROW, DOWN_ROW]))
            .unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.remote_name == "leaf-rack3"));
        // Learned name differs from the header name, so the cached one is not applied.
        assert_eq!(records[2].local_guid, "g2");
    }

    #[test]
    fn test_map_name_renames_uplink_listed_before_adapter() {
        let mut table = AliasTable::default();
        table
            .leaf_names
            .insert("mlx5_10".to_string(), "leaf-rack3".to_string());

        let pipeline = serve(Snapshot::new(), table, true);
        let records = pipeline
            .parse(&dump(&[SWITCH_ROW, DOWN_ROW, ADAPTER_ROW]))
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].remote_port, "5");
        assert_eq!(records[0].local_name, "MF0;spine-01:MQM8700/U1");
        let names: Vec<&str> = records.iter().map(|r| r.remote_name.as_str()).collect();
        assert_eq!(names, vec!["leaf-rack3"; 3]);
    }

    #[test]
    fn test_map_name_off_keeps_header_name() {
        let mut table = AliasTable::default();
        table
            .leaf_names
            .insert("mlx5_10".to_string(), "leaf-rack3".to_string());

        let pipeline = serve(Snapshot::new(), table, false);
        let records = pipeline.parse(&dump(&[ADAPTER_ROW])).unwrap();
        assert_eq!(records[0].remote_name, "MF0;leaf-01:MQM8700/U1");
    }

    #[test]
    fn test_map_name_without_learned_leaf_keeps_header_name() {
        let pipeline = serve(Snapshot::new(), AliasTable::default(), true);
        let records = pipeline.parse(&dump(&[SWITCH_ROW])).unwrap();
        assert_eq!(records[0].remote_name, "MF0;leaf-01:MQM8700/U1");
    }

    #[test]
    fn test_unmatched_lines_are_skipped() {
        let pipeline = serve(Snapshot::new(), AliasTable::default(), false);
        let records = pipeline
            .parse(&dump(&[
                "Port : IB# : Sta : PhysSta : LWA : LSA : MTU : FEC mode : Retrans mode : Neighbor Guid : N# : NLID : Neighbor Description",
                "      something the vendor added later",
                ADAPTER_ROW,
            ]))
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_capture_mode_skips_backfill() {
        let pipeline = LinkDumpPipeline::new(
            "/unused",
            Arc::new(AliasResolver::default()),
            LinkDumpMode::Capture {
                writer: CaptureWriter::new("/unused.yaml"),
            },
            false,
        )
        .unwrap();
        assert!(pipeline.is_capture());

        let records = pipeline.parse(&dump(&[DOWN_ROW])).unwrap();
        assert!(records[0].local_guid.is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let pipeline = serve(Snapshot::new(), AliasTable::default(), false);
        let text = dump(&[ADAPTER_ROW, SWITCH_ROW, DOWN_ROW]);
        assert_eq!(pipeline.parse(&text).unwrap(), pipeline.parse(&text).unwrap());
    }

    #[test]
    fn test_backfill_keeps_non_default_remote_name() {
        let mut entries = Snapshot::new();
        entries.insert(format!("{}_3", LEAF_GUID), cached("r2", "g2", "n2", "p2"));
        let baseline = Baseline::from_entries(entries);

        let mut record = LinkRecord {
            remote_guid: LEAF_GUID.to_string(),
            remote_name: "leaf-rack3".to_string(),
            remote_port: "3".to_string(),
            state: "DOWN".to_string(),
            ..Default::default()
        };
        backfill_down_link(&mut record, "MF0;leaf-01:MQM8700/U1", &baseline);
        assert_eq!(record.remote_name, "leaf-rack3");
        assert_eq!(record.local_name, "n2");
    }
}
