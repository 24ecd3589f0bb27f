//! InfiniBand fabric exporter
//!
//! Parses the `ibdiagnet2.net_dump` and `ibdiagnet2.pm` reports, reconciles
//! link state against a persisted baseline, and serves the result as
//! Prometheus metrics.

pub mod alias;
pub mod baseline;
pub mod config_file;
pub mod error;
pub mod exporter;
pub mod grammar;
pub mod link;
pub mod metrics;
pub mod metrics_server;
pub mod net_dump;
pub mod pm;
pub mod presence;
pub mod refresh;
pub mod segment;

pub use alias::{AliasResolver, AliasTable};
pub use baseline::{Baseline, CaptureWriter, Snapshot};
pub use config_file::{DumpConfig, ExporterConfig, ParseConfig, ServerConfig};
pub use error::*;
pub use exporter::{run_capture, Exporter};
pub use grammar::{ActiveLine, DownLine, LineGrammar, LinkGrammars, Neighbor};
pub use link::{LinkRecord, SwitchPresence, STATE_ACTIVE};
pub use metrics::MetricSet;
pub use metrics_server::{MetricsServer, MetricsServerConfig};
pub use net_dump::{backfill_down_link, LinkDump, LinkDumpMode, LinkDumpPipeline};
pub use pm::{decode_counter, Component, CounterBase, PmExtractor, PmRecord, PM_COUNTERS};
pub use presence::diff_switches;
pub use refresh::{refresher_for, DumpRefresher, RunMode};
pub use segment::{BlockSegmenter, HeaderExtractor, NodeHeader};
