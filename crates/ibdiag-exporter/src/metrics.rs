//! Prometheus projection of a scrape
//!
//! Link, switch and PM vectors are reset and refilled on every successful
//! scrape, so series for links that vanished from the dump disappear with it.
//! Exporter self metrics accumulate for the life of the process.

use crate::link::{LinkRecord, SwitchPresence};
use crate::net_dump::LinkDump;
use crate::pm::{PmRecord, PM_COUNTERS};
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Labels of link and switch series
pub const LINK_LABELS: [&str; 7] = [
    "remoteGuid",
    "remoteName",
    "remotePort",
    "state",
    "localGuid",
    "localName",
    "localPort",
];

/// Labels of PM counter series
pub const PM_LABELS: [&str; 6] = ["component", "port", "lid", "guid", "device", "name"];

/// Filler for link labels a switch series has no value for
const NO_VALUE: &str = "-";

/// Metrics owned by one exporter
#[derive(Clone)]
pub struct MetricSet {
    // Fabric
    link_info_total: CounterVec,
    link_info_state: GaugeVec,
    switch_info_state: GaugeVec,
    pm: BTreeMap<&'static str, GaugeVec>,

    // Exporter
    scrapes: Counter,
    scrape_errors: Counter,
    scrape_duration_seconds: Histogram,

    registry: Arc<Registry>,
}

impl MetricSet {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let link_info_total = CounterVec::new(
            Opts::new("infiniband_link_info_total", "Link observations in the latest scrape"),
            &LINK_LABELS,
        )?;
        registry.register(Box::new(link_info_total.clone()))?;

        let link_info_state = GaugeVec::new(
            Opts::new(
                "infiniband_link_info_state",
                "Link state (1=ACT, 0=any other state)",
            ),
            &LINK_LABELS,
        )?;
        registry.register(Box::new(link_info_state.clone()))?;

        let switch_info_state = GaugeVec::new(
            Opts::new(
                "infiniband_switch_info_state",
                "Switch presence against the baseline (1=UP, 0=DOWN)",
            ),
            &LINK_LABELS,
        )?;
        registry.register(Box::new(switch_info_state.clone()))?;

        let mut pm = BTreeMap::new();
        for counter in PM_COUNTERS {
            let gauge = GaugeVec::new(
                Opts::new(format!("infiniband_{}", counter), counter),
                &PM_LABELS,
            )?;
            registry.register(Box::new(gauge.clone()))?;
            pm.insert(counter, gauge);
        }

        let scrapes = Counter::new(
            "ibdiag_exporter_scrapes_total",
            "Total scrapes that refreshed the fabric metrics",
        )?;
        registry.register(Box::new(scrapes.clone()))?;

        let scrape_errors = Counter::new(
            "ibdiag_exporter_scrape_errors_total",
            "Total scrapes that failed and served previous values",
        )?;
        registry.register(Box::new(scrape_errors.clone()))?;

        let scrape_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ibdiag_exporter_scrape_duration_seconds",
                "Time spent refreshing and parsing the dumps",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;

        Ok(Self {
            link_info_total,
            link_info_state,
            switch_info_state,
            pm,
            scrapes,
            scrape_errors,
            scrape_duration_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Replace every fabric series with the contents of one scrape
    pub fn project(&self, links: &LinkDump, pm: &[PmRecord]) {
        self.link_info_total.reset();
        self.link_info_state.reset();
        self.switch_info_state.reset();
        for gauge in self.pm.values() {
            gauge.reset();
        }

        for record in &links.records {
            self.set_link(record);
        }
        for switch in &links.switches {
            self.set_switch(switch);
        }
        for record in pm {
            self.set_pm(record);
        }
    }

    fn set_link(&self, record: &LinkRecord) {
        let labels = [
            record.remote_guid.as_str(),
            record.remote_name.as_str(),
            record.remote_port.as_str(),
            record.state.as_str(),
            record.local_guid.as_str(),
            record.local_name.as_str(),
            record.local_port.as_str(),
        ];
        self.link_info_total.with_label_values(&labels).inc();
        self.link_info_state
            .with_label_values(&labels)
            .set(if record.is_active() { 1.0 } else { 0.0 });
    }

    fn set_switch(&self, switch: &SwitchPresence) {
        let labels = [
            switch.guid.as_str(),
            switch.name.as_str(),
            NO_VALUE,
            switch.state(),
            NO_VALUE,
            NO_VALUE,
            NO_VALUE,
        ];
        self.switch_info_state
            .with_label_values(&labels)
            .set(if switch.up { 1.0 } else { 0.0 });
    }

    fn set_pm(&self, record: &PmRecord) {
        let labels = [
            record.component.as_str(),
            record.port.as_str(),
            record.lid.as_str(),
            record.guid.as_str(),
            record.device.as_str(),
            record.name.as_str(),
        ];
        for (counter, value) in &record.counters {
            if let Some(gauge) = self.pm.get(counter) {
                gauge.with_label_values(&labels).set(*value);
            }
        }
    }

    pub fn record_scrape_success(&self) {
        self.scrapes.inc();
    }

    pub fn record_scrape_failure(&self) {
        self.scrape_errors.inc();
    }

    pub fn start_scrape_timer(&self) -> prometheus::HistogramTimer {
        self.scrape_duration_seconds.start_timer()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = vec![];
        encoder.encode(&self.registry.gather(), &mut buf).ok();
        String::from_utf8(buf).unwrap_or_else(|_| String::from("# Error encoding metrics\n"))
    }
}
