//! Scrape orchestration
//!
//! Every `/metrics` request refreshes the dumps, runs the link pipeline and
//! the PM extractor, and projects both into the [`MetricSet`]. Scrapes are
//! serialized: projection resets shared vectors, and two interleaved scrapes
//! would expose a half-filled set.

use crate::alias::AliasResolver;
use crate::baseline::{Baseline, CaptureWriter};
use crate::config_file::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::metrics::MetricSet;
use crate::net_dump::{LinkDump, LinkDumpMode, LinkDumpPipeline};
use crate::pm::{PmExtractor, PmRecord};
use crate::refresh::{refresher_for, DumpRefresher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

pub struct Exporter {
    links: LinkDumpPipeline,
    pm: PmExtractor,
    refresher: Arc<dyn DumpRefresher>,
    metrics: MetricSet,
    baseline: Arc<Baseline>,
    scrape_lock: Mutex<()>,
}

impl Exporter {
    pub fn new(
        links: LinkDumpPipeline,
        pm: PmExtractor,
        refresher: Arc<dyn DumpRefresher>,
        baseline: Arc<Baseline>,
    ) -> Result<Self> {
        Ok(Self {
            links,
            pm,
            refresher,
            metrics: MetricSet::new()?,
            baseline,
            scrape_lock: Mutex::new(()),
        })
    }

    /// Serving exporter for `config`.
    ///
    /// Fails when the baseline snapshot exists but does not parse.
    pub fn from_config(config: &ExporterConfig) -> Result<Self> {
        let baseline = Arc::new(Baseline::load(config.dump.snapshot_path())?);
        let resolver = Arc::new(AliasResolver::new(config.aliases.clone()));

        let links = LinkDumpPipeline::new(
            config.dump.net_dump_path(),
            resolver,
            LinkDumpMode::Serve {
                baseline: Arc::clone(&baseline),
            },
            config.parse.map_name_mode,
        )?;
        let pm = PmExtractor::new(
            config.dump.pm_path(),
            Arc::clone(&baseline),
            config.parse.counter_base,
        )?;
        let refresher = refresher_for(config.dump.mode, &config.dump);

        info!(
            baseline_entries = baseline.len(),
            run_mode = %config.dump.mode,
            refresher = refresher.name(),
            counter_base = %config.parse.counter_base,
            map_name = config.parse.map_name_mode,
            "Exporter initialized"
        );
        Self::new(links, pm, refresher, baseline)
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn baseline(&self) -> &Arc<Baseline> {
        &self.baseline
    }

    /// Run one scrape and render the registry.
    ///
    /// A failed scrape is logged and counted; the series from the last good
    /// scrape are served unchanged.
    pub async fn scrape(self: &Arc<Self>) -> String {
        let _guard = self.scrape_lock.lock().await;
        let timer = self.metrics.start_scrape_timer();

        match self.collect().await {
            Ok((links, pm)) => {
                self.metrics.project(&links, &pm);
                self.metrics.record_scrape_success();
            }
            Err(e) => {
                error!(error = %e, "Scrape failed, serving previous values");
                self.metrics.record_scrape_failure();
            }
        }

        timer.observe_duration();
        self.metrics.gather_metrics()
    }

    /// Refresh the dumps and parse both of them
    async fn collect(self: &Arc<Self>) -> Result<(LinkDump, Vec<PmRecord>)> {
        self.refresher.refresh().await?;

        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || -> Result<(LinkDump, Vec<PmRecord>)> {
            let links = this.links.run()?;
            let pm = this.pm.run()?;
            Ok((links, pm))
        })
        .await
        .map_err(|e| ExporterError::Other(format!("Scrape task failed: {}", e)))?
    }

    /// Re-read the baseline snapshot between scrapes
    pub async fn reload_baseline(&self) -> Result<usize> {
        let _guard = self.scrape_lock.lock().await;
        self.baseline.reload()
    }
}

/// Refresh the dumps, parse the net dump once and write the baseline.
///
/// Returns the number of records parsed; the snapshot may hold fewer when
/// a port appears twice.
pub async fn run_capture(config: &ExporterConfig) -> Result<usize> {
    refresher_for(config.dump.mode, &config.dump).refresh().await?;

    let writer = CaptureWriter::new(config.dump.snapshot_path());
    let pipeline = LinkDumpPipeline::new(
        config.dump.net_dump_path(),
        Arc::new(AliasResolver::new(config.aliases.clone())),
        LinkDumpMode::Capture { writer },
        config.parse.map_name_mode,
    )?;

    let dump = tokio::task::spawn_blocking(move || pipeline.run())
        .await
        .map_err(|e| ExporterError::Other(format!("Capture task failed: {}", e)))??;
    Ok(dump.records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const NET_DUMP: &str = r#""MF0;leaf-01:MQM8700/U1", SW, 0x0c42a10300a1b2c3, LID 12
      1/1/1 : 1   : ACT : LINK UP : 4 : 50G : 4096 : RS_FEC : NO-RTR : 0x0c42a10300d4e5f6 : mlx5_0/1/1/1 : 35 : "node01 HCA-1"
"#;

    const PM: &str = "Port=1 Lid=0x000c GUID=0x0c42a10300a1b2c3 Device=54000 Port Name=leaf-01/1\nport_rcv_errors=0x2\n";

    fn config(dir: &TempDir) -> ExporterConfig {
        let report = dir.path().join("data").join("ibdiagnet2");
        fs::create_dir_all(&report).unwrap();
        fs::write(report.join("ibdiagnet2.net_dump"), NET_DUMP).unwrap();
        fs::write(report.join("ibdiagnet2.pm"), PM).unwrap();

        let mut config = ExporterConfig::default();
        config.dump.work_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_scrape_projects_both_pipelines() {
        let dir = TempDir::new().unwrap();
        let exporter = Arc::new(Exporter::from_config(&config(&dir)).unwrap());

        let text = exporter.scrape().await;
        assert!(text.contains(r#"localName="node01 mlx5_0""#));
        assert!(text.contains(r#"infiniband_port_rcv_errors{component="ca""#));
        assert!(text.contains("ibdiag_exporter_scrapes_total 1"));
    }

    #[tokio::test]
    async fn test_failed_scrape_keeps_previous_values() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let exporter = Arc::new(Exporter::from_config(&config).unwrap());
        exporter.scrape().await;

        fs::remove_file(config.dump.net_dump_path()).unwrap();
        let text = exporter.scrape().await;
        assert!(text.contains(r#"localName="node01 mlx5_0""#));
        assert!(text.contains("ibdiag_exporter_scrape_errors_total 1"));
    }

    #[tokio::test]
    async fn test_capture_then_serve() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        assert_eq!(run_capture(&config).await.unwrap(), 1);
        assert!(config.dump.snapshot_path().exists());

        let exporter = Arc::new(Exporter::from_config(&config).unwrap());
        assert_eq!(exporter.baseline().len(), 1);

        // The switch is now known, so its PM ports classify as switch ports.
        let text = exporter.scrape().await;
        assert!(text.contains(r#"infiniband_port_rcv_errors{component="switch""#));
        assert!(text.contains(r#"state="UP"} 1"#));
    }

    #[tokio::test]
    async fn test_reload_baseline() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let exporter = Exporter::from_config(&config).unwrap();
        assert!(exporter.baseline().is_empty());

        run_capture(&config).await.unwrap();
        assert_eq!(exporter.reload_baseline().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scrape_waits_for_scrape_lock() {
        let dir = TempDir::new().unwrap();
        let exporter = Arc::new(Exporter::from_config(&config(&dir)).unwrap());

        let guard = exporter.scrape_lock.lock().await;
        let pending = tokio::spawn({
            let exporter = Arc::clone(&exporter);
            async move { exporter.scrape().await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(guard);
        let text = pending.await.unwrap();
        assert!(text.contains("ibdiag_exporter_scrapes_total 1"));
    }

    #[test]
    fn test_malformed_baseline_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let snapshot = config.dump.snapshot_path();
        fs::create_dir_all(snapshot.parent().unwrap()).unwrap();
        fs::write(&snapshot, "- not\n- a mapping\n").unwrap();

        assert!(matches!(
            Exporter::from_config(&config),
            Err(ExporterError::Baseline { .. })
        ));
    }
}
