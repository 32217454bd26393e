// 🔗 Pipeline - acquire → index → load boundaries → reconcile → write
//
// Setup failures (a source that cannot be fetched, a table that cannot be
// opened) end the run with an error naming the resource. Per-record problems
// are counted, logged and carried in the RunReport.

use crate::acquisition::{acquire_all, AcquiredSource, SourceProvider};
use crate::attributes::{AttributeIndex, AttributeIndexBuilder, LineIssue};
use crate::config::PipelineConfig;
use crate::events::RejectionEvent;
use crate::geometry::{load_geometries, GeometryTable};
use crate::output::{OutputWriter, WriteSummary};
use crate::reconciliation::{ReconStats, ReconciliationEngine};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<AcquiredSource>,
    pub attribute_entries: usize,
    /// Rows accepted per attribute table, in load order
    pub attribute_rows_by_source: Vec<(String, usize)>,
    pub attribute_duplicates: usize,
    pub attribute_issues: Vec<LineIssue>,
    pub geometry_rows: usize,
    pub reconciliation: ReconStats,
    pub rejections: Vec<RejectionEvent>,
    pub region_substitutions: usize,
    pub output: WriteSummary,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} attribute entries ({} duplicates, {} bad lines), {} boundary rows, {} accepted, {} rejected, {} written, {} write failures",
            self.attribute_entries,
            self.attribute_duplicates,
            self.attribute_issues.len(),
            self.geometry_rows,
            self.reconciliation.accepted,
            self.rejections.len(),
            self.output.written,
            self.output.skipped,
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))
    }
}

/// Load every configured attribute table into one index, primary first.
pub fn build_index(config: &PipelineConfig) -> Result<AttributeIndex> {
    let mut builder = AttributeIndexBuilder::from_config(config);

    for source in &config.attribute_sources {
        let path = config.table_path(source);
        let loaded = builder.load_file(&source.name, &path)?;
        info!(
            "event=attributes_loaded source={} path={} rows={}",
            source.name,
            path.display(),
            loaded
        );
    }

    let index = builder.build();
    for issue in index.issues() {
        debug!(
            "event=attribute_line_skipped source={} line={} error={}",
            issue.source, issue.line, issue.error
        );
    }
    if !index.issues().is_empty() {
        warn!(
            "event=attribute_lines_skipped count={} mode={}",
            index.issues().len(),
            config.parse_mode
        );
    }
    if index.duplicate_count() > 0 {
        warn!(
            "event=attribute_duplicates count={} policy=last_write_wins",
            index.duplicate_count()
        );
    }

    Ok(index)
}

/// Everything after acquisition: reconcile the loaded tables and write.
pub fn process(
    config: &PipelineConfig,
    index: &AttributeIndex,
    table: GeometryTable,
    sources: Vec<AcquiredSource>,
    started_at: DateTime<Utc>,
) -> Result<RunReport> {
    let geometry_rows = table.records.len() + table.rejections.len();
    let mut rejections = table.rejections;

    let engine = ReconciliationEngine::with_sentinel(config.sentinel_region.clone());
    let report = engine.reconcile(index, table.records);
    info!("event=reconciled {}", report.summary());

    rejections.extend(report.rejections);
    rejections.sort_by_key(|r| r.position);
    log_rejections(&rejections);

    for warning in &report.warnings {
        debug!("{}", warning);
    }
    if !report.warnings.is_empty() {
        warn!(
            "event=regions_substituted count={} sentinel={}",
            report.warnings.len(),
            config.sentinel_region
        );
    }
    if report.stats.duplicate_postal_codes > 0 {
        warn!(
            "event=duplicate_postal_codes count={} policy=last_write_wins",
            report.stats.duplicate_postal_codes
        );
    }

    let writer = OutputWriter::new(&config.output_dir);
    let output = writer.write_all(&report.accepted);
    info!(
        "event=output_written root={} written={} skipped={} overwritten={}",
        writer.root().display(),
        output.written,
        output.skipped,
        output.overwritten
    );

    let run = RunReport {
        started_at,
        finished_at: Utc::now(),
        sources,
        attribute_entries: index.len(),
        attribute_rows_by_source: index.loaded_by_source().to_vec(),
        attribute_duplicates: index.duplicate_count(),
        attribute_issues: index.issues().to_vec(),
        geometry_rows,
        region_substitutions: report.warnings.len(),
        reconciliation: report.stats,
        rejections,
        output,
    };

    if let Some(path) = &config.report_path {
        run.write_json(path)?;
        info!("event=report_written path={}", path.display());
    }

    Ok(run)
}

fn log_rejections(rejections: &[RejectionEvent]) {
    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for rejection in rejections {
        debug!("{}", rejection);
        *by_kind.entry(rejection.kind.to_string()).or_default() += 1;
    }
    for (kind, count) in by_kind {
        warn!("event=records_rejected kind={} count={}", kind, count);
    }
}

/// Full run.
pub fn run(config: &PipelineConfig, provider: &dyn SourceProvider) -> Result<RunReport> {
    let started_at = Utc::now();
    config.validate()?;

    info!(
        "event=run_start source_dir={} output_dir={} mode={}",
        config.source_dir.display(),
        config.output_dir.display(),
        config.parse_mode
    );

    let sources = acquire_all(provider, config)?;
    let index = build_index(config)?;

    let shapefile = config.shapefile_path();
    let table = load_geometries(&shapefile, config.geometry_source.postal_code_column)?;
    info!(
        "event=boundaries_loaded path={} rows={} unusable={}",
        shapefile.display(),
        table.len(),
        table.rejections.len()
    );

    let report = process(config, &index, table, sources, started_at)?;
    info!("event=run_done {}", report.summary());
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
