// 📤 Output Writer - one GeoJSON FeatureCollection per postal code
// Layout: <root>/<region_code>/<postal_code>.geojson
//
// Each document bundles two features: the GeoNames point (no properties)
// and the ZCTA boundary carrying the descriptive properties.

use crate::geometry::Geometry;
use crate::progress::ProgressReporter;
use crate::reconciliation::UnifiedZipRecord;
use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const OUTPUT_EXTENSION: &str = "geojson";

const JSON_INDENT: &[u8] = b"    ";

// ============================================================================
// DOCUMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZipProperties {
    #[serde(rename = "postal-code")]
    pub postal_code: String,
    #[serde(rename = "county-code")]
    pub county_code: String,
    pub state: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub type_: String,
    pub geometry: Geometry,
    /// Empty object for the point feature
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub type_: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn for_record(record: &UnifiedZipRecord) -> Result<Self> {
        let properties = ZipProperties {
            postal_code: record.postal_code.clone(),
            county_code: record.county_code.clone(),
            state: record.region_code.clone(),
            city: record.city.clone(),
        };
        let properties = match serde_json::to_value(properties)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        Ok(FeatureCollection {
            type_: "FeatureCollection".to_string(),
            features: vec![
                Feature {
                    type_: "Feature".to_string(),
                    geometry: Geometry::point(record.longitude, record.latitude),
                    properties: serde_json::Map::new(),
                },
                Feature {
                    type_: "Feature".to_string(),
                    geometry: record.shape.clone(),
                    properties,
                },
            ],
        })
    }

    /// Four-space indented JSON; identical input yields identical bytes.
    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(buf)
    }
}

// ============================================================================
// WRITE OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A path component that must be a directory is a file
    NotADirectory,
    /// Region or postal code would escape the output root
    UnsafePath,
    /// Any other filesystem failure
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    Skipped { path: PathBuf, reason: SkipReason },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub written: usize,
    pub skipped: usize,
    /// Writes that replaced a document written earlier in the same batch
    pub overwritten: usize,
    pub skipped_paths: Vec<PathBuf>,
}

// ============================================================================
// OUTPUT WRITER
// ============================================================================

pub struct OutputWriter {
    root: PathBuf,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputWriter { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<region_code>/<postal_code>.geojson`
    pub fn path_for(&self, record: &UnifiedZipRecord) -> PathBuf {
        self.root
            .join(&record.region_code)
            .join(format!("{}.{}", record.postal_code, OUTPUT_EXTENSION))
    }

    /// Write one record. Failures are returned as `Skipped`, never as errors.
    pub fn write(&self, record: &UnifiedZipRecord) -> WriteOutcome {
        let path = self.path_for(record);

        if !is_safe_component(&record.region_code) || !is_safe_component(&record.postal_code) {
            return WriteOutcome::Skipped {
                path,
                reason: SkipReason::UnsafePath,
            };
        }

        let dir = self.root.join(&record.region_code);
        if dir.exists() && !dir.is_dir() {
            return WriteOutcome::Skipped {
                path: dir,
                reason: SkipReason::NotADirectory,
            };
        }

        match self.write_document(record, &dir, &path) {
            Ok(()) => WriteOutcome::Written(path),
            Err(err) => WriteOutcome::Skipped {
                path,
                reason: SkipReason::Io(format!("{:#}", err)),
            },
        }
    }

    fn write_document(&self, record: &UnifiedZipRecord, dir: &Path, path: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        let bytes = FeatureCollection::for_record(record)?.to_pretty_bytes()?;
        fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Write every record, logging each skip. Later records overwrite
    /// earlier ones that map to the same path.
    pub fn write_all(&self, records: &[UnifiedZipRecord]) -> WriteSummary {
        let mut summary = WriteSummary::default();
        let mut written_paths: HashSet<PathBuf> = HashSet::new();
        let mut progress = ProgressReporter::new("write_output", records.len() as u64);

        for record in records {
            match self.write(record) {
                WriteOutcome::Written(path) => {
                    debug!("event=document_written path={}", path.display());
                    if !written_paths.insert(path) {
                        summary.overwritten += 1;
                    }
                    summary.written += 1;
                }
                WriteOutcome::Skipped { path, reason } => {
                    error!(
                        "event=write_skipped postal_code={:?} path={} reason={:?}",
                        record.postal_code,
                        path.display(),
                        reason
                    );
                    summary.skipped += 1;
                    summary.skipped_paths.push(path);
                }
            }
            progress.advance(1);
        }

        progress.finish();
        summary
    }
}

fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\'])
}

// ============================================================================
// TESTS
// ============================================================================
