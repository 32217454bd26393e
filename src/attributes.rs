// 🏷️ Attribute Table Loader - GeoNames postal tables
// Tab-delimited rows → one AttributeEntry per postal code
//
// GeoNames layout (12 columns, the last one optional):
//   0 country code   1 postal code    2 place name
//   3 admin1 name    4 admin1 code    5 admin2 name
//   6 admin2 code    7 admin3 name    8 admin3 code
//   9 latitude      10 longitude     11 accuracy

use crate::config::{ParseMode, PipelineConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Minimum number of fields a row must carry (through longitude).
pub const MIN_FIELDS: usize = 11;

const COL_COUNTRY: usize = 0;
const COL_POSTAL_CODE: usize = 1;
const COL_PLACE_NAME: usize = 2;
const COL_REGION: usize = 4;
const COL_COUNTY: usize = 6;
const COL_LATITUDE: usize = 9;
const COL_LONGITUDE: usize = 10;

// ============================================================================
// ATTRIBUTE ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub country_code: String,
    pub postal_code: String,
    pub place_name: String,
    /// State abbreviation, or the country code for outlying territories
    pub region_code: String,
    pub county_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl AttributeEntry {
    /// Build an entry from one row's fields.
    ///
    /// `is_territory` decides whether the country code replaces the raw
    /// admin1 code as the region.
    pub fn from_fields<F>(fields: &[&str], is_territory: F) -> Result<Self, AttributeParseError>
    where
        F: Fn(&str) -> bool,
    {
        if fields.len() < MIN_FIELDS {
            return Err(AttributeParseError::TooFewFields {
                found: fields.len(),
            });
        }

        let latitude = parse_coordinate("latitude", fields[COL_LATITUDE])?;
        let longitude = parse_coordinate("longitude", fields[COL_LONGITUDE])?;

        let country_code = fields[COL_COUNTRY].to_string();
        let region_code = if is_territory(&country_code) {
            country_code.clone()
        } else {
            fields[COL_REGION].to_string()
        };

        Ok(AttributeEntry {
            postal_code: fields[COL_POSTAL_CODE].to_string(),
            place_name: fields[COL_PLACE_NAME].to_string(),
            county_code: fields[COL_COUNTY].to_string(),
            country_code,
            region_code,
            latitude,
            longitude,
        })
    }
}

fn parse_coordinate(field: &'static str, raw: &str) -> Result<f64, AttributeParseError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AttributeParseError::BadCoordinate {
            field,
            value: raw.to_string(),
        })
}

// ============================================================================
// PARSE ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttributeParseError {
    /// Row has fewer than `MIN_FIELDS` fields
    TooFewFields { found: usize },
    /// Latitude or longitude is not a finite number
    BadCoordinate { field: &'static str, value: String },
    /// Row could not be decoded (e.g. invalid UTF-8)
    Unreadable(String),
}

impl fmt::Display for AttributeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewFields { found } => {
                write!(f, "expected at least {MIN_FIELDS} fields, found {found}")
            }
            Self::BadCoordinate { field, value } => {
                write!(f, "cannot parse {field} {value:?}")
            }
            Self::Unreadable(msg) => write!(f, "unreadable row: {msg}"),
        }
    }
}

impl std::error::Error for AttributeParseError {}

/// A line the lenient loader skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineIssue {
    pub source: String,
    pub line: u64,
    pub error: AttributeParseError,
}

// ============================================================================
// ATTRIBUTE INDEX
// ============================================================================

/// Postal code → entry. The latest entry loaded for a postal code wins.
#[derive(Debug, Default)]
pub struct AttributeIndex {
    entries: HashMap<String, AttributeEntry>,
    duplicates: usize,
    issues: Vec<LineIssue>,
    loaded_by_source: Vec<(String, usize)>,
}

impl AttributeIndex {
    pub fn get(&self, postal_code: &str) -> Option<&AttributeEntry> {
        self.entries.get(postal_code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that replaced an earlier entry with the same postal code
    pub fn duplicate_count(&self) -> usize {
        self.duplicates
    }

    /// Lines skipped in lenient mode
    pub fn issues(&self) -> &[LineIssue] {
        &self.issues
    }

    /// Rows accepted per source, in load order
    pub fn loaded_by_source(&self) -> &[(String, usize)] {
        &self.loaded_by_source
    }
}

/// Accumulates one or more tables into a single index.
///
/// Territory tables are loaded into the same builder after the primary
/// table, so nothing is ever concatenated on disk.
pub struct AttributeIndexBuilder {
    territory_codes: Vec<String>,
    mode: ParseMode,
    index: AttributeIndex,
}

impl AttributeIndexBuilder {
    pub fn new(territory_codes: Vec<String>, mode: ParseMode) -> Self {
        AttributeIndexBuilder {
            territory_codes,
            mode,
            index: AttributeIndex::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.territory_codes.clone(), config.parse_mode)
    }

    /// Insert an entry, replacing any earlier one. Returns true on replace.
    pub fn insert(&mut self, entry: AttributeEntry) -> bool {
        let replaced = self
            .index
            .entries
            .insert(entry.postal_code.clone(), entry)
            .is_some();
        if replaced {
            self.index.duplicates += 1;
        }
        replaced
    }

    /// Load a tab-delimited table. Returns the number of rows accepted.
    pub fn load_reader<R: Read>(&mut self, source: &str, reader: R) -> Result<usize> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut accepted = 0;

        for result in rdr.records() {
            let record = match result {
                Ok(record) => record,
                Err(err) if err.is_io_error() => {
                    return Err(err).with_context(|| format!("Failed to read table {}", source));
                }
                Err(err) => {
                    let line = err.position().map(|p| p.line()).unwrap_or(0);
                    self.reject_line(source, line, AttributeParseError::Unreadable(err.to_string()))?;
                    continue;
                }
            };

            let line = record.position().map(|p| p.line()).unwrap_or(0);

            // Blank line
            if record.len() == 1 && record[0].trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = record.iter().collect();
            let territory_codes = &self.territory_codes;
            match AttributeEntry::from_fields(&fields, |cc| territory_codes.iter().any(|t| t == cc)) {
                Ok(entry) => {
                    self.insert(entry);
                    accepted += 1;
                }
                Err(error) => self.reject_line(source, line, error)?,
            }
        }

        self.index.loaded_by_source.push((source.to_string(), accepted));
        Ok(accepted)
    }

    pub fn load_file(&mut self, source: &str, path: &Path) -> Result<usize> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open attribute table: {}", path.display()))?;
        self.load_reader(source, file)
            .with_context(|| format!("Failed to load attribute table: {}", path.display()))
    }

    fn reject_line(&mut self, source: &str, line: u64, error: AttributeParseError) -> Result<()> {
        if self.mode == ParseMode::Strict {
            bail!("{} line {}: {}", source, line, error);
        }
        self.index.issues.push(LineIssue {
            source: source.to_string(),
            line,
            error,
        });
        Ok(())
    }

    pub fn build(self) -> AttributeIndex {
        self.index
    }
}

/// Load a single table into a fresh index.
pub fn load_attributes(path: &Path, config: &PipelineConfig) -> Result<AttributeIndex> {
    let mut builder = AttributeIndexBuilder::from_config(config);
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attributes");
    builder.load_file(source, path)?;
    Ok(builder.build())
}

// ============================================================================
// TESTS
// ============================================================================
