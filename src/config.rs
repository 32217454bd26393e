// ⚙️ Pipeline Configuration
// Where the sources live, where the output goes, and how strict loading is.
//
// Every field has a default, so an empty TOML file (or no file at all)
// reproduces the 2019 GeoNames + Census ZCTA build.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Column of the ZCTA attribute row that carries the postal code.
///
/// The 2019 cartographic boundary file orders its fields
/// `ZCTA5CE10, AFFGEOID10, GEOID10, ALAND10, AWATER10`; `GEOID10` is used.
pub const GEOMETRY_POSTAL_CODE_COLUMN: usize = 2;

/// Region code assigned to records whose attribute entry has none.
pub const SENTINEL_REGION: &str = "ZZ";

/// Country codes GeoNames publishes as separate tables. Their admin1 field is
/// not a state abbreviation, so the country code stands in for the region.
pub const TERRITORY_CODES: [&str; 4] = ["PR", "VI", "AS", "GU"];

const GEONAMES_BASE_URL: &str = "http://download.geonames.org/export/zip";
const ZCTA_2019_URL: &str =
    "http://www2.census.gov/geo/tiger/GENZ2019/shp/cb_2019_us_zcta510_500k.zip";

// ============================================================================
// PARSE MODE
// ============================================================================

/// How the attribute loader treats a malformed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Abort the load at the first bad line (data-integrity audits)
    Strict,
    /// Skip the line and record it as an issue
    Lenient,
}

impl Default for ParseMode {
    fn default() -> Self {
        ParseMode::Lenient
    }
}

impl std::fmt::Display for ParseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseMode::Strict => write!(f, "strict"),
            ParseMode::Lenient => write!(f, "lenient"),
        }
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// One GeoNames postal table: a zip archive holding `<table>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSource {
    pub name: String,
    pub url: String,
    /// Archive file name, relative to `source_dir`
    pub archive: String,
    /// Extracted table name, relative to `source_dir`
    pub table: String,
}

impl AttributeSource {
    /// GeoNames layout: `<CC>.zip` extracts to `<CC>.txt`.
    pub fn geonames(country_code: &str) -> Self {
        AttributeSource {
            name: country_code.to_string(),
            url: format!("{}/{}.zip", GEONAMES_BASE_URL, country_code),
            archive: format!("{}.zip", country_code),
            table: format!("{}.txt", country_code),
        }
    }
}

/// The boundary dataset: a zipped shapefile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometrySource {
    pub url: String,
    pub archive: String,
    /// `.shp` file name after extraction, relative to `source_dir`
    pub shapefile: String,
    #[serde(default = "default_postal_code_column")]
    pub postal_code_column: usize,
}

fn default_postal_code_column() -> usize {
    GEOMETRY_POSTAL_CODE_COLUMN
}

impl Default for GeometrySource {
    fn default() -> Self {
        GeometrySource {
            url: ZCTA_2019_URL.to_string(),
            archive: "census.zip".to_string(),
            shapefile: "cb_2019_us_zcta510_500k.shp".to_string(),
            postal_code_column: GEOMETRY_POSTAL_CODE_COLUMN,
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Archives are downloaded and extracted here
    pub source_dir: PathBuf,

    /// GeoJSON documents are written under `<output_dir>/<region>/`
    pub output_dir: PathBuf,

    pub parse_mode: ParseMode,

    pub sentinel_region: String,

    pub territory_codes: Vec<String>,

    /// Optional JSON run report
    pub report_path: Option<PathBuf>,

    /// Never touch the network; a missing archive is fatal
    pub offline: bool,

    pub download_timeout_secs: u64,

    /// Primary table first; the rest are merged into the same index in order
    pub attribute_sources: Vec<AttributeSource>,

    pub geometry_source: GeometrySource,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            source_dir: PathBuf::from("source_data"),
            output_dir: PathBuf::from("data"),
            parse_mode: ParseMode::default(),
            sentinel_region: SENTINEL_REGION.to_string(),
            territory_codes: TERRITORY_CODES.iter().map(|c| c.to_string()).collect(),
            report_path: None,
            offline: false,
            download_timeout_secs: 600,
            attribute_sources: ["US", "PR", "GU", "VI", "AS"]
                .iter()
                .map(|cc| AttributeSource::geonames(cc))
                .collect(),
            geometry_source: GeometrySource::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; missing keys fall back to the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).context("Failed to parse pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.attribute_sources.is_empty() {
            bail!("at least one attribute source is required");
        }

        if self.sentinel_region.chars().count() != 2 {
            bail!(
                "sentinel region must be two characters, got {:?}",
                self.sentinel_region
            );
        }

        let mut names = HashSet::new();
        for source in &self.attribute_sources {
            if !names.insert(source.name.as_str()) {
                bail!("duplicate attribute source name: {}", source.name);
            }
        }

        Ok(())
    }

    pub fn is_territory(&self, country_code: &str) -> bool {
        self.territory_codes.iter().any(|c| c == country_code)
    }

    pub fn archive_path(&self, archive: &str) -> PathBuf {
        self.source_dir.join(archive)
    }

    pub fn table_path(&self, source: &AttributeSource) -> PathBuf {
        self.source_dir.join(&source.table)
    }

    pub fn shapefile_path(&self) -> PathBuf {
        self.source_dir.join(&self.geometry_source.shapefile)
    }
}

// ============================================================================
// TESTS
// ============================================================================
