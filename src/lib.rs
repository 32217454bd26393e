// ZIP Code GeoJSON Builder - Core Library
// Exposes the pipeline stages for the CLI and for tests

pub mod config;
pub mod logging;
pub mod progress;
pub mod events;
pub mod acquisition;     // Source archives: download + extract
pub mod attributes;      // GeoNames postal tables
pub mod geometry;        // ZCTA boundary shapefile
pub mod reconciliation;  // Join + validation
pub mod output;          // GeoJSON documents on disk
pub mod pipeline;

// Re-export commonly used types
pub use config::{
    AttributeSource, GeometrySource, ParseMode, PipelineConfig,
    GEOMETRY_POSTAL_CODE_COLUMN, SENTINEL_REGION, TERRITORY_CODES,
};
pub use events::{ReconWarning, RejectionEvent, RejectionKind, WarningKind};
pub use acquisition::{
    AcquiredSource, OfflineProvider, SourceArchive, SourceProvider,
    acquire_all, ensure_local, extract_archive, planned_sources,
};
#[cfg(feature = "download")]
pub use acquisition::HttpProvider;
pub use attributes::{
    AttributeEntry, AttributeIndex, AttributeIndexBuilder, AttributeParseError, LineIssue,
    load_attributes,
};
pub use geometry::{Geometry, GeometryRecord, GeometryTable, load_geometries};
pub use reconciliation::{
    ReconStats, ReconciliationEngine, ReconciliationReport, UnifiedZipRecord,
};
pub use output::{FeatureCollection, OutputWriter, SkipReason, WriteOutcome, WriteSummary};
pub use pipeline::{RunReport, build_index, process, run};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
