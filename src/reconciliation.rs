// ⚖️ Reconciliation Engine - Join boundaries to postal attributes
//
// For each geometry record, in dataset order:
//   1. empty postal code        → reject (EmptyPostalCode)
//   2. no attribute entry       → reject (NoMatchingAttribute)
//   3. entry with empty region  → keep, region = sentinel, warn (MissingRegion)
//   4. otherwise                → keep
//
// Nothing here aborts the run: every outcome is a value in the report.

use crate::attributes::AttributeIndex;
use crate::config::SENTINEL_REGION;
use crate::events::{ReconWarning, RejectionEvent, RejectionKind, WarningKind};
use crate::geometry::{Geometry, GeometryRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// UNIFIED RECORD
// ============================================================================

/// A boundary joined with its attribute entry. The unit of output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedZipRecord {
    pub postal_code: String,
    pub county_code: String,
    pub region_code: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub shape: Geometry,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconStats {
    pub geometry_records: usize,
    pub accepted: usize,
    pub no_matching_attribute: usize,
    pub empty_postal_code: usize,
    pub region_substituted: usize,
    /// Accepted records whose postal code was already accepted earlier
    pub duplicate_postal_codes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub accepted: Vec<UnifiedZipRecord>,
    pub rejections: Vec<RejectionEvent>,
    pub warnings: Vec<ReconWarning>,
    pub stats: ReconStats,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} geometry records: {} accepted, {} without attributes, {} empty postal codes, {} regions substituted, {} duplicate postal codes",
            self.stats.geometry_records,
            self.stats.accepted,
            self.stats.no_matching_attribute,
            self.stats.empty_postal_code,
            self.stats.region_substituted,
            self.stats.duplicate_postal_codes,
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Region code for entries without one (default: "ZZ")
    pub sentinel_region: String,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            sentinel_region: SENTINEL_REGION.to_string(),
        }
    }

    pub fn with_sentinel(sentinel_region: impl Into<String>) -> Self {
        ReconciliationEngine {
            sentinel_region: sentinel_region.into(),
        }
    }

    /// Join every geometry record against the attribute index.
    ///
    /// Records are consumed: each accepted record takes ownership of its
    /// shape, rejected ones are dropped.
    ///
    /// Example:
    /// ```
    /// use zipcode_geojson::{AttributeIndexBuilder, ParseMode, ReconciliationEngine};
    ///
    /// let index = AttributeIndexBuilder::new(vec![], ParseMode::Lenient).build();
    /// let report = ReconciliationEngine::new().reconcile(&index, Vec::new());
    /// assert!(report.accepted.is_empty());
    /// ```
    pub fn reconcile(
        &self,
        index: &AttributeIndex,
        records: Vec<GeometryRecord>,
    ) -> ReconciliationReport {
        let mut accepted = Vec::with_capacity(records.len());
        let mut rejections = Vec::new();
        let mut warnings = Vec::new();
        let mut stats = ReconStats {
            geometry_records: records.len(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();

        for record in records {
            let GeometryRecord {
                position,
                postal_code,
                shape,
                ..
            } = record;

            if postal_code.is_empty() {
                stats.empty_postal_code += 1;
                rejections.push(RejectionEvent::new(
                    RejectionKind::EmptyPostalCode,
                    postal_code,
                    position,
                ));
                continue;
            }

            let entry = match index.get(&postal_code) {
                Some(entry) => entry,
                None => {
                    stats.no_matching_attribute += 1;
                    rejections.push(RejectionEvent::new(
                        RejectionKind::NoMatchingAttribute,
                        postal_code,
                        position,
                    ));
                    continue;
                }
            };

            let region_code = if entry.region_code.is_empty() {
                stats.region_substituted += 1;
                warnings.push(ReconWarning {
                    kind: WarningKind::MissingRegion,
                    postal_code: postal_code.clone(),
                    position,
                });
                self.sentinel_region.clone()
            } else {
                entry.region_code.clone()
            };

            if !seen.insert(postal_code.clone()) {
                stats.duplicate_postal_codes += 1;
            }

            accepted.push(UnifiedZipRecord {
                postal_code,
                county_code: entry.county_code.clone(),
                region_code,
                city: entry.place_name.clone(),
                latitude: entry.latitude,
                longitude: entry.longitude,
                shape,
            });
        }

        stats.accepted = accepted.len();

        ReconciliationReport {
            accepted,
            rejections,
            warnings,
            stats,
            reconciled_at: Utc::now(),
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
