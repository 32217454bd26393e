// 📋 Per-record events
// Rejections drop a record, warnings annotate a record that is kept.
// The core only collects these; the caller decides to log, count or persist.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Geometry postal code not present in the attribute index
    NoMatchingAttribute,
    /// Geometry row carries an empty postal code
    EmptyPostalCode,
    /// Null or non-polygon shape in the boundary dataset
    UnsupportedGeometry,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingAttribute => write!(f, "no_matching_attribute"),
            Self::EmptyPostalCode => write!(f, "empty_postal_code"),
            Self::UnsupportedGeometry => write!(f, "unsupported_geometry"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionEvent {
    pub kind: RejectionKind,
    pub postal_code: String,
    /// Row position in the geometry dataset
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RejectionEvent {
    pub fn new(kind: RejectionKind, postal_code: impl Into<String>, position: usize) -> Self {
        RejectionEvent {
            kind,
            postal_code: postal_code.into(),
            position,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for RejectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event=record_rejected kind={} postal_code={:?} position={}",
            self.kind, self.postal_code, self.position
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " detail={:?}", detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Attribute entry had no region; the sentinel was substituted
    MissingRegion,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRegion => write!(f, "missing_region"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconWarning {
    pub kind: WarningKind,
    pub postal_code: String,
    pub position: usize,
}

impl fmt::Display for ReconWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event=record_corrected kind={} postal_code={:?} position={}",
            self.kind, self.postal_code, self.position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        let event = RejectionEvent::new(RejectionKind::NoMatchingAttribute, "00000", 7);
        assert_eq!(
            event.to_string(),
            "event=record_rejected kind=no_matching_attribute postal_code=\"00000\" position=7"
        );

        let event = event.with_detail("NullShape");
        assert!(event.to_string().ends_with("detail=\"NullShape\""));
    }

    #[test]
    fn test_rejection_serializes_snake_case() {
        let event = RejectionEvent::new(RejectionKind::EmptyPostalCode, "", 0);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"kind":"empty_postal_code","postal_code":"","position":0}"#);
    }
}
