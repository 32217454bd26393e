// 🗺️ Geometry Table Loader - ZCTA boundary shapefile
// Attribute rows + polygon shapes, in dataset order.
//
// Shapes are converted once, at load time, into GeoJSON coordinate
// structures. Nothing downstream needs to know about shapefiles.

use crate::events::{RejectionEvent, RejectionKind};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shapefile::dbase::{self, FieldValue};
use shapefile::{PolygonRing, Shape};
use std::path::Path;

/// `[longitude, latitude]`
pub type Position = [f64; 2];

/// A closed ring; first position equals the last.
pub type Ring = Vec<Position>;

// dbase exposes the record deletion marker as a pseudo-field on some versions
const DELETION_FLAG_FIELD: &str = "DeletionFlag";

// ============================================================================
// GEOMETRY
// ============================================================================

/// The subset of GeoJSON geometry objects this dataset produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Geometry::Point([longitude, latitude])
    }

    /// Every polygon of the geometry, as exterior-then-holes ring lists
    pub fn polygons(&self) -> Vec<&[Ring]> {
        match self {
            Geometry::Point(_) => Vec::new(),
            Geometry::Polygon(rings) => vec![rings.as_slice()],
            Geometry::MultiPolygon(polys) => polys.iter().map(|p| p.as_slice()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingRole {
    Outer,
    Inner,
}

/// Group rings into polygons and wind them per RFC 7946.
///
/// Each outer ring starts a polygon. A hole joins the smallest outer ring
/// whose bounds cover the hole's bounds and which contains a point strictly
/// inside the hole. A hole no outer ring claims becomes a polygon of its own.
/// Returns `None` when there are no rings.
pub fn organize_rings(rings: Vec<(RingRole, Ring)>) -> Option<Geometry> {
    let mut exteriors: Vec<Ring> = Vec::new();
    let mut holes: Vec<Ring> = Vec::new();

    for (role, ring) in rings {
        if ring.is_empty() {
            continue;
        }
        match role {
            RingRole::Outer => exteriors.push(wind(ring, true)),
            RingRole::Inner => holes.push(wind(ring, false)),
        }
    }

    let mut polygons: Vec<Vec<Ring>> = exteriors.into_iter().map(|ext| vec![ext]).collect();
    let outer_count = polygons.len();
    let mut orphans: Vec<Ring> = Vec::new();

    for hole in holes {
        let sample = interior_point(&hole);
        let bounds = bounding_box(&hole);
        let owner = polygons[..outer_count]
            .iter()
            .enumerate()
            .filter(|(_, poly)| box_covers(bounding_box(&poly[0]), bounds))
            .filter(|(_, poly)| ring_contains(&poly[0], sample))
            .min_by(|(_, a), (_, b)| {
                signed_area(&a[0])
                    .abs()
                    .total_cmp(&signed_area(&b[0]).abs())
            })
            .map(|(i, _)| i);

        match owner {
            Some(i) => polygons[i].push(hole),
            None => orphans.push(hole),
        }
    }

    polygons.extend(orphans.into_iter().map(|ring| vec![wind(ring, true)]));

    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(polygons)),
    }
}

/// Shoelace sum; positive when counter-clockwise.
pub fn signed_area(ring: &[Position]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let [x1, y1] = ring[i];
        let [x2, y2] = ring[(i + 1) % ring.len()];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

fn wind(mut ring: Ring, counter_clockwise: bool) -> Ring {
    let area = signed_area(&ring);
    if area != 0.0 && (area > 0.0) != counter_clockwise {
        ring.reverse();
    }
    ring
}

/// Even-odd ray cast.
fn ring_contains(ring: &[Position], point: Position) -> bool {
    let [px, py] = point;
    let mut inside = false;
    let mut j = ring.len().saturating_sub(1);
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A point strictly inside the ring: the first vertex-triple centroid that
/// lands inside, else the first vertex.
fn interior_point(ring: &[Position]) -> Position {
    ring.windows(3)
        .map(|w| {
            [
                (w[0][0] + w[1][0] + w[2][0]) / 3.0,
                (w[0][1] + w[1][1] + w[2][1]) / 3.0,
            ]
        })
        .find(|&c| ring_contains(ring, c))
        .unwrap_or(ring[0])
}

type BoundingBox = (Position, Position);

fn bounding_box(ring: &[Position]) -> BoundingBox {
    ring.iter().fold(
        ([f64::INFINITY, f64::INFINITY], [f64::NEG_INFINITY, f64::NEG_INFINITY]),
        |(min, max), &[x, y]| ([min[0].min(x), min[1].min(y)], [max[0].max(x), max[1].max(y)]),
    )
}

fn box_covers(outer: BoundingBox, inner: BoundingBox) -> bool {
    outer.0[0] <= inner.0[0]
        && outer.0[1] <= inner.0[1]
        && outer.1[0] >= inner.1[0]
        && outer.1[1] >= inner.1[1]
}

fn rings_of<P, F>(rings: &[PolygonRing<P>], xy: F) -> Vec<(RingRole, Ring)>
where
    F: Fn(&P) -> Position,
{
    rings
        .iter()
        .map(|ring| match ring {
            PolygonRing::Outer(points) => (RingRole::Outer, points.iter().map(&xy).collect()),
            PolygonRing::Inner(points) => (RingRole::Inner, points.iter().map(&xy).collect()),
        })
        .collect()
}

/// Convert a shapefile shape. Anything but a non-empty polygon is `Err`
/// with the shape type name.
pub fn geometry_from_shape(shape: &Shape) -> Result<Geometry, String> {
    let rings = match shape {
        Shape::Polygon(p) => rings_of(p.rings(), |pt| [pt.x, pt.y]),
        Shape::PolygonM(p) => rings_of(p.rings(), |pt| [pt.x, pt.y]),
        Shape::PolygonZ(p) => rings_of(p.rings(), |pt| [pt.x, pt.y]),
        other => return Err(format!("{:?}", other.shapetype())),
    };
    organize_rings(rings).ok_or_else(|| "empty polygon".to_string())
}

// ============================================================================
// GEOMETRY RECORDS
// ============================================================================

/// One row of the boundary dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    /// Row position in the dataset
    pub position: usize,
    pub postal_code: String,
    /// Raw attribute row, in `.dbf` field order
    pub fields: Vec<String>,
    pub shape: Geometry,
}

impl GeometryRecord {
    pub fn new(position: usize, fields: Vec<String>, shape: Geometry, postal_code_column: usize) -> Self {
        let postal_code = postal_code_at(&fields, postal_code_column);
        GeometryRecord {
            position,
            postal_code,
            fields,
            shape,
        }
    }
}

fn postal_code_at(fields: &[String], column: usize) -> String {
    fields
        .get(column)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Output of the geometry loader.
#[derive(Debug, Default)]
pub struct GeometryTable {
    pub field_names: Vec<String>,
    pub records: Vec<GeometryRecord>,
    /// Rows whose shape could not be used
    pub rejections: Vec<RejectionEvent>,
}

impl GeometryTable {
    pub fn new(field_names: Vec<String>) -> Self {
        GeometryTable {
            field_names,
            ..Default::default()
        }
    }

    /// Add one raw row, converting its shape.
    pub fn push_row(&mut self, fields: Vec<String>, shape: &Shape, postal_code_column: usize) {
        let position = self.records.len() + self.rejections.len();
        match geometry_from_shape(shape) {
            Ok(geometry) => self
                .records
                .push(GeometryRecord::new(position, fields, geometry, postal_code_column)),
            Err(shape_type) => {
                let postal_code = postal_code_at(&fields, postal_code_column);
                self.rejections.push(
                    RejectionEvent::new(RejectionKind::UnsupportedGeometry, postal_code, position)
                        .with_detail(shape_type),
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn field_text(value: Option<&FieldValue>) -> String {
    match value {
        Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
        Some(FieldValue::Numeric(Some(n))) => {
            if n.fract() == 0.0 {
                format!("{:.0}", n)
            } else {
                n.to_string()
            }
        }
        Some(FieldValue::Integer(i)) => i.to_string(),
        Some(FieldValue::Double(d)) => d.to_string(),
        _ => String::new(),
    }
}

/// Read a shapefile (and its sibling `.dbf`) in dataset order.
///
/// `postal_code_column` indexes the attribute row in `.dbf` field order.
pub fn load_geometries(path: &Path, postal_code_column: usize) -> Result<GeometryTable> {
    let dbf_path = path.with_extension("dbf");
    let field_names: Vec<String> = {
        let table = dbase::Reader::from_path(&dbf_path)
            .with_context(|| format!("Failed to open attribute table: {}", dbf_path.display()))?;
        table
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .filter(|name| name != DELETION_FLAG_FIELD)
            .collect()
    };

    if postal_code_column >= field_names.len() {
        bail!(
            "postal code column {} is out of range: {} has {} fields ({})",
            postal_code_column,
            dbf_path.display(),
            field_names.len(),
            field_names.join(", ")
        );
    }

    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut table = GeometryTable::new(field_names);

    for (row, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result
            .with_context(|| format!("Failed to read row {} of {}", row, path.display()))?;
        let fields: Vec<String> = table
            .field_names
            .iter()
            .map(|name| field_text(record.get(name)))
            .collect();
        table.push_row(fields, &shape, postal_code_column);
    }

    Ok(table)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use shapefile::dbase::{Record, TableWriterBuilder};
    use shapefile::{Point, Polygon};
    use tempfile::TempDir;

    fn square(x0: f64, y0: f64, size: f64) -> Ring {
        // clockwise, as shapefiles store exteriors
        vec![
            [x0, y0],
            [x0, y0 + size],
            [x0 + size, y0 + size],
            [x0 + size, y0],
            [x0, y0],
        ]
    }

    fn counter_clockwise(ring: &[Position]) -> bool {
        signed_area(ring) > 0.0
    }

    #[test]
    fn test_single_outer_ring_is_polygon() {
        let geometry = organize_rings(vec![(RingRole::Outer, square(0.0, 0.0, 1.0))]).unwrap();

        match geometry {
            Geometry::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert!(counter_clockwise(&rings[0]));
                assert_eq!(rings[0].first(), rings[0].last());
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_hole_joins_containing_exterior() {
        let mut hole = square(11.0, 11.0, 1.0);
        hole.reverse();

        let geometry = organize_rings(vec![
            (RingRole::Outer, square(0.0, 0.0, 5.0)),
            (RingRole::Outer, square(10.0, 10.0, 5.0)),
            (RingRole::Inner, hole),
        ])
        .unwrap();

        match geometry {
            Geometry::MultiPolygon(polys) => {
                assert_eq!(polys.len(), 2);
                assert_eq!(polys[0].len(), 1);
                assert_eq!(polys[1].len(), 2);
                assert!(counter_clockwise(&polys[1][0]));
                assert!(!counter_clockwise(&polys[1][1]));
            }
            other => panic!("expected multipolygon, got {:?}", other),
        }
    }

    #[test]
    fn test_hole_touching_exterior_edge_stays_with_it() {
        // first vertex sits on the right edge of the first square
        let hole = vec![[5.0, 2.0], [4.0, 2.0], [4.0, 3.0], [5.0, 2.0]];

        let geometry = organize_rings(vec![
            (RingRole::Outer, square(0.0, 0.0, 5.0)),
            (RingRole::Outer, square(10.0, 10.0, 5.0)),
            (RingRole::Inner, hole),
        ])
        .unwrap();

        let polys = geometry.polygons();
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].len(), 2);
        assert_eq!(polys[1].len(), 1);
    }

    #[test]
    fn test_nested_island_keeps_its_own_hole() {
        // land / lake / island / pond
        let mut lake = square(10.0, 10.0, 80.0);
        lake.reverse();
        let mut pond = square(40.0, 40.0, 20.0);
        pond.reverse();

        let geometry = organize_rings(vec![
            (RingRole::Outer, square(0.0, 0.0, 100.0)),
            (RingRole::Inner, lake),
            (RingRole::Outer, square(20.0, 20.0, 60.0)),
            (RingRole::Inner, pond),
        ])
        .unwrap();

        let polys = geometry.polygons();
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].len(), 2);
        assert_eq!(polys[1].len(), 2);
        assert_eq!(bounding_box(&polys[0][1]), ([10.0, 10.0], [90.0, 90.0]));
        assert_eq!(bounding_box(&polys[1][1]), ([40.0, 40.0], [60.0, 60.0]));
        assert!(!counter_clockwise(&polys[1][1]));
    }

    #[test]
    fn test_orphan_hole_becomes_exterior() {
        let geometry = organize_rings(vec![(RingRole::Inner, square(0.0, 0.0, 1.0))]).unwrap();
        match geometry {
            Geometry::Polygon(rings) => assert!(counter_clockwise(&rings[0])),
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_no_rings() {
        assert!(organize_rings(Vec::new()).is_none());
    }

    #[test]
    fn test_geometry_json_shape() {
        let point = Geometry::point(-118.4065, 34.0901);
        assert_eq!(
            serde_json::to_string(&point).unwrap(),
            r#"{"type":"Point","coordinates":[-118.4065,34.0901]}"#
        );

        let polygon = organize_rings(vec![(RingRole::Outer, square(0.0, 0.0, 1.0))]).unwrap();
        let json = serde_json::to_value(&polygon).unwrap();
        assert_eq!(json["type"], "Polygon");
        assert_eq!(json["coordinates"][0].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_polygon_json_parses_back() {
        let polygon = organize_rings(vec![
            (RingRole::Outer, square(-71.1, 42.3, 0.05)),
            (RingRole::Outer, square(-71.0, 42.4, 0.01)),
        ])
        .unwrap();

        let text = serde_json::to_string(&polygon).unwrap();
        let parsed: Geometry = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, polygon);
    }

    #[test]
    fn test_shapefile_polygon_conversion() {
        let ring: Vec<Point> = square(0.0, 0.0, 2.0)
            .into_iter()
            .map(|[x, y]| Point::new(x, y))
            .collect();
        let shape = Shape::Polygon(Polygon::with_rings(vec![PolygonRing::Outer(ring)]));

        let geometry = geometry_from_shape(&shape).unwrap();
        assert_eq!(geometry.polygons().len(), 1);
        assert!(counter_clockwise(&geometry.polygons()[0][0]));
    }

    #[test]
    fn test_null_shape_rejected_by_table() {
        let mut table = GeometryTable::new(vec!["ZCTA5CE10".into(), "AFFGEOID10".into(), "GEOID10".into()]);
        table.push_row(
            vec!["90210".into(), "8600000US90210".into(), "90210".into()],
            &Shape::NullShape,
            2,
        );

        assert!(table.is_empty());
        assert_eq!(table.rejections.len(), 1);
        assert_eq!(table.rejections[0].kind, RejectionKind::UnsupportedGeometry);
        assert_eq!(table.rejections[0].postal_code, "90210");
    }

    #[test]
    fn test_rejected_postal_code_is_trimmed() {
        let mut table = GeometryTable::new(vec!["ZCTA5CE10".into(), "AFFGEOID10".into(), "GEOID10".into()]);
        let point = Shape::Point(Point::new(-118.4, 34.1));
        table.push_row(
            vec!["90210".into(), "8600000US90210".into(), " 90210 ".into()],
            &point,
            2,
        );

        assert_eq!(table.rejections.len(), 1);
        assert_eq!(table.rejections[0].postal_code, "90210");
        assert_eq!(table.rejections[0].detail.as_deref(), Some("Point"));
    }

    #[test]
    fn test_postal_code_read_from_configured_column() {
        let record = GeometryRecord::new(
            0,
            vec!["ignored".into(), "8600000US02134".into(), "02134".into()],
            Geometry::point(0.0, 0.0),
            2,
        );
        assert_eq!(record.postal_code, "02134");

        let short = GeometryRecord::new(1, vec!["x".into()], Geometry::point(0.0, 0.0), 2);
        assert_eq!(short.postal_code, "");
    }

    #[test]
    fn test_load_geometries_missing_file() {
        let err = load_geometries(Path::new("/nonexistent/zcta.shp"), 2).unwrap_err();
        assert!(format!("{:#}", err).contains("zcta.dbf"));
    }

    const ZCTA_FIELDS: [&str; 3] = ["ZCTA5CE10", "AFFGEOID10", "GEOID10"];

    fn zcta_table() -> TableWriterBuilder {
        TableWriterBuilder::new()
            .add_character_field(ZCTA_FIELDS[0].try_into().unwrap(), 5)
            .add_character_field(ZCTA_FIELDS[1].try_into().unwrap(), 14)
            .add_character_field(ZCTA_FIELDS[2].try_into().unwrap(), 5)
    }

    fn zcta_record(code: &str) -> Record {
        let mut record = Record::default();
        let values = [code.to_string(), format!("8600000US{}", code), code.to_string()];
        for (name, value) in ZCTA_FIELDS.iter().zip(values) {
            record.insert(name.to_string(), FieldValue::Character(Some(value)));
        }
        record
    }

    /// `.shp` holding a single null shape under a Polygon file header.
    fn null_shape_file() -> Vec<u8> {
        let mut bytes = vec![0u8; 100];
        bytes[0..4].copy_from_slice(&9994i32.to_be_bytes());
        bytes[24..28].copy_from_slice(&56i32.to_be_bytes());
        bytes[28..32].copy_from_slice(&1000i32.to_le_bytes());
        bytes[32..36].copy_from_slice(&5i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&2i32.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_load_geometries_reads_shapefile_from_disk() {
        let dir = TempDir::new().unwrap();
        let shp = dir.path().join("zcta.shp");

        let ring: Vec<Point> = square(-118.42, 34.08, 0.01)
            .into_iter()
            .map(|[x, y]| Point::new(x, y))
            .collect();
        let mut writer = shapefile::Writer::from_path(&shp, zcta_table()).unwrap();
        writer
            .write_shape_and_record(&Polygon::new(PolygonRing::Outer(ring)), &zcta_record("90210"))
            .unwrap();
        drop(writer);

        let table = load_geometries(&shp, crate::config::GEOMETRY_POSTAL_CODE_COLUMN).unwrap();

        assert_eq!(table.field_names, ZCTA_FIELDS);
        assert!(!table.field_names.iter().any(|n| n == DELETION_FLAG_FIELD));
        assert_eq!(table.len(), 1);
        assert!(table.rejections.is_empty());

        let record = &table.records[0];
        assert_eq!(record.position, 0);
        assert_eq!(record.postal_code, "90210");
        assert!(record.fields[1].starts_with("8600000US"));
        assert!(counter_clockwise(&record.shape.polygons()[0][0]));
    }

    #[test]
    fn test_load_geometries_rejects_null_shape_from_disk() {
        let dir = TempDir::new().unwrap();
        let shp = dir.path().join("zcta.shp");
        std::fs::write(&shp, null_shape_file()).unwrap();

        let mut dbf = zcta_table().build_with_file_dest(shp.with_extension("dbf")).unwrap();
        dbf.write_record(&zcta_record("90210")).unwrap();
        drop(dbf);

        let table = load_geometries(&shp, crate::config::GEOMETRY_POSTAL_CODE_COLUMN).unwrap();

        assert!(table.is_empty());
        assert_eq!(table.rejections.len(), 1);
        assert_eq!(table.rejections[0].kind, RejectionKind::UnsupportedGeometry);
        assert_eq!(table.rejections[0].postal_code, "90210");
        assert_eq!(table.rejections[0].position, 0);
    }
}
