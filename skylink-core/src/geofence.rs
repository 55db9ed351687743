//! Geofence: even-odd ray casting against the restricted zone set.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Added to each edge's vertical span so horizontal edges never divide by zero.
const EDGE_EPSILON: f64 = 1e-7;

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject non-finite coordinates and anything outside `[-90, 90]` x `[-180, 180]`.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(GeometryError::InvalidPoint(*self))
        }
    }

    fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Closed ring of vertices. The edge from the last vertex back to the first is implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<GeoPoint>,
}

impl Polygon {
    /// Build a polygon. Rings with fewer than 3 vertices are accepted but never match.
    pub fn new(vertices: Vec<GeoPoint>) -> Result<Self, GeometryError> {
        if let Some(index) = vertices.iter().position(|v| !v.is_valid()) {
            return Err(GeometryError::InvalidVertex {
                index,
                vertex: vertices[index],
            });
        }
        Ok(Self { vertices })
    }

    /// Build from `(latitude, longitude)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self, GeometryError> {
        Self::new(pairs.iter().map(|&(lat, lon)| GeoPoint::new(lat, lon)).collect())
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    /// Even-odd test: a horizontal ray from the point toggles `inside` at each edge it crosses.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let vs = &self.vertices;
        if vs.len() < 3 {
            return false;
        }
        let (x, y) = (point.longitude, point.latitude);
        let mut inside = false;
        let mut j = vs.len() - 1;
        for i in 0..vs.len() {
            let (xi, yi) = (vs[i].longitude, vs[i].latitude);
            let (xj, yj) = (vs[j].longitude, vs[j].latitude);
            let crosses =
                (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi + EDGE_EPSILON) + xi;
            if crosses {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Restricted zones. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneSet {
    polygons: Vec<Polygon>,
}

impl ZoneSet {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    /// Build from rings of `[latitude, longitude]` pairs, as they appear in configuration.
    pub fn from_rings(rings: &[Vec<[f64; 2]>]) -> Result<Self, GeometryError> {
        let polygons = rings
            .iter()
            .map(|ring| {
                Polygon::new(
                    ring.iter()
                        .map(|&[lat, lon]| GeoPoint::new(lat, lon))
                        .collect(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let degenerate = polygons.iter().filter(|p| p.vertices().len() < 3).count();
        if degenerate > 0 {
            tracing::warn!(degenerate, "zone set contains rings with fewer than 3 vertices");
        }
        Ok(Self::new(polygons))
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    /// True iff the point lies inside any zone.
    pub fn is_restricted(&self, point: &GeoPoint) -> bool {
        self.polygons.iter().any(|p| p.contains(point))
    }
}

const POK: &[(f64, f64)] = &[
    (33.90, 73.50),
    (34.50, 73.80),
    (35.05, 74.50),
    (34.80, 75.20),
    (34.40, 75.30),
    (33.80, 74.90),
    (33.50, 74.30),
];

const AKSAI_CHIN: &[(f64, f64)] = &[
    (35.50, 78.10),
    (36.10, 78.50),
    (36.50, 79.00),
    (36.20, 79.50),
    (35.80, 79.20),
    (35.60, 78.80),
];

/// Built-in restricted zones, shared process-wide.
pub fn default_zones() -> &'static ZoneSet {
    static ZONES: OnceLock<ZoneSet> = OnceLock::new();
    ZONES.get_or_init(|| {
        let polygons = [POK, AKSAI_CHIN]
            .iter()
            .filter_map(|ring| Polygon::from_pairs(ring).ok())
            .collect();
        ZoneSet::new(polygons)
    })
}

/// Malformed zone configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("vertex {index} out of range or not finite: ({}, {})", .vertex.latitude, .vertex.longitude)]
    InvalidVertex { index: usize, vertex: GeoPoint },
    #[error("position out of range or not finite: ({}, {})", .0.latitude, .0.longitude)]
    InvalidPoint(GeoPoint),
}
