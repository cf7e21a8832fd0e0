//! Planar containment tests and bounding boxes for `GeoJSON` geometry.
//!
//! Works directly on the `geojson` crate's position arrays in the
//! dataset's native coordinate system (RD New planar meters). The
//! containment test is even-odd ray casting with an epsilon-stabilized
//! intersection, good enough for map-click lookups, not exact
//! computational geometry.

use geojson::{PolygonType, Value};

/// Stabilizes the intersection denominator for near-horizontal segments
/// instead of branching on exact zero. Side effect: point-on-boundary
/// behavior is implementation-defined (but deterministic).
const EPSILON: f64 = 1e-9;

/// Axis-aligned bounding box in dataset coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    /// Box area, clamped to zero for degenerate boxes.
    #[must_use]
    pub fn area(&self) -> f64 {
        ((self.maxx - self.minx) * (self.maxy - self.miny)).max(0.0)
    }
}

/// Reads the x/y pair from a `GeoJSON` position, ignoring any further
/// dimensions. Positions with fewer than two elements yield `None`.
fn xy(position: &[f64]) -> Option<(f64, f64)> {
    match position {
        [x, y, ..] => Some((*x, *y)),
        _ => None,
    }
}

/// Even-odd ray-casting containment test against a single ring.
///
/// Rings with fewer than 3 positions contain nothing. Malformed
/// positions (fewer than two elements) are skipped. The test is a pure
/// function of its inputs, so boundary behavior is deterministic across
/// repeated calls.
#[must_use]
pub fn ring_contains(px: f64, py: f64, ring: &[Vec<f64>]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    for i in 0..n {
        let Some((x1, y1)) = ring.get(i).and_then(|p| xy(p)) else {
            continue;
        };
        let Some((x2, y2)) = ring.get((i + 1) % n).and_then(|p| xy(p)) else {
            continue;
        };
        if (y1 > py) != (y2 > py) {
            let x_intersect = (x2 - x1) * (py - y1) / (y2 - y1 + EPSILON) + x1;
            if px < x_intersect {
                inside = !inside;
            }
        }
    }
    inside
}

/// Containment within a polygon: inside the outer ring (ring 0) and
/// inside none of the hole rings (rings 1..n).
#[must_use]
pub fn polygon_contains(px: f64, py: f64, rings: &PolygonType) -> bool {
    let Some(outer) = rings.first() else {
        return false;
    };
    if !ring_contains(px, py, outer) {
        return false;
    }
    for hole in rings.iter().skip(1) {
        if ring_contains(px, py, hole) {
            return false;
        }
    }
    true
}

/// Containment within any constituent polygon; first match wins.
#[must_use]
pub fn multi_polygon_contains(px: f64, py: f64, polygons: &[PolygonType]) -> bool {
    polygons.iter().any(|rings| polygon_contains(px, py, rings))
}

/// Containment dispatch on the geometry's explicit `type` tag.
/// Non-areal geometry types contain nothing.
#[must_use]
pub fn value_contains(px: f64, py: f64, value: &Value) -> bool {
    match value {
        Value::Polygon(rings) => polygon_contains(px, py, rings),
        Value::MultiPolygon(polygons) => multi_polygon_contains(px, py, polygons),
        _ => false,
    }
}

/// Computes the bounding box of a Polygon or `MultiPolygon` by walking
/// every ring. Returns `None` for other geometry types and for
/// geometries in which no valid position was found.
#[must_use]
pub fn bbox_of(value: &Value) -> Option<BBox> {
    let mut bbox = BBox {
        minx: f64::INFINITY,
        miny: f64::INFINITY,
        maxx: f64::NEG_INFINITY,
        maxy: f64::NEG_INFINITY,
    };
    let mut accumulate = |ring: &[Vec<f64>]| {
        for position in ring {
            if let Some((x, y)) = xy(position) {
                bbox.minx = bbox.minx.min(x);
                bbox.miny = bbox.miny.min(y);
                bbox.maxx = bbox.maxx.max(x);
                bbox.maxy = bbox.maxy.max(y);
            }
        }
    };
    match value {
        Value::Polygon(rings) => {
            for ring in rings {
                accumulate(ring);
            }
        }
        Value::MultiPolygon(polygons) => {
            for rings in polygons {
                for ring in rings {
                    accumulate(ring);
                }
            }
        }
        _ => return None,
    }
    if bbox.minx.is_finite() { Some(bbox) } else { None }
}
