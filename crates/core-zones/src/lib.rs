//! Interaction zones: shape primitives, point-in-shape tests, and the
//! insertion-ordered zone registry used for hit-testing.
//!
//! Containment semantics are deliberately closed: a point on a circle's rim,
//! on a rectangle's edge, or on a polygon's boundary counts as inside. Zone
//! `enabled` gates hit-testing; `active` is a hover marker and does not.

use kurbo::Point;
use thiserror::Error;

use core_events::{InteractionKind, InteractionKindSet};

pub mod router;

pub use router::PointerRouter;

#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    #[error("circle radius must be positive and finite (got {0})")]
    InvalidRadius(f64),
    #[error("rectangle dimensions must be positive and finite (got {width}x{height})")]
    InvalidRect { width: f64, height: f64 },
    #[error("polygon needs at least 3 vertices (got {0})")]
    TooFewVertices(usize),
    #[error("zone id {0:?} already registered")]
    DuplicateZone(String),
}

const EDGE_EPSILON: f64 = 1e-9;

/// Shape of an interaction zone, validated at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneShape {
    Circle {
        center: Point,
        radius: f64,
    },
    Rect {
        origin: Point,
        width: f64,
        height: f64,
    },
    /// Vertex list in order. Self-intersecting polygons are accepted but
    /// their containment semantics are whatever ray casting yields.
    Polygon {
        points: Vec<Point>,
    },
}

impl ZoneShape {
    pub fn circle(center: Point, radius: f64) -> Result<Self, ZoneError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ZoneError::InvalidRadius(radius));
        }
        Ok(ZoneShape::Circle { center, radius })
    }

    pub fn rect(origin: Point, width: f64, height: f64) -> Result<Self, ZoneError> {
        if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
            return Err(ZoneError::InvalidRect { width, height });
        }
        Ok(ZoneShape::Rect {
            origin,
            width,
            height,
        })
    }

    pub fn polygon(points: Vec<Point>) -> Result<Self, ZoneError> {
        if points.len() < 3 {
            return Err(ZoneError::TooFewVertices(points.len()));
        }
        Ok(ZoneShape::Polygon { points })
    }

    /// Point-in-shape test with closed boundaries.
    pub fn contains(&self, point: Point) -> bool {
        match self {
            ZoneShape::Circle { center, radius } => point.distance(*center) <= *radius,
            ZoneShape::Rect {
                origin,
                width,
                height,
            } => {
                point.x >= origin.x
                    && point.x <= origin.x + width
                    && point.y >= origin.y
                    && point.y <= origin.y + height
            }
            ZoneShape::Polygon { points } => polygon_contains(points, point),
        }
    }
}

/// Ray casting with an explicit on-edge pass so boundary points are inside.
fn polygon_contains(points: &[Point], p: Point) -> bool {
    let n = points.len();
    for i in 0..n {
        let j = (i + n - 1) % n;
        if point_on_segment(p, points[j], points[i]) {
            return true;
        }
    }

    let mut inside = false;
    for i in 0..n {
        let j = (i + n - 1) % n;
        let (pi, pj) = (points[i], points[j]);
        let crosses = (pi.y > p.y) != (pj.y > p.y)
            && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
        if crosses {
            inside = !inside;
        }
    }
    inside
}

fn point_on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EDGE_EPSILON * (1.0 + a.distance(b)) {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

/// A hit-testable region of the pet, created at startup or dynamically.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionZone {
    pub id: String,
    pub shape: ZoneShape,
    pub supported: InteractionKindSet,
    pub enabled: bool,
    /// Hover marker toggled by the router; never gates hit-testing.
    pub active: bool,
}

impl InteractionZone {
    /// New enabled zone supporting every interaction kind.
    pub fn new(id: impl Into<String>, shape: ZoneShape) -> Self {
        Self {
            id: id.into(),
            shape,
            supported: InteractionKindSet::all(),
            enabled: true,
            active: false,
        }
    }

    pub fn with_supported(mut self, supported: InteractionKindSet) -> Self {
        self.supported = supported;
        self
    }

    pub fn supports(&self, kind: InteractionKind) -> bool {
        self.supported.supports(kind)
    }

    pub fn contains(&self, point: Point) -> bool {
        self.shape.contains(point)
    }

    /// Mark hovered. Returns whether the flag changed.
    pub fn activate(&mut self) -> bool {
        if !self.enabled || self.active {
            return false;
        }
        self.active = true;
        tracing::debug!(target: "zones", zone = %self.id, "zone activated");
        true
    }

    pub fn deactivate(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        tracing::debug!(target: "zones", zone = %self.id, "zone deactivated");
        true
    }

    pub fn enable(&mut self) -> bool {
        if self.enabled {
            return false;
        }
        self.enabled = true;
        true
    }

    /// Disabling also drops the hover marker.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        self.active = false;
        true
    }
}

/// Zone collection preserving insertion order for deterministic overlap
/// reporting. Zones are few, so lookups are linear.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: Vec<InteractionZone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, zone: InteractionZone) -> Result<(), ZoneError> {
        if self.zones.iter().any(|z| z.id == zone.id) {
            return Err(ZoneError::DuplicateZone(zone.id));
        }
        tracing::debug!(target: "zones", zone = %zone.id, "zone added");
        self.zones.push(zone);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.zones.len();
        self.zones.retain(|z| z.id != id);
        self.zones.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&InteractionZone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut InteractionZone> {
        self.zones.iter_mut().find(|z| z.id == id)
    }

    /// All enabled zones containing the point, in insertion order.
    pub fn zones_at(&self, point: Point) -> Vec<&InteractionZone> {
        self.zones
            .iter()
            .filter(|z| z.enabled && z.contains(point))
            .collect()
    }

    /// Ids of the enabled zones containing the point, in insertion order.
    pub fn zone_ids_at(&self, point: Point) -> Vec<String> {
        self.zones_at(point).iter().map(|z| z.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InteractionZone> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn shape_construction_validates_params() {
        assert_eq!(
            ZoneShape::circle(pt(0.0, 0.0), 0.0),
            Err(ZoneError::InvalidRadius(0.0))
        );
        assert_eq!(
            ZoneShape::circle(pt(0.0, 0.0), -3.0),
            Err(ZoneError::InvalidRadius(-3.0))
        );
        assert!(ZoneShape::rect(pt(0.0, 0.0), 10.0, 0.0).is_err());
        assert!(ZoneShape::rect(pt(0.0, 0.0), f64::NAN, 5.0).is_err());
        assert_eq!(
            ZoneShape::polygon(vec![pt(0.0, 0.0), pt(1.0, 0.0)]),
            Err(ZoneError::TooFewVertices(2))
        );
        assert!(ZoneShape::circle(pt(0.0, 0.0), 5.0).is_ok());
    }

    #[test]
    fn circle_containment_is_closed() {
        let circle = ZoneShape::circle(pt(100.0, 100.0), 50.0).unwrap();
        assert!(circle.contains(pt(100.0, 100.0)));
        assert!(circle.contains(pt(150.0, 100.0)), "rim point is inside");
        assert!(!circle.contains(pt(151.0, 100.0)));
    }

    #[test]
    fn rect_containment_is_closed_on_all_edges() {
        let rect = ZoneShape::rect(pt(10.0, 20.0), 30.0, 40.0).unwrap();
        assert!(rect.contains(pt(10.0, 20.0)));
        assert!(rect.contains(pt(40.0, 60.0)), "far corner is inside");
        assert!(rect.contains(pt(25.0, 40.0)));
        assert!(!rect.contains(pt(40.1, 40.0)));
        assert!(!rect.contains(pt(9.9, 20.0)));
    }

    #[test]
    fn polygon_containment_counts_edges_as_inside() {
        let tri = ZoneShape::polygon(vec![pt(0.0, 0.0), pt(10.0, 0.0), pt(5.0, 10.0)]).unwrap();
        assert!(tri.contains(pt(5.0, 3.0)));
        assert!(tri.contains(pt(5.0, 0.0)), "point on bottom edge");
        assert!(tri.contains(pt(0.0, 0.0)), "vertex");
        assert!(tri.contains(pt(2.5, 5.0)), "point on slanted edge");
        assert!(!tri.contains(pt(0.0, 5.0)));
        assert!(!tri.contains(pt(5.0, 10.1)));
    }

    #[test]
    fn concave_polygon_ray_casting() {
        // A "U" shape; the notch between the arms is outside.
        let u = ZoneShape::polygon(vec![
            pt(0.0, 0.0),
            pt(10.0, 0.0),
            pt(10.0, 10.0),
            pt(7.0, 10.0),
            pt(7.0, 3.0),
            pt(3.0, 3.0),
            pt(3.0, 10.0),
            pt(0.0, 10.0),
        ])
        .unwrap();
        assert!(u.contains(pt(1.5, 8.0)), "left arm");
        assert!(u.contains(pt(8.5, 8.0)), "right arm");
        assert!(u.contains(pt(5.0, 1.5)), "base");
        assert!(!u.contains(pt(5.0, 8.0)), "notch is outside");
    }

    #[test]
    fn registry_preserves_insertion_order_for_overlaps() {
        let mut registry = ZoneRegistry::new();
        registry
            .add(InteractionZone::new(
                "head",
                ZoneShape::circle(pt(50.0, 50.0), 30.0).unwrap(),
            ))
            .unwrap();
        registry
            .add(InteractionZone::new(
                "body",
                ZoneShape::rect(pt(0.0, 0.0), 100.0, 100.0).unwrap(),
            ))
            .unwrap();

        let hits = registry.zones_at(pt(50.0, 50.0));
        let ids: Vec<&str> = hits.iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, vec!["head", "body"]);
        for zone in hits {
            assert!(zone.enabled);
            assert!(zone.contains(pt(50.0, 50.0)));
        }
    }

    #[test]
    fn disabled_zones_do_not_hit() {
        let mut registry = ZoneRegistry::new();
        registry
            .add(InteractionZone::new(
                "head",
                ZoneShape::circle(pt(50.0, 50.0), 30.0).unwrap(),
            ))
            .unwrap();
        registry.get_mut("head").unwrap().disable();
        assert!(registry.zones_at(pt(50.0, 50.0)).is_empty());

        registry.get_mut("head").unwrap().enable();
        assert_eq!(registry.zones_at(pt(50.0, 50.0)).len(), 1);
    }

    #[test]
    fn duplicate_zone_ids_are_rejected() {
        let mut registry = ZoneRegistry::new();
        let shape = ZoneShape::circle(pt(0.0, 0.0), 1.0).unwrap();
        registry
            .add(InteractionZone::new("head", shape.clone()))
            .unwrap();
        assert_eq!(
            registry.add(InteractionZone::new("head", shape)),
            Err(ZoneError::DuplicateZone("head".to_string()))
        );
        assert!(registry.remove("head"));
        assert!(!registry.remove("head"));
    }

    #[test]
    fn activation_flags_do_not_gate_hit_testing() {
        let mut zone = InteractionZone::new(
            "head",
            ZoneShape::circle(pt(0.0, 0.0), 10.0).unwrap(),
        );
        assert!(zone.activate());
        assert!(!zone.activate(), "already active");
        assert!(zone.contains(pt(0.0, 0.0)));
        assert!(zone.deactivate());
        assert!(zone.contains(pt(0.0, 0.0)));

        assert!(zone.disable());
        assert!(!zone.activate(), "disabled zones cannot activate");
    }
}
