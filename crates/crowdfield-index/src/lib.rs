//! Region lookup abstractions for classifying agent positions.

use crowdfield_core::Vector2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by region index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., degenerate polygons).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("polygon {index} has {vertices} vertices; at least three are required")]
    DegeneratePolygon { index: usize, vertices: usize },
}

/// Common behaviour exposed by region lookups.
pub trait RegionLookup {
    /// Number of regions in the partition.
    fn region_count(&self) -> usize;

    /// Region containing `p`, if any.
    fn region_of(&self, p: Vector2) -> Option<usize>;
}

/// Simple polygon given by its vertices in order; the closing edge is implicit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Polygon {
    vertices: Vec<Vector2>,
}

impl Polygon {
    pub fn new(vertices: Vec<Vector2>) -> Result<Self, IndexError> {
        if vertices.len() < 3 {
            return Err(IndexError::DegeneratePolygon {
                index: 0,
                vertices: vertices.len(),
            });
        }
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::InvalidConfig("polygon vertices must be finite"));
        }
        Ok(Self { vertices })
    }

    /// Axis-aligned rectangle from two opposite corners.
    #[must_use]
    pub fn rectangle(min: Vector2, max: Vector2) -> Self {
        Self {
            vertices: vec![
                min,
                Vector2::new(max.x, min.y),
                max,
                Vector2::new(min.x, max.y),
            ],
        }
    }

    #[must_use]
    pub fn vertices(&self) -> &[Vector2] {
        &self.vertices
    }

    /// Crossing-number test with a half-open rule, so a point on an edge shared
    /// by two polygons of a partition lands in exactly one of them.
    #[must_use]
    pub fn contains(&self, p: Vector2) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Signed shoelace area; positive for counter-clockwise vertex order.
    #[must_use]
    pub fn signed_area(&self) -> f32 {
        let n = self.vertices.len();
        let twice: f32 = (0..n)
            .map(|i| self.vertices[i].det(self.vertices[(i + 1) % n]))
            .sum();
        twice * 0.5
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }
}

/// Ordered list of polygons searched front to back; the first hit wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolygonPartition {
    polygons: Vec<Polygon>,
}

impl PolygonPartition {
    pub fn new(polygons: Vec<Polygon>) -> Result<Self, IndexError> {
        if polygons.is_empty() {
            return Err(IndexError::InvalidConfig("partition needs at least one polygon"));
        }
        Ok(Self { polygons })
    }

    /// Build from raw vertex lists, reporting the offending polygon index.
    pub fn from_vertex_lists(lists: Vec<Vec<Vector2>>) -> Result<Self, IndexError> {
        let polygons = lists
            .into_iter()
            .enumerate()
            .map(|(index, vertices)| {
                Polygon::new(vertices).map_err(|err| match err {
                    IndexError::DegeneratePolygon { vertices, .. } => {
                        IndexError::DegeneratePolygon { index, vertices }
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(polygons)
    }

    #[must_use]
    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }
}

impl RegionLookup for PolygonPartition {
    fn region_count(&self) -> usize {
        self.polygons.len()
    }

    fn region_of(&self, p: Vector2) -> Option<usize> {
        self.polygons.iter().position(|polygon| polygon.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strips() -> PolygonPartition {
        PolygonPartition::new(vec![
            Polygon::rectangle(Vector2::new(0.0, 0.0), Vector2::new(1.0, 3.0)),
            Polygon::rectangle(Vector2::new(1.0, 0.0), Vector2::new(2.0, 3.0)),
            Polygon::rectangle(Vector2::new(2.0, 0.0), Vector2::new(3.0, 3.0)),
        ])
        .expect("partition")
    }

    #[test]
    fn rectangle_contains_interior() {
        let square = Polygon::rectangle(Vector2::new(0.0, 0.0), Vector2::new(2.0, 2.0));
        assert!(square.contains(Vector2::new(1.0, 1.0)));
        assert!(!square.contains(Vector2::new(2.5, 1.0)));
        assert!(!square.contains(Vector2::new(1.0, -0.1)));
        assert!((square.area() - 4.0).abs() < 1e-6);
        assert!(square.signed_area() > 0.0);
    }

    #[test]
    fn concave_polygon() {
        let l_shape = Polygon::new(vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 0.0),
            Vector2::new(2.0, 1.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(1.0, 2.0),
            Vector2::new(0.0, 2.0),
        ])
        .expect("polygon");
        assert!(l_shape.contains(Vector2::new(0.5, 1.5)));
        assert!(!l_shape.contains(Vector2::new(1.5, 1.5)));
        assert!((l_shape.area() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn shared_edges_belong_to_one_region() {
        let partition = strips();
        assert_eq!(partition.region_count(), 3);
        assert_eq!(partition.region_of(Vector2::new(0.5, 1.0)), Some(0));
        assert_eq!(partition.region_of(Vector2::new(1.0, 1.0)), Some(1));
        assert_eq!(partition.region_of(Vector2::new(2.5, 2.9)), Some(2));
        assert_eq!(partition.region_of(Vector2::new(4.0, 1.0)), None);
    }

    #[test]
    fn degenerate_polygons_are_rejected() {
        let err = PolygonPartition::from_vertex_lists(vec![
            vec![Vector2::zero(), Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)],
            vec![Vector2::zero(), Vector2::new(1.0, 0.0)],
        ])
        .expect_err("two vertices");
        assert_eq!(err, IndexError::DegeneratePolygon { index: 1, vertices: 2 });
        assert!(PolygonPartition::new(Vec::new()).is_err());
    }
}
