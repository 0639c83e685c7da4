//! Region-of-interest polygons
//!
//! A ROI is a simple closed polygon in frame coordinates. Construction is the
//! only place validity is checked; a `Roi` value is always usable.

use crate::error::VisionError;
use drivethru_core::{BoundingBox, Point};
use serde::Serialize;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Roi {
    points: Vec<Point>,
}

impl Roi {
    /// Validate and build a polygon.
    ///
    /// A trailing point equal to the first is treated as an explicit close and
    /// dropped, as are consecutive repeats. Rejects fewer than three vertices,
    /// non-finite coordinates, zero area and self-intersection.
    pub fn new(points: impl IntoIterator<Item = Point>) -> Result<Self, VisionError> {
        let mut vertices: Vec<Point> = Vec::new();
        for point in points {
            if !point.x.is_finite() || !point.y.is_finite() {
                return Err(VisionError::InvalidRoi(format!(
                    "non-finite vertex ({}, {})",
                    point.x, point.y
                )));
            }
            if vertices.last().map_or(true, |last| !same_point(*last, point)) {
                vertices.push(point);
            }
        }

        while vertices.len() > 1 && same_point(vertices[0], vertices[vertices.len() - 1]) {
            vertices.pop();
        }

        if vertices.len() < 3 {
            return Err(VisionError::InvalidRoi(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }

        if signed_area(&vertices).abs() < EPSILON {
            return Err(VisionError::InvalidRoi("polygon has zero area".to_string()));
        }

        let n = vertices.len();
        for i in 0..n {
            let (a1, a2) = (vertices[i], vertices[(i + 1) % n]);
            for j in (i + 1)..n {
                // Adjacent edges share a vertex by construction
                if j == i + 1 || (i == 0 && j == n - 1) {
                    continue;
                }
                let (b1, b2) = (vertices[j], vertices[(j + 1) % n]);
                if segments_intersect(a1, a2, b1, b2) {
                    return Err(VisionError::InvalidRoi(format!(
                        "edges {} and {} intersect",
                        i, j
                    )));
                }
            }
        }

        Ok(Self { points: vertices })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.points).abs()
    }

    /// Point-in-polygon by ray casting. Points on the boundary count as inside.
    pub fn contains(&self, point: Point) -> bool {
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (pi, pj) = (self.points[i], self.points[j]);
            if on_segment(pj, pi, point) {
                return true;
            }
            if (pi.y > point.y) != (pj.y > point.y) {
                let x_cross = pj.x + (point.y - pj.y) * (pi.x - pj.x) / (pi.y - pj.y);
                if point.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// True if the box and the polygon share any point
    pub fn intersects_box(&self, bbox: &BoundingBox) -> bool {
        let corners = bbox.corners();

        if corners.iter().any(|c| self.contains(*c)) {
            return true;
        }

        if self.points.iter().any(|p| bbox.contains(*p)) {
            return true;
        }

        let n = self.points.len();
        for i in 0..n {
            let (a1, a2) = (self.points[i], self.points[(i + 1) % n]);
            for k in 0..4 {
                if segments_intersect(a1, a2, corners[k], corners[(k + 1) % 4]) {
                    return true;
                }
            }
        }

        false
    }

    /// Rescale every vertex, e.g. from display canvas to frame coordinates
    pub fn scaled(&self, sx: f64, sy: f64) -> Result<Self, VisionError> {
        if !(sx.is_finite() && sy.is_finite()) || sx <= 0.0 || sy <= 0.0 {
            return Err(VisionError::InvalidRoi(format!(
                "scale factors must be positive, got ({}, {})",
                sx, sy
            )));
        }
        Ok(Self {
            points: self
                .points
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
        })
    }
}

fn same_point(a: Point, b: Point) -> bool {
    (a.x - b.x).abs() < EPSILON && (a.y - b.y).abs() < EPSILON
}

fn signed_area(points: &[Point]) -> f64 {
    let n = points.len();
    let mut sum = 0.0;
    for i in 0..n {
        let (p, q) = (points[i], points[(i + 1) % n]);
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn orientation(o: Point, a: Point, b: Point) -> i8 {
    let c = cross(o, a, b);
    if c > EPSILON {
        1
    } else if c < -EPSILON {
        -1
    } else {
        0
    }
}

/// `p` lies on the closed segment `a`-`b`
fn on_segment(a: Point, b: Point, p: Point) -> bool {
    orientation(a, b, p) == 0
        && p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

/// Closed segments `p1`-`p2` and `q1`-`q2` touch or cross
fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if d1 != d2 && d3 != d4 && d1 != 0 && d2 != 0 && d3 != 0 && d4 != 0 {
        return true;
    }

    (d1 == 0 && on_segment(q1, q2, p1))
        || (d2 == 0 && on_segment(q1, q2, p2))
        || (d3 == 0 && on_segment(p1, p2, q1))
        || (d4 == 0 && on_segment(p1, p2, q2))
}
