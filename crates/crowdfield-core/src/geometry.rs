//! Planar and spatial vector primitives plus oriented line segments.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

const NORMALIZE_EPSILON: f32 = 1e-12;

/// Two-dimensional world-space vector (metres, metres per second, …).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Unit vector pointing along `angle` (radians, counter-clockwise from +x).
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos, sin)
    }

    #[inline]
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    #[inline]
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    #[inline]
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    #[inline]
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// 2-D determinant (z component of the 3-D cross product).
    #[inline]
    #[must_use]
    pub fn det(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    /// Unit vector in the same direction, or `None` when the length vanishes.
    #[must_use]
    pub fn try_normalize(self) -> Option<Self> {
        let len_sq = self.length_squared();
        if len_sq > NORMALIZE_EPSILON && len_sq.is_finite() {
            Some(self / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Unit vector in the same direction, or the zero vector for degenerate input.
    #[must_use]
    pub fn normalize_or_zero(self) -> Self {
        self.try_normalize().unwrap_or_default()
    }

    /// Heading of the vector in `(-π, π]`.
    #[inline]
    #[must_use]
    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    /// Left-hand perpendicular `(-y, x)`.
    #[inline]
    #[must_use]
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Component-wise product.
    #[inline]
    #[must_use]
    pub fn mul_elem(self, other: Self) -> Self {
        Self::new(self.x * other.x, self.y * other.y)
    }

    /// Component-wise quotient.
    #[inline]
    #[must_use]
    pub fn div_elem(self, other: Self) -> Self {
        Self::new(self.x / other.x, self.y / other.y)
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vector2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vector2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vector2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vector2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Mul<Vector2> for f32 {
    type Output = Vector2;
    fn mul(self, rhs: Vector2) -> Vector2 {
        rhs * self
    }
}

impl MulAssign<f32> for Vector2 {
    fn mul_assign(&mut self, rhs: f32) {
        self.x *= rhs;
        self.y *= rhs;
    }
}

impl Div<f32> for Vector2 {
    type Output = Self;
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl DivAssign<f32> for Vector2 {
    fn div_assign(&mut self, rhs: f32) {
        self.x /= rhs;
        self.y /= rhs;
    }
}

impl Neg for Vector2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Three-dimensional vector, used by the skeleton and navigation clients.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    #[must_use]
    pub fn try_normalize(self) -> Option<Self> {
        let len_sq = self.length_squared();
        if len_sq > NORMALIZE_EPSILON && len_sq.is_finite() {
            Some(self / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Drop the z component.
    #[must_use]
    pub const fn truncate(self) -> Vector2 {
        Vector2::new(self.x, self.y)
    }
}

impl Add for Vector3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vector3 {
    type Output = Self;
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vector3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Implicit line `a·x + b·y + c = 0` with `(a, b)` a unit normal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LineEquation {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl LineEquation {
    /// Signed distance of `p` from the line, positive on the normal side.
    #[inline]
    #[must_use]
    pub fn signed_distance(&self, p: Vector2) -> f32 {
        self.a * p.x + self.b * p.y + self.c
    }
}

/// Where the orthogonal projection of a point falls relative to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRegion {
    BeforeStart,
    OnSegment,
    AfterEnd,
}

/// Directed segment from `start` to `end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub start: Vector2,
    pub end: Vector2,
}

impl Segment {
    #[must_use]
    pub const fn new(start: Vector2, end: Vector2) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }

    #[must_use]
    pub fn midpoint(&self) -> Vector2 {
        (self.start + self.end) * 0.5
    }

    /// Unit direction `d̂`; `None` for a zero-length segment.
    #[must_use]
    pub fn direction(&self) -> Option<Vector2> {
        (self.end - self.start).try_normalize()
    }

    /// Outward normal `n̂ = (-d̂_y, d̂_x)`.
    #[must_use]
    pub fn normal(&self) -> Option<Vector2> {
        self.direction().map(Vector2::perp)
    }

    /// Implicit form with `(a, b) = n̂` and `c = -n̂·start`.
    #[must_use]
    pub fn line_equation(&self) -> Option<LineEquation> {
        let n = self.normal()?;
        Some(LineEquation {
            a: n.x,
            b: n.y,
            c: -n.dot(self.start),
        })
    }

    /// Projection parameter `t = (p − start)·d̂`, in metres along the segment.
    #[must_use]
    pub fn projection(&self, p: Vector2) -> Option<f32> {
        self.direction().map(|d| (p - self.start).dot(d))
    }

    /// Classify the orthogonal projection of `p`.
    #[must_use]
    pub fn region_of(&self, p: Vector2) -> SegmentRegion {
        let Some(t) = self.projection(p) else {
            return SegmentRegion::BeforeStart;
        };
        if t < 0.0 {
            SegmentRegion::BeforeStart
        } else if t > self.length() {
            SegmentRegion::AfterEnd
        } else {
            SegmentRegion::OnSegment
        }
    }

    /// Euclidean distance from `p` to the closest point of the segment.
    #[must_use]
    pub fn distance_to(&self, p: Vector2) -> f32 {
        match self.region_of(p) {
            SegmentRegion::BeforeStart => p.distance(self.start),
            SegmentRegion::AfterEnd => p.distance(self.end),
            SegmentRegion::OnSegment => match self.line_equation() {
                Some(line) => line.signed_distance(p).abs(),
                None => p.distance(self.start),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn vector_arithmetic() {
        let a = Vector2::new(3.0, 4.0);
        let b = Vector2::new(1.0, -2.0);
        assert_eq!(a + b, Vector2::new(4.0, 2.0));
        assert_eq!(a - b, Vector2::new(2.0, 6.0));
        assert_eq!(a * 2.0, Vector2::new(6.0, 8.0));
        assert_eq!(2.0 * a, Vector2::new(6.0, 8.0));
        assert!(close(a.length(), 5.0));
        assert!(close(a.dot(b), -5.0));
        assert!(close(a.det(b), -10.0));
        let unit = a.try_normalize().expect("non-zero");
        assert!(close(unit.length(), 1.0));
        assert!(Vector2::zero().try_normalize().is_none());
        assert_eq!(Vector2::zero().normalize_or_zero(), Vector2::zero());
    }

    #[test]
    fn cross_product_is_right_handed() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(y.cross(x), Vector3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn segment_frame_and_line_equation() {
        let seg = Segment::new(Vector2::new(0.0, 0.0), Vector2::new(0.0, 10.0));
        assert_eq!(seg.midpoint(), Vector2::new(0.0, 5.0));
        assert_eq!(seg.direction(), Some(Vector2::new(0.0, 1.0)));
        assert_eq!(seg.normal(), Some(Vector2::new(-1.0, 0.0)));
        let line = seg.line_equation().expect("line");
        assert!(close(line.signed_distance(Vector2::new(-2.0, 3.0)), 2.0));
        assert!(close(line.signed_distance(Vector2::new(2.0, 3.0)), -2.0));
    }

    #[test]
    fn segment_distance_regions() {
        let seg = Segment::new(Vector2::new(0.0, 0.0), Vector2::new(4.0, 0.0));
        assert_eq!(seg.region_of(Vector2::new(-1.0, 1.0)), SegmentRegion::BeforeStart);
        assert_eq!(seg.region_of(Vector2::new(2.0, 1.0)), SegmentRegion::OnSegment);
        assert_eq!(seg.region_of(Vector2::new(7.0, 1.0)), SegmentRegion::AfterEnd);
        assert!(close(seg.distance_to(Vector2::new(-3.0, 4.0)), 5.0));
        assert!(close(seg.distance_to(Vector2::new(2.0, -1.5)), 1.5));
        assert!(close(seg.distance_to(Vector2::new(7.0, 4.0)), 5.0));
    }

    #[test]
    fn zero_length_segment_is_guarded() {
        let p = Vector2::new(1.0, 1.0);
        let seg = Segment::new(p, p);
        assert!(seg.direction().is_none());
        assert!(seg.line_equation().is_none());
        assert!(close(seg.distance_to(Vector2::new(4.0, 5.0)), 5.0));
    }
}
