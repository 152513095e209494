use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point in the stage coordinate space, with millimeter-independent
/// logical pixel units.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

impl Point {
    /// The origin of the coordinate space
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    /// Create a point from its coordinates
    #[inline]
    pub fn new(x: f64, y: f64) -> Point {
        Point { x, y }
    }

    /// Euclidean distance between two points
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f64, f64)> for Point {
    #[inline]
    fn from((x, y): (f64, f64)) -> Point {
        Point { x, y }
    }
}

impl Sub for Point {
    type Output = Vec2;

    #[inline]
    fn sub(self, other: Point) -> Vec2 {
        Vec2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A two-dimensional displacement in the stage coordinate space
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vec2 {
    /// Horizontal component
    pub x: f64,
    /// Vertical component
    pub y: f64,
}

impl Vec2 {
    /// The zero displacement
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    /// Create a displacement from its components
    #[inline]
    pub fn new(x: f64, y: f64) -> Vec2 {
        Vec2 { x, y }
    }

    /// Euclidean length of the displacement
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    #[inline]
    fn add(self, other: Vec2) -> Vec2 {
        Vec2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl AddAssign for Vec2 {
    #[inline]
    fn add_assign(&mut self, other: Vec2) {
        self.x += other.x;
        self.y += other.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn point_difference_is_displacement() {
        let delta = Point::new(10.0, 2.0) - Point::new(4.0, 10.0);
        assert_eq!(delta, Vec2::new(6.0, -8.0));
        assert_eq!(delta.length(), 10.0);
    }

    #[test]
    fn displacements_accumulate() {
        let mut total = Vec2::ZERO;
        total += Vec2::new(1.0, 2.0);
        total += Vec2::new(-3.0, 0.5);
        assert_eq!(total, Vec2::new(-2.0, 2.5));
    }
}
