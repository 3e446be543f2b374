// This file is part of Xenon.
//
// Xenon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Xenon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Xenon.  If not, see <http://www.gnu.org/licenses/>.
use nalgebra::{Point2, Vector2};

/// Axis-aligned rectangle in scene coordinates. The empty box is
/// representable (low > high) and behaves as the identity under merge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x_low: f64,
    pub y_low: f64,
    pub x_high: f64,
    pub y_high: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn new(x_low: f64, y_low: f64, x_high: f64, y_high: f64) -> Self {
        debug_assert!(x_low <= x_high && y_low <= y_high);
        Self {
            x_low,
            y_low,
            x_high,
            y_high,
        }
    }

    pub fn empty() -> Self {
        Self {
            x_low: 1e20,
            y_low: 1e20,
            x_high: -1e20,
            y_high: -1e20,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x_low > self.x_high || self.y_low > self.y_high
    }

    pub fn from_corners(a: Point2<f64>, b: Point2<f64>) -> Self {
        Self {
            x_low: a.x.min(b.x),
            y_low: a.y.min(b.y),
            x_high: a.x.max(b.x),
            y_high: a.y.max(b.y),
        }
    }

    pub fn width(&self) -> f64 {
        self.x_high - self.x_low
    }

    pub fn height(&self) -> f64 {
        self.y_high - self.y_low
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            (self.x_low + self.x_high) / 2.0,
            (self.y_low + self.y_high) / 2.0,
        )
    }

    /// Corners wind counter-clockwise from low-low.
    pub fn corner(&self, i: usize) -> Point2<f64> {
        match i {
            0 => Point2::new(self.x_low, self.y_low),
            1 => Point2::new(self.x_high, self.y_low),
            2 => Point2::new(self.x_high, self.y_high),
            3 => Point2::new(self.x_low, self.y_high),
            _ => panic!("corner index out of range: {}", i),
        }
    }

    pub fn contains_point(&self, p: Point2<f64>) -> bool {
        p.x >= self.x_low && p.x <= self.x_high && p.y >= self.y_low && p.y <= self.y_high
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x_low <= other.x_high
            && self.x_high >= other.x_low
            && self.y_low <= other.y_high
            && self.y_high >= other.y_low
    }

    /// Grow to cover `other` as well.
    pub fn merge(&mut self, other: &Self) -> &mut Self {
        self.x_low = self.x_low.min(other.x_low);
        self.y_low = self.y_low.min(other.y_low);
        self.x_high = self.x_high.max(other.x_high);
        self.y_high = self.y_high.max(other.y_high);
        self
    }

    pub fn merge_point(&mut self, p: Point2<f64>) -> &mut Self {
        self.x_low = self.x_low.min(p.x);
        self.y_low = self.y_low.min(p.y);
        self.x_high = self.x_high.max(p.x);
        self.y_high = self.y_high.max(p.y);
        self
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let out = Self {
            x_low: self.x_low.max(other.x_low),
            y_low: self.y_low.max(other.y_low),
            x_high: self.x_high.min(other.x_high),
            y_high: self.y_high.min(other.y_high),
        };
        if out.is_empty() {
            Self::empty()
        } else {
            out
        }
    }

    pub fn translated(&self, d: Vector2<f64>) -> Self {
        Self {
            x_low: self.x_low + d.x,
            y_low: self.y_low + d.y,
            x_high: self.x_high + d.x,
            y_high: self.y_high + d.y,
        }
    }

    pub fn scaled(&self, s: f64) -> Self {
        Self {
            x_low: self.x_low * s,
            y_low: self.y_low * s,
            x_high: self.x_high * s,
            y_high: self.y_high * s,
        }
    }

    /// Grow (or shrink, for negative amounts) by `border` on every side.
    pub fn expanded(&self, border: f64) -> Self {
        Self {
            x_low: self.x_low - border,
            y_low: self.y_low - border,
            x_high: self.x_high + border,
            y_high: self.y_high + border,
        }
    }

    /// Conservative box of this box rotated by `degrees` about its center.
    pub fn rotated(&self, degrees: f64) -> Self {
        if self.is_empty() {
            return *self;
        }
        let (sin, cos) = degrees.to_radians().sin_cos();
        let c = self.center();
        let mut out = Self::empty();
        for i in 0..4 {
            let p = self.corner(i) - c;
            out.merge_point(Point2::new(
                c.x + p.x * cos - p.y * sin,
                c.y + p.x * sin + p.y * cos,
            ));
        }
        out
    }

    /// Snap edges outward to multiples of `q`.
    pub fn quantized(&self, q: f64) -> Self {
        debug_assert!(q > 0.0);
        Self {
            x_low: (self.x_low / q).floor() * q,
            y_low: (self.y_low / q).floor() * q,
            x_high: (self.x_high / q).ceil() * q,
            y_high: (self.y_high / q).ceil() * q,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_empty_is_merge_identity() {
        let mut e = BoundingBox::empty();
        assert!(e.is_empty());
        let b = BoundingBox::new(1., 2., 3., 4.);
        e.merge(&b);
        assert_eq!(e, b);
    }

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0., 0., 2., 2.);
        let b = BoundingBox::new(1., 1., 3., 3.);
        assert!(a.intersects(&b));
        let i = a.intersection(&b);
        assert_eq!(i, BoundingBox::new(1., 1., 2., 2.));
        let c = BoundingBox::new(5., 5., 6., 6.);
        assert!(!a.intersects(&c));
        assert!(a.intersection(&c).is_empty());
    }

    #[test]
    fn test_empty_never_intersects() {
        let a = BoundingBox::new(0., 0., 2., 2.);
        assert!(!a.intersects(&BoundingBox::empty()));
        assert!(!BoundingBox::empty().intersects(&a));
    }

    #[test]
    fn test_rotation_quarter_turn() {
        let b = BoundingBox::new(-2., -1., 2., 1.);
        let r = b.rotated(90.);
        assert_abs_diff_eq!(r.x_low, -1., epsilon = 1e-9);
        assert_abs_diff_eq!(r.y_low, -2., epsilon = 1e-9);
        assert_abs_diff_eq!(r.x_high, 1., epsilon = 1e-9);
        assert_abs_diff_eq!(r.y_high, 2., epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_is_conservative() {
        let b = BoundingBox::new(0., 0., 2., 2.);
        let r = b.rotated(45.);
        for i in 0..4 {
            assert!(r.width() >= b.width());
            assert!(r.contains_point(r.corner(i)));
        }
    }

    #[test]
    fn test_quantize() {
        let b = BoundingBox::new(0.3, 0.7, 3.2, 3.9);
        let q = b.quantized(1.0);
        assert_eq!(q, BoundingBox::new(0., 0., 4., 4.));
    }
}
