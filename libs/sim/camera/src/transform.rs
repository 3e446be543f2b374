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
use crate::viewport::Viewport;
use animate::Easing;
use geometry::BoundingBox;
use nalgebra::{Matrix4, Point2};

/// Affine scene-to-screen placement: scale by `z`, rotate by `a` degrees
/// counter-clockwise, then translate by (x, y) pixels measured from the
/// viewport center. `t` is the frame-clock stamp the placement was produced
/// for, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub t: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.,
            y: 0.,
            z: 1.,
            a: 0.,
            t: 0.,
        }
    }
}

impl Transform {
    pub fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        debug_assert!(z > 0.);
        Self { x, y, z, a, t: 0. }
    }

    pub fn stamped(mut self, t: f64) -> Self {
        self.t = t;
        self
    }

    /// Scene point to center-relative screen point.
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let (sin, cos) = self.a.to_radians().sin_cos();
        Point2::new(
            self.z * (cos * p.x - sin * p.y) + self.x,
            self.z * (sin * p.x + cos * p.y) + self.y,
        )
    }

    /// Center-relative screen point back to scene space.
    pub fn unapply(&self, q: Point2<f64>) -> Point2<f64> {
        let (sin, cos) = self.a.to_radians().sin_cos();
        let dx = (q.x - self.x) / self.z;
        let dy = (q.y - self.y) / self.z;
        Point2::new(cos * dx + sin * dy, -sin * dx + cos * dy)
    }

    /// `other` applied first, then self.
    pub fn compose(&self, other: &Self) -> Self {
        let shift = self.apply(Point2::new(other.x, other.y));
        Self {
            x: shift.x,
            y: shift.y,
            z: self.z * other.z,
            a: self.a + other.a,
            t: self.t,
        }
    }

    /// Linear interpolation of all fields against the normalized clock,
    /// shaped by `easing`. Clamped to the endpoints outside [source.t,
    /// target.t].
    pub fn interpolate(source: &Self, target: &Self, now: f64, easing: Easing) -> Self {
        let span = target.t - source.t;
        let f = if span > 0. {
            easing.apply((now - source.t) / span)
        } else {
            1.
        };
        Self {
            x: source.x + (target.x - source.x) * f,
            y: source.y + (target.y - source.y) * f,
            z: source.z + (target.z - source.z) * f,
            a: source.a + (target.a - source.a) * f,
            t: now,
        }
    }

    /// Scene-to-clip matrix for the given viewport: scale/rotate/translate,
    /// normalized to the viewport extent about its center, y flipped so
    /// scene y grows downward.
    pub fn projection_matrix(&self, viewport: &Viewport) -> Matrix4<f32> {
        let (sin, cos) = self.a.to_radians().sin_cos();
        let kx = 2. / viewport.width();
        let ky = 2. / viewport.height();
        let z = self.z;
        #[rustfmt::skip]
        let m = Matrix4::new(
            (kx * z * cos) as f32, (-kx * z * sin) as f32, 0., (kx * self.x) as f32,
            (-ky * z * sin) as f32, (-ky * z * cos) as f32, 0., (-ky * self.y) as f32,
            0., 0., 1., 0.,
            0., 0., 0., 1.,
        );
        m
    }

    /// Conservative bounding box of the transformed rectangle.
    pub fn transform_box(&self, bbox: &BoundingBox) -> BoundingBox {
        if bbox.is_empty() {
            return *bbox;
        }
        let mut out = BoundingBox::empty();
        for i in 0..4 {
            out.merge_point(self.apply(bbox.corner(i)));
        }
        out
    }
}

/// Plain per-field interpolation, for animating a transform like any other
/// value; the eased camera path goes through `interpolate` instead.
impl animate::Lerp for Transform {
    fn lerp(a: &Self, b: &Self, f: f64) -> Self {
        Self {
            x: a.x + (b.x - a.x) * f,
            y: a.y + (b.y - a.y) * f,
            z: a.z + (b.z - a.z) * f,
            a: a.a + (b.a - a.a) * f,
            t: a.t + (b.t - a.t) * f,
        }
    }
}
