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

/// A CSS-style timing curve: a cubic Bézier from (0,0) to (1,1) shaped by
/// two control points, stored as the expanded polynomial coefficients so
/// evaluation never touches the control points again. Mapping time to
/// progress solves the x polynomial for the curve parameter (Newton, with
/// a bisection fallback where the slope degenerates) and reads the y
/// polynomial there.
#[derive(Clone, Copy, Debug)]
pub struct CubicBezierCurve {
    ax: f64,
    bx: f64,
    cx: f64,
    ay: f64,
    by: f64,
    cy: f64,
}

impl CubicBezierCurve {
    const SOLVE_EPSILON: f64 = 1e-7;

    pub fn new((x1, y1): (f64, f64), (x2, y2): (f64, f64)) -> Self {
        // Horner coefficients of B(t) with P0=(0,0), P3=(1,1).
        let cx = 3. * x1;
        let bx = 3. * (x2 - x1) - cx;
        let ax = 1. - cx - bx;
        let cy = 3. * y1;
        let by = 3. * (y2 - y1) - cy;
        let ay = 1. - cy - by;
        Self {
            ax,
            bx,
            cx,
            ay,
            by,
            cy,
        }
    }

    fn x_at(&self, t: f64) -> f64 {
        ((self.ax * t + self.bx) * t + self.cx) * t
    }

    fn y_at(&self, t: f64) -> f64 {
        ((self.ay * t + self.by) * t + self.cy) * t
    }

    fn dx_at(&self, t: f64) -> f64 {
        (3. * self.ax * t + 2. * self.bx) * t + self.cx
    }

    /// Curve parameter whose x equals the given abscissa.
    fn solve_t(&self, x: f64) -> f64 {
        let mut t = x;
        for _ in 0..8 {
            let err = self.x_at(t) - x;
            if err.abs() < Self::SOLVE_EPSILON {
                return t;
            }
            let slope = self.dx_at(t);
            if slope.abs() < 1e-6 {
                break;
            }
            t = (t - err / slope).clamp(0., 1.);
        }
        // Timing curves keep x monotone on [0, 1], so bisection always
        // lands even when Newton ran out of slope.
        let (mut lo, mut hi) = (0., 1.);
        while hi - lo > Self::SOLVE_EPSILON {
            t = (lo + hi) / 2.;
            if self.x_at(t) < x {
                lo = t;
            } else {
                hi = t;
            }
        }
        (lo + hi) / 2.
    }

    pub fn interpolate(&self, x: f64) -> f64 {
        if x <= 0. {
            return 0.;
        }
        if x >= 1. {
            return 1.;
        }
        self.y_at(self.solve_t(x))
    }
}

/// Timing functions offered to controls and camera transitions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Easing {
    #[default]
    Linear,
    EaseOut,
    EaseInOut,
}

impl Easing {
    /// Map normalized time to normalized progress. `f` outside [0, 1] clamps.
    pub fn apply(&self, f: f64) -> f64 {
        if f <= 0. {
            return 0.;
        }
        if f >= 1. {
            return 1.;
        }
        match self {
            Self::Linear => f,
            Self::EaseOut => CubicBezierCurve::new((0., 0.), (0.58, 1.)).interpolate(f),
            Self::EaseInOut => CubicBezierCurve::new((0.42, 0.), (0.58, 1.)).interpolate(f),
        }
    }
}

impl std::str::FromStr for Easing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "ease-out" => Ok(Self::EaseOut),
            "ease-in-out" => Ok(Self::EaseInOut),
            _ => Err(format!("unknown easing: {}", s)),
        }
    }
}
