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
use crate::{transform::Transform, viewport::Viewport};
use animate::Easing;
use geometry::BoundingBox;
use log::trace;
use nalgebra::Point2;
use signals::{Callback, SignalHandle, Signals};

/// How `fit` treats a box whose aspect differs from the viewport's.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FitMode {
    /// The whole box is visible; the viewport may show margin.
    Contain,
    /// The box covers the whole viewport; parts of it may be cut off.
    Cover,
}

#[derive(Clone, Copy, Debug)]
pub struct CameraParams {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub bounded: bool,
    pub easing: Easing,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            min_zoom: 0.001,
            max_zoom: 10.,
            bounded: false,
            easing: Easing::Linear,
        }
    }
}

/// The view state: an eased source→target transform pair over the viewport.
/// Every mutator rewrites the target (clamped to the zoom range and, when
/// bounded, to the scene box) and emits `update`; per-frame sampling with
/// `current_transform` does the interpolation. Clamping never applies to
/// interpolated intermediates, so transitions stay smooth.
pub struct Camera {
    viewport: Viewport,
    source: Transform,
    target: Transform,
    params: CameraParams,
    scene_box: BoundingBox,
    signals: Signals,
}

impl Camera {
    pub fn new(viewport: Viewport, params: CameraParams) -> Self {
        Self {
            viewport,
            source: Transform::default(),
            target: Transform::default(),
            params,
            scene_box: BoundingBox::empty(),
            signals: Signals::new(&["update"]),
        }
    }

    pub fn on_update(&mut self, callback: Callback) -> Option<SignalHandle> {
        self.signals.on("update", callback)
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.viewport != viewport {
            self.viewport = viewport;
            self.signals.emit("update");
        }
    }

    /// Scene extent used for bounded clamping, normally the union of the
    /// visible layers' boxes.
    pub fn set_bounds(&mut self, scene_box: BoundingBox) {
        self.scene_box = scene_box;
    }

    pub fn target(&self) -> &Transform {
        &self.target
    }

    /// The transform for the frame at `now`: source before the transition,
    /// target after it, the eased interpolant inside it.
    pub fn current_transform(&self, now: f64) -> Transform {
        if now < self.source.t {
            return self.source.stamped(now);
        }
        if now >= self.target.t {
            return self.target.stamped(now);
        }
        Transform::interpolate(&self.source, &self.target, now, self.params.easing)
    }

    pub fn is_moving(&self, now: f64) -> bool {
        now < self.target.t
    }

    /// Retarget the camera to reach (x, y, z, a) `dt_ms` after `now`.
    pub fn set_position(&mut self, dt_ms: f64, x: f64, y: f64, z: f64, a: f64, now: f64) {
        self.source = self.current_transform(now);
        let z = z.clamp(self.params.min_zoom, self.params.max_zoom);
        let mut target = Transform { x, y, z, a, t: now + dt_ms.max(0.) };
        if self.params.bounded {
            self.clamp_to_bounds(&mut target);
        }
        trace!(
            "camera -> ({:.1}, {:.1}) z={:.3} a={:.1} over {}ms",
            target.x,
            target.y,
            target.z,
            target.a,
            dt_ms
        );
        self.target = target;
        self.signals.emit("update");
    }

    pub fn pan(&mut self, dt_ms: f64, dx: f64, dy: f64, now: f64) {
        let t = self.target;
        self.set_position(dt_ms, t.x + dx, t.y + dy, t.z, t.a, now);
    }

    pub fn rotate(&mut self, dt_ms: f64, degrees: f64, now: f64) {
        let t = self.target;
        self.set_position(dt_ms, t.x, t.y, t.z, t.a + degrees, now);
    }

    /// Zoom about a screen point: the scene point under (fx, fy) projects to
    /// the same screen point after the transition.
    pub fn delta_zoom(&mut self, dt_ms: f64, factor: f64, fx: f64, fy: f64, now: f64) {
        debug_assert!(factor > 0.);
        let current = self.current_transform(now);
        let anchor = self.map_to_scene(fx, fy, &current);
        let t = self.target;
        let z1 = (t.z * factor).clamp(self.params.min_zoom, self.params.max_zoom);
        // Solve target translation so anchor stays put under the new zoom.
        let probe = Transform { x: 0., y: 0., z: z1, a: t.a, t: 0. };
        let q = probe.apply(anchor);
        let c = self.viewport.center();
        let screen = Point2::new(fx - c.x, fy - c.y);
        self.set_position(dt_ms, screen.x - q.x, screen.y - q.y, z1, t.a, now);
    }

    /// Retarget so `bbox` fits the viewport per `mode`.
    pub fn fit(&mut self, bbox: &BoundingBox, dt_ms: f64, mode: FitMode, now: f64) {
        if bbox.is_empty() || self.viewport.is_degenerate() {
            return;
        }
        let sx = self.viewport.width() / bbox.width();
        let sy = self.viewport.height() / bbox.height();
        let z = match mode {
            FitMode::Contain => sx.min(sy),
            FitMode::Cover => sx.max(sy),
        };
        let center = bbox.center();
        self.set_position(dt_ms, -center.x * z, -center.y * z, z, 0., now);
    }

    /// Screen (canvas pixel) to scene coordinates under `transform`.
    pub fn map_to_scene(&self, x: f64, y: f64, transform: &Transform) -> Point2<f64> {
        let c = self.viewport.center();
        transform.unapply(Point2::new(x - c.x, y - c.y))
    }

    /// Scene to screen (canvas pixel) coordinates under `transform`.
    pub fn map_to_canvas(&self, p: Point2<f64>, transform: &Transform) -> Point2<f64> {
        let q = transform.apply(p);
        let c = self.viewport.center();
        Point2::new(q.x + c.x, q.y + c.y)
    }

    // Keep the transformed scene box against the viewport: covering it on
    // any axis where the box is larger, centered-inside where smaller.
    fn clamp_to_bounds(&self, target: &mut Transform) {
        if self.scene_box.is_empty() {
            return;
        }
        let placed = target.transform_box(&self.scene_box);
        let view = self.viewport.centered_box();

        let (fix_x, fix_y) = clamp_axis_offsets(&placed, &view);
        target.x += fix_x;
        target.y += fix_y;
    }
}

fn clamp_axis_offsets(placed: &BoundingBox, view: &BoundingBox) -> (f64, f64) {
    let fix = |low: f64, high: f64, vlow: f64, vhigh: f64| -> f64 {
        if high - low >= vhigh - vlow {
            // Box larger than viewport: no gap allowed on either side.
            if low > vlow {
                vlow - low
            } else if high < vhigh {
                vhigh - high
            } else {
                0.
            }
        } else {
            // Box smaller: keep it inside the viewport.
            if low < vlow {
                vlow - low
            } else if high > vhigh {
                vhigh - high
            } else {
                0.
            }
        }
    };
    (
        fix(placed.x_low, placed.x_high, view.x_low, view.x_high),
        fix(placed.y_low, placed.y_high, view.y_low, view.y_high),
    )
}
