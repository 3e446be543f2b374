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
use crate::pointer::{Gesture, PointerEvent};
use camera::Camera;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Handled {
    /// Stop propagation and own this gesture until it ends.
    Captured,
    Pass,
}

/// A consumer of the gesture stream. Dispatch walks controllers in
/// descending `priority`, skipping any whose `active_modifiers` list does
/// not contain the event's modifier mask.
pub trait Controller: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }

    /// Modifier masks this controller answers to; empty means never.
    fn active_modifiers(&self) -> &[u8] {
        &[0]
    }

    fn enabled(&self) -> bool {
        true
    }

    fn on_event(&mut self, event: &PointerEvent, camera: &mut Camera, now: f64) -> Handled;
}

/// The standard navigation controller: drag pans, wheel and double-tap
/// zoom about the pointer, two fingers pinch-zoom.
pub struct PanZoomController {
    pub pan_duration_ms: f64,
    pub zoom_duration_ms: f64,
    pub wheel_factor: f64,
    pub double_tap_factor: f64,
    enabled: bool,
    last_pinch_scale: f64,
}

impl Default for PanZoomController {
    fn default() -> Self {
        Self {
            pan_duration_ms: 50.,
            zoom_duration_ms: 200.,
            wheel_factor: 1.25,
            double_tap_factor: 2.,
            enabled: true,
            last_pinch_scale: 1.,
        }
    }
}

impl PanZoomController {
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Controller for PanZoomController {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn on_event(&mut self, event: &PointerEvent, camera: &mut Camera, now: f64) -> Handled {
        match event.gesture {
            Gesture::PanStart { .. } => Handled::Captured,
            Gesture::PanMove { dx, dy, .. } => {
                camera.pan(self.pan_duration_ms, dx, dy, now);
                Handled::Captured
            }
            Gesture::PanEnd { .. } => Handled::Captured,
            Gesture::PinchStart { .. } => {
                self.last_pinch_scale = 1.;
                Handled::Captured
            }
            Gesture::PinchMove { x, y, scale } => {
                // The stream reports scale against the pinch origin; apply
                // only the increment since the last event.
                let step = scale / self.last_pinch_scale;
                self.last_pinch_scale = scale;
                camera.delta_zoom(self.pan_duration_ms, step, x, y, now);
                Handled::Captured
            }
            Gesture::PinchEnd { .. } => Handled::Captured,
            Gesture::MouseWheel { x, y, delta } => {
                let factor = self.wheel_factor.powf(delta);
                camera.delta_zoom(self.zoom_duration_ms, factor, x, y, now);
                Handled::Captured
            }
            Gesture::FingerDoubleTap { x, y } => {
                camera.delta_zoom(self.zoom_duration_ms, self.double_tap_factor, x, y, now);
                Handled::Captured
            }
            Gesture::FingerSingleTap { .. } | Gesture::FingerHover { .. } => Handled::Pass,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camera::{CameraParams, Viewport};

    fn camera() -> Camera {
        Camera::new(Viewport::with_extent(800, 600), CameraParams::default())
    }

    #[test]
    fn test_wheel_zooms_about_pointer() {
        let mut camera = camera();
        let mut controller = PanZoomController::default();
        let before = camera.current_transform(0.);
        let anchor = camera.map_to_scene(600., 150., &before);
        let handled = controller.on_event(
            &PointerEvent {
                gesture: Gesture::MouseWheel {
                    x: 600.,
                    y: 150.,
                    delta: 1.,
                },
                modifiers: 0,
            },
            &mut camera,
            0.,
        );
        assert_eq!(handled, Handled::Captured);
        let after = camera.current_transform(1000.);
        assert!((after.z - 1.25).abs() < 1e-9);
        let q = camera.map_to_canvas(anchor, &after);
        assert!((q.x - 600.).abs() < 1e-6 && (q.y - 150.).abs() < 1e-6);
    }

    #[test]
    fn test_pan_moves_target() {
        let mut camera = camera();
        let mut controller = PanZoomController::default();
        controller.on_event(
            &PointerEvent {
                gesture: Gesture::PanMove {
                    x: 10.,
                    y: 10.,
                    dx: 7.,
                    dy: -3.,
                },
                modifiers: 0,
            },
            &mut camera,
            0.,
        );
        let target = camera.target();
        assert_eq!((target.x, target.y), (7., -3.));
    }

    #[test]
    fn test_pinch_applies_increments() {
        let mut camera = camera();
        let mut controller = PanZoomController::default();
        let center = (400., 300.);
        controller.on_event(
            &PointerEvent {
                gesture: Gesture::PinchStart {
                    x: center.0,
                    y: center.1,
                    distance: 100.,
                },
                modifiers: 0,
            },
            &mut camera,
            0.,
        );
        for scale in [1.5, 2.0] {
            controller.on_event(
                &PointerEvent {
                    gesture: Gesture::PinchMove {
                        x: center.0,
                        y: center.1,
                        scale,
                    },
                    modifiers: 0,
                },
                &mut camera,
                0.,
            );
        }
        // Two increments compose to the full pinch scale.
        assert!((camera.target().z - 2.).abs() < 1e-9);
    }
}
