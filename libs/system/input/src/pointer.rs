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
use crate::controller::{Controller, Handled};
use camera::Camera;
use fxhash::FxHashMap;
use log::trace;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, Touch, TouchPhase, WindowEvent};

pub const CTRL: u8 = 1;
pub const SHIFT: u8 = 2;
pub const ALT: u8 = 4;

/// The gesture vocabulary controllers receive. Positions are in canvas
/// device pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gesture {
    PanStart { x: f64, y: f64 },
    PanMove { x: f64, y: f64, dx: f64, dy: f64 },
    PanEnd { x: f64, y: f64 },
    PinchStart { x: f64, y: f64, distance: f64 },
    PinchMove { x: f64, y: f64, scale: f64 },
    PinchEnd { x: f64, y: f64 },
    MouseWheel { x: f64, y: f64, delta: f64 },
    FingerSingleTap { x: f64, y: f64 },
    FingerDoubleTap { x: f64, y: f64 },
    FingerHover { x: f64, y: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub gesture: Gesture,
    pub modifiers: u8,
}

#[derive(Clone, Copy, Debug)]
pub struct PointerOpts {
    /// Two taps within this window and radius make a double tap.
    pub double_tap_ms: f64,
    pub tap_radius_px: f64,
    /// Motion below this is still a tap, above it a pan.
    pub pan_threshold_px: f64,
}

impl Default for PointerOpts {
    fn default() -> Self {
        Self {
            double_tap_ms: 300.,
            tap_radius_px: 10.,
            pan_threshold_px: 4.,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PointerState {
    start: (f64, f64),
    last: (f64, f64),
    is_touch: bool,
}

/// Normalizes platform pointer/touch/wheel traffic into the gesture stream
/// and dispatches it to controllers in descending priority. The first
/// controller to capture a pan or pinch keeps it for the gesture's
/// lifetime. Single taps are held back for the double-tap window, so hosts
/// must call `poll` once per frame.
pub struct PointerManager {
    opts: PointerOpts,
    controllers: Vec<Box<dyn Controller>>,
    modifiers: u8,
    cursor: (f64, f64),
    mouse_down: bool,
    pointers: FxHashMap<u64, PointerState>,
    pan_captured_by: Option<usize>,
    pan_active: bool,
    pinch_start_distance: Option<f64>,
    pinch_captured_by: Option<usize>,
    last_tap: Option<(f64, f64, f64)>,
    pending_tap: Option<(f64, f64, f64)>,
}

impl PointerManager {
    // Synthetic pointer id for the mouse; touch ids start above it.
    const MOUSE_ID: u64 = u64::MAX;

    pub fn new(opts: PointerOpts) -> Self {
        Self {
            opts,
            controllers: Vec::new(),
            modifiers: 0,
            cursor: (0., 0.),
            mouse_down: false,
            pointers: FxHashMap::default(),
            pan_captured_by: None,
            pan_active: false,
            pinch_start_distance: None,
            pinch_captured_by: None,
            last_tap: None,
            pending_tap: None,
        }
    }

    /// Register a controller; dispatch order is priority, descending.
    pub fn on_event(&mut self, controller: Box<dyn Controller>) {
        self.controllers.push(controller);
        self.controllers
            .sort_by_key(|c| std::cmp::Reverse(c.priority()));
    }

    pub fn modifiers(&self) -> u8 {
        self.modifiers
    }

    /// Translate one platform event. `now` is the frame clock in ms.
    pub fn handle_window_event(&mut self, event: &WindowEvent, camera: &mut Camera, now: f64) {
        match event {
            WindowEvent::ModifiersChanged(state) => {
                let mut modifiers = 0;
                if state.ctrl() {
                    modifiers |= CTRL;
                }
                if state.shift() {
                    modifiers |= SHIFT;
                }
                if state.alt() {
                    modifiers |= ALT;
                }
                self.modifiers = modifiers;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.pointer_move(Self::MOUSE_ID, position.x, position.y, camera, now);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if *button == MouseButton::Left {
                    let (x, y) = self.cursor;
                    match state {
                        ElementState::Pressed => self.pointer_down(Self::MOUSE_ID, x, y, false, camera, now),
                        ElementState::Released => self.pointer_up(Self::MOUSE_ID, x, y, camera, now),
                    }
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y as f64,
                    MouseScrollDelta::PixelDelta(p) => p.y / 60.,
                };
                self.wheel(amount, camera, now);
            }
            WindowEvent::Touch(Touch {
                phase,
                location,
                id,
                ..
            }) => match phase {
                TouchPhase::Started => {
                    self.pointer_down(*id, location.x, location.y, true, camera, now)
                }
                TouchPhase::Moved => self.pointer_move(*id, location.x, location.y, camera, now),
                TouchPhase::Ended | TouchPhase::Cancelled => {
                    self.pointer_up(*id, location.x, location.y, camera, now)
                }
            },
            _ => {}
        }
    }

    /// Flush deferred single taps; call once per frame.
    pub fn poll(&mut self, camera: &mut Camera, now: f64) {
        if let Some((t, x, y)) = self.pending_tap {
            if now - t >= self.opts.double_tap_ms {
                self.pending_tap = None;
                self.dispatch(Gesture::FingerSingleTap { x, y }, camera, now);
            }
        }
    }

    pub fn pointer_down(
        &mut self,
        id: u64,
        x: f64,
        y: f64,
        is_touch: bool,
        camera: &mut Camera,
        now: f64,
    ) {
        if id == Self::MOUSE_ID {
            self.mouse_down = true;
        }
        self.pointers.insert(
            id,
            PointerState {
                start: (x, y),
                last: (x, y),
                is_touch,
            },
        );
        let touches = self.touch_points();
        if touches.len() == 2 {
            // A second finger promotes any pan into a pinch.
            if self.pan_active {
                self.end_pan(x, y, camera, now);
            }
            let distance = dist(touches[0], touches[1]);
            let (cx, cy) = midpoint(touches[0], touches[1]);
            self.pinch_start_distance = Some(distance);
            self.pinch_captured_by = None;
            self.dispatch_pinch(
                Gesture::PinchStart {
                    x: cx,
                    y: cy,
                    distance,
                },
                camera,
                now,
            );
        }
    }

    pub fn pointer_move(&mut self, id: u64, x: f64, y: f64, camera: &mut Camera, now: f64) {
        if id == Self::MOUSE_ID {
            self.cursor = (x, y);
        }
        let Some(state) = self.pointers.get_mut(&id) else {
            // Mouse gliding with no button held: hover.
            if id == Self::MOUSE_ID {
                self.dispatch(Gesture::FingerHover { x, y }, camera, now);
            }
            return;
        };
        let (lx, ly) = state.last;
        state.last = (x, y);
        let start = state.start;

        if self.pinch_start_distance.is_some() {
            let touches = self.touch_points();
            if touches.len() >= 2 {
                let distance = dist(touches[0], touches[1]);
                let scale = distance / self.pinch_start_distance.unwrap_or(distance);
                let (cx, cy) = midpoint(touches[0], touches[1]);
                self.dispatch_pinch(Gesture::PinchMove { x: cx, y: cy, scale }, camera, now);
            }
            return;
        }

        if !self.pan_active {
            if dist(start, (x, y)) < self.opts.pan_threshold_px {
                return;
            }
            self.pan_active = true;
            self.pan_captured_by = None;
            let (sx, sy) = start;
            self.dispatch_pan(Gesture::PanStart { x: sx, y: sy }, camera, now);
        }
        self.dispatch_pan(
            Gesture::PanMove {
                x,
                y,
                dx: x - lx,
                dy: y - ly,
            },
            camera,
            now,
        );
    }

    pub fn pointer_up(&mut self, id: u64, x: f64, y: f64, camera: &mut Camera, now: f64) {
        if id == Self::MOUSE_ID {
            self.mouse_down = false;
        }
        let Some(state) = self.pointers.remove(&id) else {
            return;
        };
        if self.pinch_start_distance.is_some() {
            if self.touch_points().len() < 2 {
                self.pinch_start_distance = None;
                self.dispatch_pinch(Gesture::PinchEnd { x, y }, camera, now);
                self.pinch_captured_by = None;
            }
            return;
        }
        if self.pan_active {
            self.end_pan(x, y, camera, now);
            return;
        }
        // No pan, no pinch: this was a tap.
        if dist(state.start, (x, y)) <= self.opts.tap_radius_px {
            self.register_tap(x, y, camera, now);
        }
    }

    pub fn wheel(&mut self, delta: f64, camera: &mut Camera, now: f64) {
        let (x, y) = self.cursor;
        self.dispatch(Gesture::MouseWheel { x, y, delta }, camera, now);
    }

    pub fn set_modifiers(&mut self, modifiers: u8) {
        self.modifiers = modifiers;
    }

    fn end_pan(&mut self, x: f64, y: f64, camera: &mut Camera, now: f64) {
        self.pan_active = false;
        self.dispatch_pan(Gesture::PanEnd { x, y }, camera, now);
        self.pan_captured_by = None;
    }

    fn register_tap(&mut self, x: f64, y: f64, camera: &mut Camera, now: f64) {
        if let Some((t, px, py)) = self.last_tap {
            if now - t <= self.opts.double_tap_ms && dist((px, py), (x, y)) <= self.opts.tap_radius_px
            {
                self.last_tap = None;
                self.pending_tap = None;
                self.dispatch(Gesture::FingerDoubleTap { x, y }, camera, now);
                return;
            }
        }
        self.last_tap = Some((now, x, y));
        self.pending_tap = Some((now, x, y));
    }

    fn touch_points(&self) -> Vec<(f64, f64)> {
        let mut points: Vec<_> = self
            .pointers
            .iter()
            .filter(|(_, p)| p.is_touch)
            .map(|(id, p)| (*id, p.last))
            .collect();
        points.sort_by_key(|(id, _)| *id);
        points.into_iter().map(|(_, p)| p).collect()
    }

    /// Uncaptured dispatch: walk controllers by priority until one takes
    /// the gesture.
    fn dispatch(&mut self, gesture: Gesture, camera: &mut Camera, now: f64) -> Option<usize> {
        let event = PointerEvent {
            gesture,
            modifiers: self.modifiers,
        };
        trace!("gesture {:?}", event);
        for (at, controller) in self.controllers.iter_mut().enumerate() {
            if !controller.enabled() {
                continue;
            }
            if !controller.active_modifiers().contains(&event.modifiers) {
                continue;
            }
            if controller.on_event(&event, camera, now) == Handled::Captured {
                return Some(at);
            }
        }
        None
    }

    fn dispatch_captured(
        &mut self,
        captured: &mut Option<usize>,
        gesture: Gesture,
        camera: &mut Camera,
        now: f64,
    ) {
        match *captured {
            Some(at) => {
                let event = PointerEvent {
                    gesture,
                    modifiers: self.modifiers,
                };
                self.controllers[at].on_event(&event, camera, now);
            }
            None => *captured = self.dispatch(gesture, camera, now),
        }
    }

    fn dispatch_pan(&mut self, gesture: Gesture, camera: &mut Camera, now: f64) {
        let mut captured = self.pan_captured_by;
        self.dispatch_captured(&mut captured, gesture, camera, now);
        self.pan_captured_by = captured;
    }

    fn dispatch_pinch(&mut self, gesture: Gesture, camera: &mut Camera, now: f64) {
        let mut captured = self.pinch_captured_by;
        self.dispatch_captured(&mut captured, gesture, camera, now);
        self.pinch_captured_by = captured;
    }
}

impl std::fmt::Debug for PointerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PointerManager")
            .field("controllers", &self.controllers.len())
            .field("pointers", &self.pointers.len())
            .field("pan_active", &self.pan_active)
            .finish()
    }
}

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn midpoint(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    ((a.0 + b.0) / 2., (a.1 + b.1) / 2.)
}

#[cfg(test)]
mod test {
    use super::*;
    use camera::{CameraParams, Viewport};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        gestures: Arc<Mutex<Vec<Gesture>>>,
        priority: i32,
        modifiers: Vec<u8>,
        capture: bool,
    }

    impl Controller for Recorder {
        fn priority(&self) -> i32 {
            self.priority
        }
        fn active_modifiers(&self) -> &[u8] {
            &self.modifiers
        }
        fn on_event(&mut self, event: &PointerEvent, _camera: &mut Camera, _now: f64) -> Handled {
            self.gestures.lock().unwrap().push(event.gesture);
            if self.capture {
                Handled::Captured
            } else {
                Handled::Pass
            }
        }
    }

    fn rig(capture: bool) -> (PointerManager, Arc<Mutex<Vec<Gesture>>>, Camera) {
        let gestures = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PointerManager::new(PointerOpts::default());
        manager.on_event(Box::new(Recorder {
            gestures: gestures.clone(),
            priority: 0,
            modifiers: vec![0],
            capture,
        }));
        let camera = Camera::new(Viewport::with_extent(800, 600), CameraParams::default());
        (manager, gestures, camera)
    }

    #[test]
    fn test_tap_vs_pan_threshold() {
        let (mut manager, gestures, mut camera) = rig(true);
        // A press-release with sub-threshold motion is a (deferred) tap.
        manager.pointer_down(1, 100., 100., true, &mut camera, 0.);
        manager.pointer_move(1, 101., 101., &mut camera, 5.);
        manager.pointer_up(1, 101., 101., &mut camera, 10.);
        assert!(gestures.lock().unwrap().is_empty());
        manager.poll(&mut camera, 400.);
        assert_eq!(
            gestures.lock().unwrap().as_slice(),
            &[Gesture::FingerSingleTap { x: 101., y: 101. }]
        );

        // Cross the threshold: pan start/move/end, no tap.
        gestures.lock().unwrap().clear();
        manager.pointer_down(1, 100., 100., true, &mut camera, 1000.);
        manager.pointer_move(1, 120., 100., &mut camera, 1010.);
        manager.pointer_up(1, 120., 100., &mut camera, 1020.);
        manager.poll(&mut camera, 2000.);
        let seen = gestures.lock().unwrap().clone();
        assert!(matches!(seen[0], Gesture::PanStart { .. }));
        assert!(matches!(seen[1], Gesture::PanMove { dx, .. } if dx == 20.));
        assert!(matches!(seen[2], Gesture::PanEnd { .. }));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_double_tap_suppresses_singles() {
        let (mut manager, gestures, mut camera) = rig(true);
        manager.pointer_down(1, 50., 50., true, &mut camera, 0.);
        manager.pointer_up(1, 50., 50., &mut camera, 10.);
        manager.pointer_down(1, 52., 50., true, &mut camera, 100.);
        manager.pointer_up(1, 52., 50., &mut camera, 110.);
        manager.poll(&mut camera, 1000.);
        assert_eq!(
            gestures.lock().unwrap().as_slice(),
            &[Gesture::FingerDoubleTap { x: 52., y: 50. }]
        );
    }

    #[test]
    fn test_two_fingers_pinch() {
        let (mut manager, gestures, mut camera) = rig(true);
        manager.pointer_down(1, 100., 100., true, &mut camera, 0.);
        manager.pointer_down(2, 200., 100., true, &mut camera, 5.);
        manager.pointer_move(2, 300., 100., &mut camera, 10.);
        manager.pointer_up(2, 300., 100., &mut camera, 20.);
        let seen = gestures.lock().unwrap().clone();
        assert!(matches!(seen[0], Gesture::PinchStart { distance, .. } if distance == 100.));
        assert!(matches!(seen[1], Gesture::PinchMove { scale, .. } if (scale - 2.).abs() < 1e-9));
        assert!(matches!(seen[2], Gesture::PinchEnd { .. }));
    }

    #[test]
    fn test_modifier_gate() {
        let gestures = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PointerManager::new(PointerOpts::default());
        manager.on_event(Box::new(Recorder {
            gestures: gestures.clone(),
            priority: 0,
            modifiers: vec![CTRL],
            capture: true,
        }));
        let mut camera = Camera::new(Viewport::with_extent(800, 600), CameraParams::default());
        manager.wheel(1., &mut camera, 0.);
        assert!(gestures.lock().unwrap().is_empty());
        manager.set_modifiers(CTRL);
        manager.wheel(1., &mut camera, 1.);
        assert_eq!(gestures.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_priority_and_capture() {
        let high = Arc::new(Mutex::new(Vec::new()));
        let low = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PointerManager::new(PointerOpts::default());
        manager.on_event(Box::new(Recorder {
            gestures: low.clone(),
            priority: 0,
            modifiers: vec![0],
            capture: true,
        }));
        manager.on_event(Box::new(Recorder {
            gestures: high.clone(),
            priority: 10,
            modifiers: vec![0],
            capture: false,
        }));
        let mut camera = Camera::new(Viewport::with_extent(800, 600), CameraParams::default());
        manager.wheel(-1., &mut camera, 0.);
        // High priority saw it first but passed; low captured.
        assert_eq!(high.lock().unwrap().len(), 1);
        assert_eq!(low.lock().unwrap().len(), 1);

        // A captured pan stays with its owner for the whole gesture.
        manager.pointer_down(1, 0., 0., true, &mut camera, 0.);
        manager.pointer_move(1, 50., 0., &mut camera, 10.);
        manager.pointer_move(1, 60., 0., &mut camera, 20.);
        manager.pointer_up(1, 60., 0., &mut camera, 30.);
        let high_pans = high
            .lock()
            .unwrap()
            .iter()
            .filter(|g| matches!(g, Gesture::PanMove { .. }))
            .count();
        let low_pans = low
            .lock()
            .unwrap()
            .iter()
            .filter(|g| matches!(g, Gesture::PanMove { .. }))
            .count();
        // High passed on PanStart, so the capture landed low; every later
        // pan event goes straight to the capturing controller.
        assert_eq!(low_pans, 2);
        assert_eq!(high_pans, 0);
    }

    #[test]
    fn test_hover_only_without_buttons() {
        let (mut manager, gestures, mut camera) = rig(true);
        manager.pointer_move(PointerManager::MOUSE_ID, 10., 10., &mut camera, 0.);
        assert_eq!(
            gestures.lock().unwrap().as_slice(),
            &[Gesture::FingerHover { x: 10., y: 10. }]
        );
    }
}
