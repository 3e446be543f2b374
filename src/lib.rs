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

//! A render-on-demand viewer engine for very large, multi-channel imagery:
//! tile pyramids over several wire formats, a shared GPU tile cache with a
//! byte budget, runtime-composed shaders with animated controls, and an
//! eased camera, composited per frame over wgpu.

pub use animate;
pub use cache;
pub use camera;
pub use canvas;
pub use fetch;
pub use geometry;
pub use gpu;
pub use input;
pub use layer;
pub use layout;
pub use raster;
pub use shader;
pub use signals;

use anyhow::Result;
use camera::{Camera, CameraParams, FitMode};
use canvas::{Canvas, CanvasOpts};
use gpu::{Gpu, RenderConfig};
use input::{PanZoomController, PointerManager, PointerOpts};
use layer::{DeriveDesc, Layer, LayerDesc};
use log::debug;
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use winit::{event::WindowEvent, window::Window};

/// Everything wired together: canvas, camera, pointer input and the fetch
/// service, with `update` signals re-arming the redraw flag so hosts only
/// render frames that will differ from the last one.
pub struct Viewer {
    canvas: Canvas,
    camera: Camera,
    pointer: PointerManager,
    fetcher: fetch::Fetcher,
    clock: animate::FrameClock,
    needs_redraw: Arc<AtomicBool>,
}

impl Viewer {
    pub fn new(window: &Window, opts: CanvasOpts) -> Result<Self> {
        let gpu = Gpu::for_window(window, RenderConfig::default())?;
        let size = window.inner_size();
        let mut camera = Camera::new(
            camera::Viewport::with_extent(size.width, size.height),
            CameraParams::default(),
        );
        let mut canvas = Canvas::new(gpu, opts);
        let needs_redraw = Arc::new(AtomicBool::new(true));
        {
            let flag = needs_redraw.clone();
            camera.on_update(Box::new(move || flag.store(true, Ordering::Relaxed)));
        }
        {
            let flag = needs_redraw.clone();
            canvas.on("update", Box::new(move || flag.store(true, Ordering::Relaxed)));
        }
        let mut pointer = PointerManager::new(PointerOpts::default());
        pointer.on_event(Box::new(PanZoomController::default()));
        debug!("viewer initialized at {}x{}", size.width, size.height);
        Ok(Self {
            canvas,
            camera,
            pointer,
            fetcher: fetch::Fetcher::standalone()?,
            clock: animate::FrameClock::new(),
            needs_redraw,
        })
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn pointer_mut(&mut self) -> &mut PointerManager {
        &mut self.pointer
    }

    pub fn fetcher(&self) -> &fetch::Fetcher {
        &self.fetcher
    }

    /// Build and register a layer; `update` re-arms the frame loop through
    /// the redraw flag.
    pub fn add_layer(&mut self, desc: LayerDesc) -> Result<Arc<RwLock<Layer>>> {
        let id = desc.id.clone();
        let mut layer = Layer::new(desc, &self.fetcher)?;
        {
            let flag = self.needs_redraw.clone();
            layer.on("update", Box::new(move || flag.store(true, Ordering::Relaxed)));
        }
        let layer = Arc::new(RwLock::new(layer));
        self.canvas.add_layer(&id, layer.clone());
        self.camera.set_bounds(self.canvas.scene_bounding_box());
        Ok(layer)
    }

    /// Register a layer re-rendering `source`'s tiles through another
    /// shader stack; no new textures are ever allocated for it.
    pub fn add_derived_layer(
        &mut self,
        source: &Arc<RwLock<Layer>>,
        desc: DeriveDesc,
    ) -> Result<Arc<RwLock<Layer>>> {
        let id = desc.id.clone();
        let mut layer = source.read().derive(desc)?;
        {
            let flag = self.needs_redraw.clone();
            layer.on("update", Box::new(move || flag.store(true, Ordering::Relaxed)));
        }
        let layer = Arc::new(RwLock::new(layer));
        self.canvas.add_layer(&id, layer.clone());
        Ok(layer)
    }

    /// Ease the camera to frame the whole scene.
    pub fn fit_scene(&mut self, duration_ms: f64) {
        let bbox = self.canvas.scene_bounding_box();
        if !bbox.is_empty() {
            let now = self.clock.now_ms();
            self.camera.fit(&bbox, duration_ms, FitMode::Contain, now);
        }
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        if let WindowEvent::Resized(size) = event {
            self.canvas.resize(size.width, size.height);
            self.camera
                .set_viewport(camera::Viewport::with_extent(size.width, size.height));
        }
        let now = self.clock.now_ms();
        self.pointer
            .handle_window_event(event, &mut self.camera, now);
    }

    /// True when the next frame would differ from the last.
    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw.load(Ordering::Relaxed)
    }

    /// Drive one frame; re-arms itself while animations or loads are
    /// outstanding.
    pub fn render_frame(&mut self) -> Result<()> {
        let now = self.clock.now_ms();
        self.pointer.poll(&mut self.camera, now);
        self.needs_redraw.store(false, Ordering::Relaxed);
        let all_done = self.canvas.render_frame(&self.camera, now)?;
        if !all_done {
            self.needs_redraw.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Descriptor for the plain single-image case: one RGB channel, the
/// standard passthrough shader.
pub fn image_layer_desc(id: &str, url: &str, width: u32, height: u32) -> Result<LayerDesc> {
    Ok(LayerDesc {
        id: id.to_owned(),
        label: id.to_owned(),
        layout: layout::LayoutDesc {
            ty: layout::LayoutType::Image,
            urls: vec![url.to_owned()],
            width,
            height,
            ..Default::default()
        },
        rasters: vec![raster::Raster::new(
            raster::SampleFormat::Vec4,
            raster::Colorspace::Srgb,
        )],
        shaders: vec![("standard".to_owned(), standard_rgb_shader()?)],
        ..Default::default()
    })
}

/// Descriptor for a single-channel tile pyramid of any wire family that
/// resolves its own geometry from a manifest.
pub fn pyramid_layer_desc(id: &str, ty: layout::LayoutType, url: &str) -> Result<LayerDesc> {
    Ok(LayerDesc {
        id: id.to_owned(),
        label: id.to_owned(),
        layout: layout::LayoutDesc {
            ty,
            urls: vec![url.to_owned()],
            ..Default::default()
        },
        rasters: vec![raster::Raster::new(
            raster::SampleFormat::Vec4,
            raster::Colorspace::Srgb,
        )],
        shaders: vec![("standard".to_owned(), standard_rgb_shader()?)],
        ..Default::default()
    })
}

/// The passthrough color shader every simple stack starts from.
pub fn standard_rgb_shader() -> Result<shader::Shader> {
    Ok(shader::Shader::new(shader::ShaderDesc {
        label: "standard".to_owned(),
        samplers: vec!["kd".to_owned()],
        ..Default::default()
    })?)
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("canvas", &self.canvas)
            .field("needs_redraw", &self.needs_redraw.load(Ordering::Relaxed))
            .finish()
    }
}
