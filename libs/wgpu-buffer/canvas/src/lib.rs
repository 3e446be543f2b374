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
use anyhow::Result;
use cache::{Cache, CacheClient, CacheParams, LayerSlot};
use camera::Camera;
use geometry::BoundingBox;
use gpu::Gpu;
use layer::Layer;
use log::{debug, warn};
use parking_lot::RwLock;
use signals::{Callback, SignalHandle, Signals};
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
pub struct CanvasOpts {
    pub background: wgpu::Color,
    pub cache: CacheParams,
}

impl Default for CanvasOpts {
    fn default() -> Self {
        Self {
            background: wgpu::Color::BLACK,
            cache: CacheParams::default(),
        }
    }
}

struct Slot {
    id: String,
    layer: Arc<RwLock<Layer>>,
    /// None for derived layers, which never contribute to the scheduler.
    cache_slot: Option<LayerSlot>,
    insertion: usize,
}

/// The compositor: owns the device, the scheduler and the z-ordered layer
/// stack, and drives the per-frame order — completions, layout polls,
/// prefetch for every visible layer, one scheduler pass, then draws,
/// non-overlays bottom-up and overlays after them.
pub struct Canvas {
    gpu: Gpu,
    cache: Cache,
    slots: Vec<Slot>,
    opts: CanvasOpts,
    insertions: usize,
    emitted_ready: bool,
    signals: Signals,
}

impl Canvas {
    pub fn new(gpu: Gpu, opts: CanvasOpts) -> Self {
        Self {
            gpu,
            cache: Cache::new(opts.cache),
            slots: Vec::new(),
            opts,
            insertions: 0,
            emitted_ready: false,
            signals: Signals::new(&["update", "ready"]),
        }
    }

    pub fn on(&mut self, name: &'static str, callback: Callback) -> Option<SignalHandle> {
        self.signals.on(name, callback)
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut Gpu {
        &mut self.gpu
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn add_layer(&mut self, id: &str, layer: Arc<RwLock<Layer>>) {
        let cache_slot = if layer.read().is_derived() {
            None
        } else {
            let weak = Arc::downgrade(&layer) as std::sync::Weak<RwLock<dyn CacheClient>>;
            Some(self.cache.register_layer(weak))
        };
        debug!("canvas: added layer {}", id);
        self.slots.push(Slot {
            id: id.to_owned(),
            layer,
            cache_slot,
            insertion: self.insertions,
        });
        self.insertions += 1;
        self.signals.emit("update");
    }

    pub fn remove_layer(&mut self, id: &str) -> bool {
        let Some(at) = self.slots.iter().position(|s| s.id == id) else {
            return false;
        };
        let slot = self.slots.remove(at);
        if let Some(cache_slot) = slot.cache_slot {
            // The weak registration goes stale with the Arc; flush frees
            // whatever this layer had resident.
            self.cache.flush_layer(cache_slot);
        }
        self.signals.emit("update");
        true
    }

    pub fn layer(&self, id: &str) -> Option<Arc<RwLock<Layer>>> {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.layer.clone())
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.id.as_str())
    }

    /// Union of every layer's scene box; what a camera should bound to.
    pub fn scene_bounding_box(&self) -> BoundingBox {
        let mut out = BoundingBox::empty();
        for slot in &self.slots {
            out.merge(&slot.layer.read().bounding_box());
        }
        out
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.configure_surface(width, height);
        self.signals.emit("update");
    }

    /// Drive one frame. Returns true when every animation has settled and
    /// no redraw needs scheduling (render-on-demand quiescence).
    pub fn render_frame(&mut self, camera: &Camera, now: f64) -> Result<bool> {
        let camera_transform = camera.current_transform(now);
        let viewport = *camera.viewport();

        if self.gpu.take_lost() {
            warn!("graphics device lost; rebuilding shaders and dropping tiles");
            for slot in &self.slots {
                slot.layer.write().restore_context();
            }
            self.cache.flush();
            self.signals.emit("update");
        }

        // Apply arrived bytes before deciding what else to fetch.
        for slot in &self.slots {
            let finished = slot.layer.write().process_completions(&self.gpu);
            if let Some(cache_slot) = slot.cache_slot {
                for (index, bytes) in finished {
                    self.cache.note_finished(cache_slot, index, bytes);
                }
            }
        }

        // All queues refresh before one scheduling pass runs, so the
        // scheduler compares this frame's demand across every layer.
        for slot in &self.slots {
            if slot.layer.write().prefetch(&camera_transform, &viewport) {
                if let Some(cache_slot) = slot.cache_slot {
                    self.cache.set_candidates(cache_slot);
                }
            }
        }
        self.cache.update();

        let mut all_done = !camera.is_moving(now);
        let order = self.render_order();
        for &at in &order {
            all_done &= self.slots[at].layer.write().prepare_frame(
                &self.gpu,
                Gpu::SCREEN_FORMAT,
                &camera_transform,
                &viewport,
                now,
            );
        }

        let frame = match self.gpu.acquire_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!("no frame target: {}", err);
                return Ok(all_done);
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.gpu
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("canvas-frame"),
                });
        {
            let guards: Vec<_> = order
                .iter()
                .map(|&at| self.slots[at].layer.read())
                .collect();
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("canvas-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.opts.background),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            rpass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width() as f32,
                viewport.height() as f32,
                0.,
                1.,
            );
            for guard in &guards {
                guard.render(&mut rpass);
            }
        }
        self.gpu.queue().submit(Some(encoder.finish()));
        frame.present();

        if !self.emitted_ready {
            self.emitted_ready = true;
            self.signals.emit("ready");
        }
        Ok(all_done)
    }

    fn render_order(&self) -> Vec<usize> {
        paint_order(&self.slots)
    }
}

/// Indices into `slots` in paint order: non-overlays bottom-up by zindex,
/// then overlays, insertion order breaking ties.
fn paint_order(slots: &[Slot]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by_key(|&at| {
        let layer = slots[at].layer.read();
        (layer.is_overlay(), layer.zindex(), slots[at].insertion)
    });
    order
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("layers", &self.slots.len())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fetch::Fetcher;
    use layer::LayerDesc;
    use layout::{LayoutDesc, LayoutType};
    use raster::{Colorspace, Raster, SampleFormat};
    use shader::{Shader, ShaderDesc};

    fn test_layer(fetcher: &Fetcher, id: &str, zindex: i32, overlay: bool) -> Arc<RwLock<Layer>> {
        let layer = Layer::new(
            LayerDesc {
                id: id.to_owned(),
                label: id.to_owned(),
                layout: LayoutDesc {
                    ty: LayoutType::Google,
                    urls: vec!["http://invalid.test/pyr".to_owned()],
                    width: 512,
                    height: 512,
                    ..Default::default()
                },
                rasters: vec![Raster::new(SampleFormat::Vec4, Colorspace::Srgb)],
                shaders: vec![(
                    "rgb".to_owned(),
                    Shader::new(ShaderDesc {
                        samplers: vec!["kd".to_owned()],
                        ..Default::default()
                    })
                    .unwrap(),
                )],
                zindex,
                overlay,
                ..Default::default()
            },
            fetcher,
        )
        .unwrap();
        Arc::new(RwLock::new(layer))
    }

    // Exercises the stacking rules without touching a device; the Canvas
    // itself needs a Gpu only once frames start.
    #[test]
    fn test_render_order_overlays_last() {
        let fetcher = Fetcher::standalone().unwrap();
        let mut slots = Vec::new();
        for (i, (id, zindex, overlay)) in [
            ("notes", 0, true),
            ("base", 0, false),
            ("detail", 5, false),
            ("grid", -1, true),
        ]
        .into_iter()
        .enumerate()
        {
            slots.push(Slot {
                id: id.to_owned(),
                layer: test_layer(&fetcher, id, zindex, overlay),
                cache_slot: None,
                insertion: i,
            });
        }
        let order = paint_order(&slots);
        let ids: Vec<&str> = order.iter().map(|&at| slots[at].id.as_str()).collect();
        assert_eq!(ids, vec!["base", "detail", "grid", "notes"]);
    }
}
