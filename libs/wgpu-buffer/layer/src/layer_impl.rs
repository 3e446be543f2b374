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
use crate::{state::LayerState, LayerError};
use animate::{ControlSet, ControlValue, Easing};
use cache::{CacheClient, Candidate, ResidentTile};
use camera::{Transform, Viewport};
use fetch::{FetchError, FetchKey, Fetcher, FetchQueue};
use fxhash::FxHashMap;
use geometry::BoundingBox;
use gpu::Gpu;
use layout::{Layout, LayoutDesc, Tile, TileChannel, TileFetch, TileIndex, TileSpec};
use log::{debug, trace, warn};
use parking_lot::RwLock;
use raster::Raster;
use shader::{Shader, UniformValue};
use signals::{Callback, SignalHandle, Signals};
use smallvec::SmallVec;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use zerocopy::AsBytes;

const MANIFEST_BIT: u64 = 1 << 63;
const CHANNEL_STRIDE: u64 = 16;

fn tile_key(index: TileIndex, channel: usize) -> FetchKey {
    FetchKey(index.0 * CHANNEL_STRIDE + channel as u64)
}

fn manifest_key(slot: usize) -> FetchKey {
    FetchKey(MANIFEST_BIT | slot as u64)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LayerStatus {
    Pending,
    Ready,
    Error(String),
}

/// One finished tile load, for the scheduler's bookkeeping: bytes resident
/// on success, None on failure.
pub type TileCompletion = (TileIndex, Option<u64>);

pub struct LayerDesc {
    pub id: String,
    pub label: String,
    pub layout: LayoutDesc,
    pub rasters: Vec<Raster>,
    pub shaders: Vec<(String, Shader)>,
    pub active_shader: Option<String>,
    pub transform: Transform,
    pub visible: bool,
    pub zindex: i32,
    pub overlay: bool,
    pub prefetch_border: u32,
    pub mipmap_bias: f64,
    /// Physical size of one native pixel, in millimeters, when known.
    pub pixel_size: f64,
}

impl Default for LayerDesc {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            layout: LayoutDesc::default(),
            rasters: Vec::new(),
            shaders: Vec::new(),
            active_shader: None,
            transform: Transform::default(),
            visible: true,
            zindex: 0,
            overlay: false,
            prefetch_border: 1,
            mipmap_bias: 0.4,
            pixel_size: 0.,
        }
    }
}

/// Options for a layer that re-renders another layer's tiles through a
/// different shader.
pub struct DeriveDesc {
    pub id: String,
    pub label: String,
    pub zindex: i32,
    pub shaders: Vec<(String, Shader)>,
    pub active_shader: Option<String>,
    pub transform: Option<Transform>,
}

/// Completion is tracked on the tile's own missing counter; the plan only
/// remembers how to slice interleaved archive answers.
struct LoadPlan {
    interleaved_offsets: Option<SmallVec<[u64; 8]>>,
}

struct FrameBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    draws: Vec<(wgpu::BindGroup, u32, u32)>,
}

/// Binds a Layout, its Rasters and a Shader into a drawable plane: owns the
/// fetch wish-list and (unless derived) the tile map, advances animated
/// controls, and turns the layout's `available` answer into draw calls.
pub struct Layer {
    id: String,
    label: String,
    zindex: i32,
    visible: bool,
    overlay: bool,
    transform: Transform,
    layout: Arc<RwLock<Layout>>,
    rasters: Vec<Raster>,
    shaders: Vec<(String, Shader)>,
    active_shader: usize,
    controls: ControlSet,
    tiles: Arc<RwLock<FxHashMap<TileIndex, Tile>>>,
    owns_tiles: bool,
    queue: Vec<Candidate>,
    specs: FxHashMap<TileIndex, TileSpec>,
    requested: FxHashMap<TileIndex, LoadPlan>,
    fetcher: Fetcher,
    fetch_queue: FetchQueue,
    manifests_requested: bool,
    prefetch_border: u32,
    mipmap_bias: f64,
    pixel_size: f64,
    frame_stamp: u64,
    status: LayerStatus,
    emitted_ready: bool,
    filter_textures: Vec<(String, Arc<wgpu::TextureView>)>,
    frame: Option<FrameBuffers>,
    signals: Signals,
}

impl Layer {
    pub fn new(desc: LayerDesc, fetcher: &Fetcher) -> Result<Self, LayerError> {
        if desc.shaders.is_empty() {
            return Err(LayerError::Config("a layer needs at least one shader".to_owned()));
        }
        let channels = desc.rasters.len();
        for (name, shader) in &desc.shaders {
            if shader.channel_count() > channels {
                return Err(LayerError::Config(format!(
                    "shader {} samples {} channels but only {} rasters are declared",
                    name,
                    shader.channel_count(),
                    channels
                )));
            }
        }
        let active_shader = match desc.active_shader.as_deref() {
            Some(wanted) => desc
                .shaders
                .iter()
                .position(|(name, _)| name == wanted)
                .ok_or_else(|| LayerError::UnknownShader(wanted.to_owned()))?,
            None => 0,
        };
        let layout = Layout::new(desc.layout)?;
        Ok(Self {
            id: desc.id,
            label: desc.label,
            zindex: desc.zindex,
            visible: desc.visible,
            overlay: desc.overlay,
            transform: desc.transform,
            layout: Arc::new(RwLock::new(layout)),
            rasters: desc.rasters,
            shaders: desc.shaders,
            active_shader,
            controls: ControlSet::default(),
            tiles: Arc::new(RwLock::new(FxHashMap::default())),
            owns_tiles: true,
            queue: Vec::new(),
            specs: FxHashMap::default(),
            requested: FxHashMap::default(),
            fetcher: fetcher.clone(),
            fetch_queue: fetcher.queue(),
            manifests_requested: false,
            prefetch_border: desc.prefetch_border,
            mipmap_bias: desc.mipmap_bias,
            pixel_size: desc.pixel_size,
            frame_stamp: 0,
            status: LayerStatus::Pending,
            emitted_ready: false,
            filter_textures: Vec::new(),
            frame: None,
            signals: Signals::new(&["ready", "update", "loaded", "updateSize"]),
        })
    }

    /// A new layer rendering this layer's tiles through different shaders.
    /// The tile map is shared by reference; the derived layer never fetches
    /// and never allocates GPU textures of its own.
    pub fn derive(&self, desc: DeriveDesc) -> Result<Self, LayerError> {
        if desc.shaders.is_empty() {
            return Err(LayerError::Config("a layer needs at least one shader".to_owned()));
        }
        let channels = self.channel_count();
        for (name, shader) in &desc.shaders {
            if shader.channel_count() > channels {
                return Err(LayerError::Config(format!(
                    "derived shader {} wants {} channels; source carries {}",
                    name,
                    shader.channel_count(),
                    channels
                )));
            }
        }
        let active_shader = match desc.active_shader.as_deref() {
            Some(wanted) => desc
                .shaders
                .iter()
                .position(|(name, _)| name == wanted)
                .ok_or_else(|| LayerError::UnknownShader(wanted.to_owned()))?,
            None => 0,
        };
        Ok(Self {
            id: desc.id,
            label: desc.label,
            zindex: desc.zindex,
            visible: self.visible,
            overlay: self.overlay,
            transform: desc.transform.unwrap_or(self.transform),
            layout: self.layout.clone(),
            rasters: Vec::new(),
            shaders: desc.shaders,
            active_shader,
            controls: ControlSet::default(),
            tiles: self.tiles.clone(),
            owns_tiles: false,
            queue: Vec::new(),
            specs: FxHashMap::default(),
            requested: FxHashMap::default(),
            fetcher: self.fetcher.clone(),
            fetch_queue: self.fetcher.queue(),
            manifests_requested: true,
            prefetch_border: self.prefetch_border,
            mipmap_bias: self.mipmap_bias,
            pixel_size: self.pixel_size,
            frame_stamp: 0,
            status: LayerStatus::Pending,
            emitted_ready: false,
            filter_textures: Vec::new(),
            frame: None,
            signals: Signals::new(&["ready", "update", "loaded", "updateSize"]),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn zindex(&self) -> i32 {
        self.zindex
    }

    pub fn set_zindex(&mut self, zindex: i32) {
        if self.zindex != zindex {
            self.zindex = zindex;
            self.signals.emit("update");
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.signals.emit("update");
        }
    }

    pub fn is_overlay(&self) -> bool {
        self.overlay
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.signals.emit("update");
    }

    pub fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    pub fn status(&self) -> &LayerStatus {
        &self.status
    }

    pub fn is_derived(&self) -> bool {
        !self.owns_tiles
    }

    pub fn shares_tiles_with(&self, other: &Layer) -> bool {
        Arc::ptr_eq(&self.tiles, &other.tiles)
    }

    pub fn on(&mut self, name: &'static str, callback: Callback) -> Option<SignalHandle> {
        self.signals.on(name, callback)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.layout.read().bounding_box()
    }

    pub fn layout(&self) -> &Arc<RwLock<Layout>> {
        &self.layout
    }

    // ------------------------------------------------------------------
    // Shader slot.

    pub fn active_shader(&self) -> &Shader {
        &self.shaders[self.active_shader].1
    }

    pub fn active_shader_mut(&mut self) -> &mut Shader {
        &mut self.shaders[self.active_shader].1
    }

    pub fn add_shader(&mut self, name: String, shader: Shader) -> Result<(), LayerError> {
        if shader.channel_count() > self.channel_count() {
            return Err(LayerError::Config(format!(
                "shader {} samples more channels than the layer carries",
                name
            )));
        }
        self.shaders.push((name, shader));
        Ok(())
    }

    pub fn remove_shader(&mut self, name: &str) -> Result<(), LayerError> {
        let at = self
            .shaders
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| LayerError::UnknownShader(name.to_owned()))?;
        if at == self.active_shader {
            return Err(LayerError::Config("cannot remove the active shader".to_owned()));
        }
        self.shaders.remove(at);
        if at < self.active_shader {
            self.active_shader -= 1;
        }
        Ok(())
    }

    /// Switch the active shader. Resident tiles keep the channel textures
    /// both shaders share; their missing counters are rebuilt against the
    /// new channel demand, so partially useful tiles finish loading rather
    /// than reloading.
    pub fn set_shader(&mut self, name: &str) -> Result<(), LayerError> {
        let at = self
            .shaders
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| LayerError::UnknownShader(name.to_owned()))?;
        if at == self.active_shader {
            return Ok(());
        }
        let new_channels = self.shaders[at].1.channel_count();
        if !self.owns_tiles && new_channels != self.channel_count() {
            return Err(LayerError::DerivedImmutable("change the channel count"));
        }
        self.active_shader = at;
        if self.owns_tiles {
            let mut tiles = self.tiles.write();
            for tile in tiles.values_mut() {
                tile.missing = rebuilt_missing(&tile.textures, new_channels);
            }
        }
        self.signals.emit("update");
        Ok(())
    }

    /// Raster channels the active shader draws from.
    pub fn channel_count(&self) -> usize {
        if self.owns_tiles {
            self.active_shader().channel_count().max(1)
        } else {
            // Shared maps are sized by their owner.
            self.tiles
                .read()
                .values()
                .next()
                .map(|t| t.textures.len())
                .unwrap_or_else(|| self.active_shader().channel_count().max(1))
        }
    }

    /// Source for a filter-declared sampler, bound after the channels.
    pub fn set_filter_texture(&mut self, name: String, view: Arc<wgpu::TextureView>) {
        self.filter_textures.retain(|(n, _)| n != &name);
        self.filter_textures.push((name, view));
    }

    // ------------------------------------------------------------------
    // Controls.

    pub fn add_control(&mut self, name: &str, value: &[f64]) {
        self.controls.add(name, ControlValue::from_slice(value));
    }

    pub fn set_control(
        &mut self,
        name: &str,
        value: &[f64],
        duration_ms: f64,
        easing: Easing,
        now: f64,
    ) -> bool {
        let hit = self.controls.set(
            name,
            ControlValue::from_slice(value),
            duration_ms,
            easing,
            now,
        );
        if hit {
            self.signals.emit("update");
        }
        hit
    }

    pub fn control(&self, name: &str) -> Option<&animate::AnimatedValue<ControlValue>> {
        self.controls.get(name)
    }

    pub fn interpolate_controls(&mut self, now: f64) -> bool {
        self.controls.interpolate_all(now)
    }

    pub fn get_state(&self) -> LayerState {
        LayerState {
            controls: self
                .controls
                .iter_current()
                .map(|(name, value)| (name.to_owned(), value.to_vec()))
                .collect(),
            mode: self.active_shader().mode().map(str::to_owned),
        }
    }

    pub fn set_state(&mut self, state: &LayerState, duration_ms: f64, easing: Easing, now: f64) {
        for (name, value) in &state.controls {
            self.set_control(name, value, duration_ms, easing, now);
        }
        if let Some(mode) = state.mode.as_deref() {
            if let Err(err) = self.active_shader_mut().set_mode(mode) {
                warn!("restoring state: {}", err);
            }
        }
    }

    // ------------------------------------------------------------------
    // Frame interface: fetch side.

    /// Refresh the fetch wish-list for this view. Returns true when the
    /// queue holds candidates, so the caller can batch-register with the
    /// scheduler. Derived layers never fetch.
    pub fn prefetch(&mut self, camera_transform: &Transform, viewport: &Viewport) -> bool {
        if !self.visible || !self.owns_tiles {
            return false;
        }
        self.request_manifests();
        if !self.layout.read().is_ready() {
            return false;
        }
        self.frame_stamp += 1;
        let estimated_bytes = self.estimate_tile_bytes();
        let tiles = self.tiles.read();
        let needed = self.layout.read().needed(
            viewport,
            camera_transform,
            &self.transform,
            self.prefetch_border,
            self.mipmap_bias,
            &tiles,
        );
        drop(tiles);
        self.queue.clear();
        for spec in needed {
            if self.requested.contains_key(&spec.index) {
                continue;
            }
            self.specs.insert(spec.index, spec);
            self.queue.push(Candidate {
                index: spec.index,
                time: self.frame_stamp,
                priority: spec.priority,
                estimated_bytes,
                visible: spec.in_view,
            });
        }
        !self.queue.is_empty()
    }

    fn request_manifests(&mut self) {
        if self.manifests_requested {
            return;
        }
        let requests = self.layout.read().manifest_requests();
        for (slot, url) in &requests {
            self.fetch_queue.request(manifest_key(*slot), url, None);
        }
        self.manifests_requested = true;
    }

    fn estimate_tile_bytes(&self) -> u64 {
        let layout = self.layout.read();
        let channels = self.channel_count() as u64;
        let ts = layout.tile_size() as u64;
        if ts == 0 {
            layout.width() as u64 * layout.height() as u64 * 4 * channels
        } else {
            ts * ts * 4 * channels
        }
    }

    /// Drain fetch completions: manifests advance the layout, tile bytes
    /// decode and upload. Returns finished tiles for the scheduler.
    pub fn process_completions(&mut self, gpu: &Gpu) -> SmallVec<[TileCompletion; 4]> {
        let mut finished = SmallVec::new();
        for completion in self.fetch_queue.drain() {
            if completion.key.0 & MANIFEST_BIT != 0 {
                self.apply_manifest_completion(
                    (completion.key.0 & !MANIFEST_BIT) as usize,
                    completion.result,
                );
                continue;
            }
            let index = TileIndex(completion.key.0 / CHANNEL_STRIDE);
            let channel = (completion.key.0 % CHANNEL_STRIDE) as usize;
            if !self.requested.contains_key(&index) {
                trace!("discarding completion for dropped tile {:?}", index);
                continue;
            }
            match completion.result {
                Ok(bytes) => {
                    if let Err(message) = self.install_tile_bytes(gpu, index, channel, &bytes) {
                        warn!("tile {:?} rejected: {}", index, message);
                        self.fail_tile(index, &mut finished);
                    } else if self
                        .tiles
                        .read()
                        .get(&index)
                        .map_or(false, Tile::is_complete)
                    {
                        let size = self.tiles.read().get(&index).map_or(0, |t| t.size);
                        self.requested.remove(&index);
                        finished.push((index, Some(size)));
                        self.signals.emit("loaded");
                        self.signals.emit("update");
                    }
                }
                Err(err) => {
                    warn!("tile {:?} fetch failed: {}", index, err);
                    self.fail_tile(index, &mut finished);
                }
            }
        }
        finished
    }

    fn apply_manifest_completion(&mut self, slot: usize, result: Result<Vec<u8>, FetchError>) {
        let mut layout = self.layout.write();
        match result {
            Ok(bytes) => {
                if let Err(err) = layout.apply_manifest(slot, &bytes) {
                    self.status = LayerStatus::Error(err.to_string());
                    return;
                }
                if layout.is_ready() {
                    drop(layout);
                    debug!("layer {} layout resolved", self.id);
                    self.signals.emit("updateSize");
                    self.signals.emit("update");
                }
            }
            Err(err) => {
                layout.fail(err.to_string());
                self.status = LayerStatus::Error(err.to_string());
            }
        }
    }

    fn install_tile_bytes(
        &mut self,
        gpu: &Gpu,
        index: TileIndex,
        channel: usize,
        bytes: &[u8],
    ) -> Result<(), String> {
        let offsets = self
            .requested
            .get(&index)
            .and_then(|plan| plan.interleaved_offsets.clone());
        match offsets {
            Some(offsets) => {
                // One range answered every channel; slice and upload each.
                for ch in 0..offsets.len() - 1 {
                    let lo = offsets[ch] as usize;
                    let hi = offsets[ch + 1] as usize;
                    let slice = bytes.get(lo..hi).ok_or("archive slice out of bounds")?;
                    self.upload_channel(gpu, index, ch, slice)?;
                }
                Ok(())
            }
            None => self.upload_channel(gpu, index, channel, bytes),
        }
    }

    fn upload_channel(
        &mut self,
        gpu: &Gpu,
        index: TileIndex,
        channel: usize,
        bytes: &[u8],
    ) -> Result<(), String> {
        let raster = self
            .rasters
            .get(channel)
            .ok_or("completion for an undeclared channel")?;
        let (texture, size, w, h) = raster
            .load_image(gpu, bytes)
            .map_err(|err| err.to_string())?;
        let mut tiles = self.tiles.write();
        let tile = tiles.get_mut(&index).ok_or("tile vanished during load")?;
        tile.fill_channel(channel, TileChannel { texture, bytes: size }, w, h);
        Ok(())
    }

    fn fail_tile(&mut self, index: TileIndex, finished: &mut SmallVec<[TileCompletion; 4]>) {
        self.requested.remove(&index);
        self.tiles.write().remove(&index);
        finished.push((index, None));
    }

    // ------------------------------------------------------------------
    // Frame interface: draw side.

    /// Advance animations, rebuild the program if required, and stage
    /// vertex/index buffers and bind groups for every available tile.
    /// Returns true when every animation has settled.
    pub fn prepare_frame(
        &mut self,
        gpu: &Gpu,
        target_format: wgpu::TextureFormat,
        camera_transform: &Transform,
        viewport: &Viewport,
        now: f64,
    ) -> bool {
        self.frame = None;
        if !self.visible || !self.layout.read().is_ready() {
            return true;
        }
        let all_done = self.controls.interpolate_all(now);
        self.push_controls_to_shader();

        let layer_transform = self.transform;
        let shader = &mut self.shaders[self.active_shader].1;
        if shader.needs_update() {
            if let Err(err) = shader.build(gpu, target_format) {
                warn!("shader build failed; skipping layer {}: {}", self.id, err);
                return all_done;
            }
        }
        let full = camera_transform.compose(&layer_transform);
        let matrix = full.projection_matrix(viewport);
        let mut m = [0f32; 16];
        m.copy_from_slice(matrix.as_slice());
        shader.set_matrix(m);
        if let Err(err) = shader.update_uniforms(gpu) {
            warn!("uniform push failed for layer {}: {}", self.id, err);
            return all_done;
        }

        let draws = {
            let tiles = self.tiles.read();
            self.layout.read().available(
                viewport,
                camera_transform,
                &layer_transform,
                self.mipmap_bias,
                &tiles,
            )
        };
        if draws.is_empty() {
            return all_done;
        }
        // Coarse stand-ins first so finer tiles paint over them.
        let mut ordered: Vec<_> = draws.into_values().collect();
        ordered.sort_by_key(|d| d.level);

        let channels = self.channel_count();
        let mut vertex_data: Vec<f32> = Vec::with_capacity(ordered.len() * 20);
        let mut index_data: Vec<u32> = Vec::with_capacity(ordered.len() * 6);
        let mut staged = Vec::with_capacity(ordered.len());
        {
            let mut tiles = self.tiles.write();
            for draw in &ordered {
                let Some(tile) = tiles.get_mut(&draw.index) else {
                    continue;
                };
                tile.time = self.frame_stamp;
                let mut views = Vec::with_capacity(channels);
                for ch in 0..channels {
                    match tile.textures.get(ch).and_then(Option::as_ref) {
                        Some(t) => views.push(
                            t.texture
                                .create_view(&wgpu::TextureViewDescriptor::default()),
                        ),
                        None => break,
                    }
                }
                if views.len() < channels {
                    continue;
                }
                let filter_views = self.collect_filter_views();
                let Some(filter_views) = filter_views else {
                    continue;
                };
                let mut view_refs: Vec<&wgpu::TextureView> = views.iter().collect();
                view_refs.extend(filter_views.iter().map(|view| view.as_ref()));
                let shader = &self.shaders[self.active_shader].1;
                let Ok(bind_group) = shader.create_bind_group(gpu, &view_refs) else {
                    continue;
                };
                let base = (vertex_data.len() / 5) as u32;
                let (coords, tcoords) =
                    self.layout.read().tile_coords(draw.level, draw.x, draw.y);
                for v in 0..4 {
                    vertex_data.extend_from_slice(&coords[v * 3..v * 3 + 3]);
                    vertex_data.extend_from_slice(&tcoords[v * 2..v * 2 + 2]);
                }
                let first = index_data.len() as u32;
                index_data
                    .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
                staged.push((bind_group, first, 6u32));
            }
        }
        if staged.is_empty() {
            return all_done;
        }
        let vertex = gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layer-vertices"),
                contents: vertex_data.as_bytes(),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index = gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layer-indices"),
                contents: index_data.as_bytes(),
                usage: wgpu::BufferUsages::INDEX,
            });
        self.frame = Some(FrameBuffers {
            vertex,
            index,
            draws: staged,
        });
        if !self.emitted_ready {
            self.emitted_ready = true;
            self.status = LayerStatus::Ready;
            self.signals.emit("ready");
        }
        all_done
    }

    fn collect_filter_views(&self) -> Option<Vec<Arc<wgpu::TextureView>>> {
        let shader = self.active_shader();
        let wanted = shader.sampler_count() - shader.channel_count();
        if wanted == 0 {
            return Some(Vec::new());
        }
        let mut views = Vec::with_capacity(wanted);
        for sampler in shader.samplers().iter().skip(shader.channel_count()) {
            match self
                .filter_textures
                .iter()
                .find(|(name, _)| name == &sampler.name)
            {
                Some((_, view)) => views.push(view.clone()),
                None => {
                    warn!("no texture bound for filter sampler {}", sampler.name);
                    return None;
                }
            }
        }
        Some(views)
    }

    fn push_controls_to_shader(&mut self) {
        let mut updates: Vec<(String, UniformValue)> = Vec::new();
        for (name, value) in self.controls.iter_current() {
            let uniform = match value.len() {
                1 => UniformValue::Float(value[0] as f32),
                2 => UniformValue::Vec2([value[0] as f32, value[1] as f32]),
                3 => UniformValue::Vec3([value[0] as f32, value[1] as f32, value[2] as f32]),
                4 => UniformValue::Vec4([
                    value[0] as f32,
                    value[1] as f32,
                    value[2] as f32,
                    value[3] as f32,
                ]),
                _ => continue,
            };
            updates.push((name.to_owned(), uniform));
        }
        let shader = &mut self.shaders[self.active_shader].1;
        for (name, uniform) in updates {
            if shader.uniform(&name).is_some() {
                let _ = shader.set_uniform(&name, uniform);
            }
        }
    }

    /// Issue the staged draw calls. `prepare_frame` must have run for this
    /// frame; a layer with nothing staged draws nothing.
    pub fn render<'a>(&'a self, rpass: &mut wgpu::RenderPass<'a>) {
        let Some(frame) = self.frame.as_ref() else {
            return;
        };
        let Ok(pipeline) = self.active_shader().pipeline() else {
            return;
        };
        rpass.set_pipeline(pipeline);
        rpass.set_vertex_buffer(0, frame.vertex.slice(..));
        rpass.set_index_buffer(frame.index.slice(..), wgpu::IndexFormat::Uint32);
        for (bind_group, first, count) in &frame.draws {
            rpass.set_bind_group(0, bind_group, &[]);
            rpass.draw_indexed(*first..first + count, 0, 0..1);
        }
    }

    /// Device loss: drop compiled programs and every resident texture; the
    /// next frames rebuild and re-fetch lazily.
    pub fn restore_context(&mut self) {
        for (_, shader) in &mut self.shaders {
            shader.invalidate();
        }
        self.frame = None;
        if self.owns_tiles {
            self.tiles.write().clear();
            self.requested.clear();
            self.queue.clear();
        }
    }
}

/// Missing-counter after a shader switch: channels the new shader samples
/// minus those already resident.
fn rebuilt_missing(textures: &[Option<TileChannel>], new_channels: usize) -> i32 {
    let present = textures
        .iter()
        .take(new_channels)
        .filter(|t| t.is_some())
        .count();
    new_channels as i32 - present as i32
}

impl CacheClient for Layer {
    fn peek_candidate(&self) -> Option<Candidate> {
        let tiles = self.tiles.read();
        self.queue
            .iter()
            .find(|c| {
                !self.requested.contains_key(&c.index)
                    && !tiles.get(&c.index).map_or(false, Tile::is_complete)
            })
            .copied()
    }

    fn start_load(&mut self, index: TileIndex) -> bool {
        if self.requested.contains_key(&index) {
            return false;
        }
        if self.tiles.read().get(&index).map_or(false, Tile::is_complete) {
            return false;
        }
        let Some(spec) = self.specs.get(&index).copied() else {
            return false;
        };
        let channels = self.channel_count();
        let fetch = match self.layout.read().tile_fetches(&spec, channels) {
            Ok(fetch) => fetch,
            Err(err) => {
                warn!("no fetch plan for {:?}: {}", index, err);
                self.queue.retain(|c| c.index != index);
                return false;
            }
        };
        let plan = match fetch {
            TileFetch::PerChannel(requests) => {
                for (channel, request) in requests.iter().take(channels).enumerate() {
                    self.fetch_queue.request(
                        tile_key(index, channel),
                        &request.url,
                        request.range,
                    );
                }
                LoadPlan {
                    interleaved_offsets: None,
                }
            }
            TileFetch::Interleaved {
                url,
                start,
                end,
                offsets,
            } => {
                self.fetch_queue
                    .request(tile_key(index, 0), &url, Some((start, end)));
                LoadPlan {
                    interleaved_offsets: Some(offsets),
                }
            }
        };
        let mut tiles = self.tiles.write();
        tiles.insert(index, Tile::from_spec(&spec, channels, self.frame_stamp));
        self.requested.insert(index, plan);
        self.queue.retain(|c| c.index != index);
        true
    }

    fn worst_resident(&self) -> Option<ResidentTile> {
        let tiles = self.tiles.read();
        tiles
            .iter()
            .filter(|(_, t)| t.is_complete())
            .min_by_key(|(_, t)| (t.time, t.priority))
            .map(|(index, t)| ResidentTile {
                index: *index,
                time: t.time,
                priority: t.priority,
                bytes: t.size,
            })
    }

    fn drop_tile(&mut self, index: TileIndex) -> u64 {
        self.requested.remove(&index);
        self.tiles
            .write()
            .remove(&index)
            .map_or(0, |tile| tile.size)
    }

    fn flush_tiles(&mut self) -> u64 {
        let mut tiles = self.tiles.write();
        let freed = tiles.values().map(|t| t.size).sum();
        tiles.clear();
        self.requested.clear();
        self.queue.clear();
        self.specs.clear();
        freed
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("zindex", &self.zindex)
            .field("visible", &self.visible)
            .field("derived", &!self.owns_tiles)
            .field("tiles", &self.tiles.read().len())
            .field("queued", &self.queue.len())
            .field("requested", &self.requested.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use layout::LayoutType;
    use shader::ShaderDesc;

    fn rgb_shader(label: &str) -> Shader {
        Shader::new(ShaderDesc {
            label: label.to_owned(),
            samplers: vec!["kd".to_owned()],
            ..Default::default()
        })
        .unwrap()
    }

    fn google_desc() -> LayerDesc {
        LayerDesc {
            id: "base".to_owned(),
            label: "Base".to_owned(),
            layout: LayoutDesc {
                ty: LayoutType::Google,
                urls: vec!["http://invalid.test/pyr".to_owned()],
                width: 2048,
                height: 2048,
                ..Default::default()
            },
            rasters: vec![Raster::new(
                raster::SampleFormat::Vec4,
                raster::Colorspace::Srgb,
            )],
            shaders: vec![("rgb".to_owned(), rgb_shader("rgb"))],
            ..Default::default()
        }
    }

    fn layer() -> (Layer, Fetcher) {
        let fetcher = Fetcher::standalone().unwrap();
        let layer = Layer::new(google_desc(), &fetcher).unwrap();
        (layer, fetcher)
    }

    #[test]
    fn test_control_animation_law() {
        let (mut layer, _fetcher) = layer();
        layer.add_control("light", &[0., 0.]);
        assert!(layer.set_control("light", &[0.5, 0.5], 200., Easing::EaseOut, 0.));
        // Monotone per axis while running, exact at the end.
        let mut prev = [0., 0.];
        for t in [0., 100., 200.] {
            layer.interpolate_controls(t);
            let cur = layer.control("light").unwrap().current().value.clone();
            assert!(cur[0] >= prev[0] && cur[1] >= prev[1]);
            prev = [cur[0], cur[1]];
        }
        assert_eq!(prev, [0.5, 0.5]);
    }

    #[test]
    fn test_prefetch_fills_queue_and_start_load_is_once() {
        let (mut layer, _fetcher) = layer();
        let viewport = Viewport::with_extent(512, 512);
        let camera_transform = Transform::new(-512., -512., 0.5, 0.);
        assert!(layer.prefetch(&camera_transform, &viewport));
        let head = layer.peek_candidate().unwrap();
        assert!(layer.start_load(head.index));
        // Duplicate admission is rejected while the fetch is in flight.
        assert!(!layer.start_load(head.index));
        assert!(layer.tiles.read().contains_key(&head.index));
        // The queue advanced past the admitted tile.
        assert_ne!(layer.peek_candidate().map(|c| c.index), Some(head.index));
    }

    #[test]
    fn test_derived_layer_shares_tiles_and_never_fetches() {
        let (mut base, _fetcher) = layer();
        let derived = base
            .derive(DeriveDesc {
                id: "relit".to_owned(),
                label: "Relit".to_owned(),
                zindex: 1,
                shaders: vec![("alt".to_owned(), rgb_shader("alt"))],
                active_shader: None,
                transform: None,
            })
            .unwrap();
        assert!(derived.is_derived());
        assert!(base.shares_tiles_with(&derived));

        let viewport = Viewport::with_extent(512, 512);
        let camera_transform = Transform::new(-512., -512., 0.5, 0.);
        assert!(base.prefetch(&camera_transform, &viewport));
        let mut derived = derived;
        // Derived prefetch contributes no candidates and allocates nothing.
        assert!(!derived.prefetch(&camera_transform, &viewport));
        assert!(derived.peek_candidate().is_none());
    }

    #[test]
    fn test_rebuilt_missing_counts_shared_channels() {
        // Three channels, first two resident.
        let textures: Vec<Option<TileChannel>> = vec![None, None, None];
        assert_eq!(rebuilt_missing(&textures, 3), 3);
        assert_eq!(rebuilt_missing(&textures, 1), 1);
        // Presence cannot be faked without a device; the arithmetic over
        // `take(new_channels)` is what matters here.
        assert_eq!(rebuilt_missing(&textures[..2], 2), 2);
    }

    #[test]
    fn test_state_round_trip() {
        let (mut layer, _fetcher) = layer();
        layer.add_control("light", &[0.3, 0.7]);
        let state = layer.get_state();
        assert_eq!(state.control("light"), Some(&[0.3, 0.7][..]));

        let mut restored = LayerState::default();
        restored
            .controls
            .push(("light".to_owned(), vec![1., 0.]));
        layer.set_state(&restored, 0., Easing::Linear, 0.);
        layer.interpolate_controls(0.);
        assert_eq!(
            layer.control("light").unwrap().current().value.as_slice(),
            &[1., 0.]
        );
    }

    #[test]
    fn test_failed_tile_is_retried_on_next_prefetch() {
        let (mut layer, _fetcher) = layer();
        let viewport = Viewport::with_extent(512, 512);
        let camera_transform = Transform::new(-512., -512., 0.5, 0.);
        layer.prefetch(&camera_transform, &viewport);
        let head = layer.peek_candidate().unwrap();
        assert!(layer.start_load(head.index));
        let mut finished = SmallVec::new();
        layer.fail_tile(head.index, &mut finished);
        assert_eq!(finished.as_slice(), &[(head.index, None)]);
        // Re-running prefetch re-emits the tile.
        layer.prefetch(&camera_transform, &viewport);
        assert!(layer
            .queue
            .iter()
            .any(|candidate| candidate.index == head.index));
    }

    #[test]
    fn test_context_restore_invalidates_everything() {
        let (mut layer, _fetcher) = layer();
        let viewport = Viewport::with_extent(512, 512);
        let camera_transform = Transform::new(-512., -512., 0.5, 0.);
        layer.prefetch(&camera_transform, &viewport);
        let head = layer.peek_candidate().unwrap();
        layer.start_load(head.index);
        layer.restore_context();
        assert!(layer.active_shader().needs_update());
        assert!(!layer.active_shader().is_built());
        assert!(layer.tiles.read().is_empty());
        assert!(layer.requested.is_empty());
    }

    #[test]
    fn test_shader_slot_rules() {
        let (mut layer, _fetcher) = layer();
        layer
            .add_shader("alt".to_owned(), rgb_shader("alt"))
            .unwrap();
        assert!(matches!(
            layer.set_shader("nope"),
            Err(LayerError::UnknownShader(_))
        ));
        layer.set_shader("alt").unwrap();
        assert_eq!(layer.active_shader().label(), "alt");
        assert!(matches!(
            layer.remove_shader("alt"),
            Err(LayerError::Config(_))
        ));
        layer.remove_shader("rgb").unwrap();
    }
}
