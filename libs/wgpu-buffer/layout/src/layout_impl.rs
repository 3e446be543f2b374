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
use crate::{
    manifest::{parse_dzi, parse_iiif_info, parse_tzi, parse_zoomify, ArchiveIndex, ImageDims},
    tile::{Tile, TileIndex, TileSpec},
    LayoutError,
};
use camera::{Transform, Viewport};
use fxhash::FxHashMap;
use geometry::BoundingBox;
use log::debug;
use signals::{Callback, SignalHandle, Signals};
use smallvec::SmallVec;

/// The wire families a pyramid can be served in. Levels are numbered with 0
/// the coarsest throughout; each family maps that onto its own conventions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LayoutType {
    /// A single untiled image per channel.
    Image,
    /// `<base>_files/<level>/<x>_<y>.<ext>` with a `.dzi` descriptor.
    DeepZoom,
    /// `<base>/<level>/<y>/<x>.<ext>`, dimensions supplied by the caller.
    Google,
    /// `<base>/TileGroup<g>/<level>-<x>-<y>.<ext>` with ImageProperties.xml.
    Zoomify,
    /// IIIF Image API region/size requests driven by info.json.
    Iiif,
    /// One byte-range archive per channel, indexed by a `.tzi` manifest.
    Tarzoom,
    /// One archive interleaving every channel; a single range request
    /// returns all channels of a tile.
    ITarzoom,
    /// Explicitly placed tiles, one level, caller-supplied rectangles.
    TileArray,
}

#[derive(Clone, Debug)]
pub struct TileRectDesc {
    pub rect: BoundingBox,
    pub urls: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LayoutDesc {
    pub ty: LayoutType,
    /// One URL per raster channel for most families; the manifest URL(s)
    /// for the manifest-bearing ones.
    pub urls: Vec<String>,
    /// Required up front for Image, Google and TileArray; learned from the
    /// manifest otherwise.
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
    pub tile_rects: Vec<TileRectDesc>,
}

impl Default for LayoutDesc {
    fn default() -> Self {
        Self {
            ty: LayoutType::Image,
            urls: Vec::new(),
            width: 0,
            height: 0,
            tile_size: 256,
            overlap: 0,
            format: "jpg".to_owned(),
            tile_rects: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LayoutStatus {
    Pending,
    Ready,
    Failed(String),
}

/// How to obtain the bytes of one tile.
#[derive(Clone, Debug, PartialEq)]
pub enum TileFetch {
    /// One request per raster channel.
    PerChannel(SmallVec<[ChannelFetch; 4]>),
    /// One range request covering every channel; `offsets` are relative to
    /// `start`, with a trailing end offset, one segment per channel.
    Interleaved {
        url: String,
        start: u64,
        end: u64,
        offsets: SmallVec<[u64; 8]>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelFetch {
    pub url: String,
    pub range: Option<(u64, u64)>,
}

/// One draw decision out of `available`: which resident tile stands in for
/// a wanted region, and whether it is exactly the wanted tile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileDraw {
    pub index: TileIndex,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    /// False when a coarser ancestor is standing in for missing leaves;
    /// finer tiles may overdraw it as they land.
    pub complete: bool,
}

/// The tile pyramid index: pure geometry once `Ready`. Maps (level, x, y)
/// to identities, scene quads and wire requests, and computes the needed
/// and available tile sets for a viewport.
pub struct Layout {
    ty: LayoutType,
    urls: Vec<String>,
    status: LayoutStatus,
    dims: ImageDims,
    nlevels: u32,
    /// tiles_x, tiles_y per level, level 0 coarsest.
    level_tiles: Vec<(u32, u32)>,
    /// Cumulative tile counts; flat/global indices count coarse-first.
    level_offsets: Vec<u64>,
    archives: Vec<ArchiveIndex>,
    tile_rects: Vec<TileRectDesc>,
    manifests_pending: usize,
    signals: Signals,
}

impl Layout {
    pub fn new(desc: LayoutDesc) -> Result<Self, LayoutError> {
        if desc.urls.is_empty() && desc.ty != LayoutType::TileArray {
            return Err(LayoutError::Config("no urls supplied".to_owned()));
        }
        let mut layout = Self {
            ty: desc.ty,
            urls: desc.urls,
            status: LayoutStatus::Pending,
            dims: ImageDims {
                width: desc.width,
                height: desc.height,
                tile_size: desc.tile_size,
                overlap: desc.overlap,
                format: desc.format,
            },
            nlevels: 0,
            level_tiles: Vec::new(),
            level_offsets: Vec::new(),
            archives: Vec::new(),
            tile_rects: desc.tile_rects,
            manifests_pending: 0,
            signals: Signals::new(&["ready", "updateSize"]),
        };
        match layout.ty {
            LayoutType::Image | LayoutType::Google => {
                if layout.dims.width == 0 || layout.dims.height == 0 {
                    return Err(LayoutError::Config(
                        "width/height required for untiled and google layouts".to_owned(),
                    ));
                }
                if layout.ty == LayoutType::Image {
                    layout.dims.tile_size = 0;
                }
                layout.finalize();
            }
            LayoutType::TileArray => {
                if layout.tile_rects.is_empty() {
                    return Err(LayoutError::Config("tile array without tiles".to_owned()));
                }
                layout.finalize();
            }
            LayoutType::DeepZoom | LayoutType::Zoomify | LayoutType::Iiif | LayoutType::ITarzoom => {
                layout.manifests_pending = 1;
            }
            LayoutType::Tarzoom => {
                layout.manifests_pending = layout.urls.len();
                layout.archives = Vec::new();
            }
        }
        Ok(layout)
    }

    pub fn on(&mut self, name: &'static str, callback: Callback) -> Option<SignalHandle> {
        self.signals.on(name, callback)
    }

    pub fn status(&self) -> &LayoutStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == LayoutStatus::Ready
    }

    /// The manifests still to fetch, as (slot, url). Empty for the
    /// manifest-free families and once resolution completes.
    pub fn manifest_requests(&self) -> Vec<(usize, String)> {
        if self.status != LayoutStatus::Pending || self.manifests_pending == 0 {
            return Vec::new();
        }
        match self.ty {
            LayoutType::DeepZoom | LayoutType::Iiif | LayoutType::ITarzoom => {
                vec![(0, self.urls[0].clone())]
            }
            LayoutType::Zoomify => vec![(0, format!("{}/ImageProperties.xml", self.urls[0]))],
            LayoutType::Tarzoom => self
                .urls
                .iter()
                .enumerate()
                .map(|(slot, url)| (slot, url.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Feed one manifest's bytes back in. Ready is entered when the last
    /// outstanding manifest parses; any parse failure is fatal for the
    /// layout.
    pub fn apply_manifest(&mut self, slot: usize, bytes: &[u8]) -> Result<(), LayoutError> {
        debug_assert!(self.status == LayoutStatus::Pending);
        let text = String::from_utf8_lossy(bytes);
        let parsed = match self.ty {
            LayoutType::DeepZoom => parse_dzi(&text).map(|dims| (dims, None)),
            LayoutType::Zoomify => parse_zoomify(&text).map(|dims| (dims, None)),
            LayoutType::Iiif => parse_iiif_info(&text).map(|dims| (dims, None)),
            LayoutType::Tarzoom | LayoutType::ITarzoom => {
                parse_tzi(&text).map(|archive| (archive.dims.clone(), Some(archive)))
            }
            _ => Err(LayoutError::Config(
                "layout type takes no manifest".to_owned(),
            )),
        };
        match parsed {
            Ok((dims, archive)) => {
                if let Some(archive) = archive {
                    if self.archives.len() <= slot {
                        self.archives.resize(slot + 1, archive.clone());
                    }
                    self.archives[slot] = archive;
                }
                self.dims = dims;
                self.manifests_pending -= 1;
                if self.manifests_pending == 0 {
                    self.finalize();
                }
                Ok(())
            }
            Err(err) => {
                self.status = LayoutStatus::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Mark resolution failed for reasons outside parsing (fetch errors).
    pub fn fail(&mut self, message: String) {
        self.status = LayoutStatus::Failed(message);
    }

    fn finalize(&mut self) {
        let (w, h, ts) = (self.dims.width, self.dims.height, self.dims.tile_size);
        if self.ty == LayoutType::TileArray {
            self.nlevels = 1;
            self.level_tiles = vec![(self.tile_rects.len() as u32, 1)];
            self.level_offsets = vec![0, self.tile_rects.len() as u64];
        } else if ts == 0 {
            self.nlevels = 1;
            self.level_tiles = vec![(1, 1)];
            self.level_offsets = vec![0, 1];
        } else {
            let mut nlevels = 1u32;
            let mut side = ts;
            while side < w.max(h) {
                side *= 2;
                nlevels += 1;
            }
            self.nlevels = nlevels;
            self.level_tiles.clear();
            self.level_offsets = vec![0];
            let mut total = 0u64;
            for level in 0..nlevels {
                let scale = 1u32 << (nlevels - 1 - level);
                let lw = (w + scale - 1) / scale;
                let lh = (h + scale - 1) / scale;
                let tx = (lw + ts - 1) / ts;
                let ty = (lh + ts - 1) / ts;
                self.level_tiles.push((tx, ty));
                total += tx as u64 * ty as u64;
                self.level_offsets.push(total);
            }
        }
        self.status = LayoutStatus::Ready;
        debug!(
            "layout ready: {}x{} tiles={} levels={}",
            w,
            h,
            self.level_offsets.last().copied().unwrap_or(0),
            self.nlevels
        );
        self.signals.emit("updateSize");
        self.signals.emit("ready");
    }

    pub fn width(&self) -> u32 {
        self.dims.width
    }

    pub fn height(&self) -> u32 {
        self.dims.height
    }

    pub fn tile_size(&self) -> u32 {
        self.dims.tile_size
    }

    pub fn nlevels(&self) -> u32 {
        self.nlevels
    }

    pub fn bounding_box(&self) -> BoundingBox {
        if self.ty == LayoutType::TileArray {
            let mut out = BoundingBox::empty();
            for t in &self.tile_rects {
                out.merge(&t.rect);
            }
            return out;
        }
        BoundingBox::new(0., 0., self.dims.width as f64, self.dims.height as f64)
    }

    pub fn tiles_at(&self, level: u32) -> (u32, u32) {
        self.level_tiles[level as usize]
    }

    pub fn index(&self, level: u32, x: u32, y: u32) -> TileIndex {
        let (tx, ty) = self.level_tiles[level as usize];
        debug_assert!(x < tx && y < ty);
        TileIndex(self.level_offsets[level as usize] + y as u64 * tx as u64 + x as u64)
    }

    /// Scene units covered by one tile edge at `level`.
    fn tile_scene_side(&self, level: u32) -> f64 {
        if self.dims.tile_size == 0 || self.ty == LayoutType::TileArray {
            return self.dims.width.max(self.dims.height) as f64;
        }
        (self.dims.tile_size as u64 * (1u64 << (self.nlevels - 1 - level))) as f64
    }

    fn scene_rect(&self, level: u32, x: u32, y: u32) -> BoundingBox {
        if self.ty == LayoutType::TileArray {
            return self.tile_rects[x as usize].rect;
        }
        if self.dims.tile_size == 0 {
            return self.bounding_box();
        }
        let side = self.tile_scene_side(level);
        BoundingBox::new(
            x as f64 * side,
            y as f64 * side,
            ((x + 1) as f64 * side).min(self.dims.width as f64),
            ((y + 1) as f64 * side).min(self.dims.height as f64),
        )
    }

    /// Vertex quad (4 x xyz) and texture quad (4 x uv) of a tile, overlap
    /// accounted for. Vertices wind counter-clockwise from the low corner.
    pub fn tile_coords(&self, level: u32, x: u32, y: u32) -> ([f32; 12], [f32; 8]) {
        let rect = self.scene_rect(level, x, y);
        let (x0, y0) = (rect.x_low as f32, rect.y_low as f32);
        let (x1, y1) = (rect.x_high as f32, rect.y_high as f32);
        #[rustfmt::skip]
        let coords = [
            x0, y0, 0.,
            x1, y0, 0.,
            x1, y1, 0.,
            x0, y1, 0.,
        ];

        let o = self.dims.overlap;
        let (mut u0, mut v0, mut u1, mut v1) = (0f32, 0f32, 1f32, 1f32);
        if o > 0 && self.dims.tile_size > 0 && self.ty != LayoutType::TileArray {
            let ts = self.dims.tile_size;
            let (tx, ty) = self.level_tiles[level as usize];
            let scale = self.tile_scene_side(level) / ts as f64;
            let tw_px = (rect.width() / scale).round() as u32;
            let th_px = (rect.height() / scale).round() as u32;
            let left = if x > 0 { o } else { 0 };
            let right = if x + 1 < tx { o } else { 0 };
            let top = if y > 0 { o } else { 0 };
            let bottom = if y + 1 < ty { o } else { 0 };
            let tex_w = (tw_px + left + right) as f32;
            let tex_h = (th_px + top + bottom) as f32;
            u0 = left as f32 / tex_w;
            u1 = (left + tw_px) as f32 / tex_w;
            v0 = top as f32 / tex_h;
            v1 = (top + th_px) as f32 / tex_h;
        }
        #[rustfmt::skip]
        let tcoords = [
            u0, v0,
            u1, v0,
            u1, v1,
            u0, v1,
        ];
        (coords, tcoords)
    }

    fn level_for(&self, zoom: f64, mipmap_bias: f64) -> u32 {
        debug_assert!(zoom > 0.);
        let down = ((1.0 / zoom).log2() + mipmap_bias).floor().max(0.) as u32;
        (self.nlevels - 1).saturating_sub(down)
    }

    fn scene_viewport_box(
        &self,
        viewport: &Viewport,
        camera_transform: &Transform,
        layer_transform: &Transform,
    ) -> BoundingBox {
        let full = camera_transform.compose(layer_transform);
        let vb = viewport.centered_box();
        let mut out = BoundingBox::empty();
        for i in 0..4 {
            out.merge_point(full.unapply(vb.corner(i)));
        }
        out.intersection(&self.bounding_box())
    }

    fn tile_range(&self, level: u32, area: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
        if area.is_empty() {
            return None;
        }
        let (tx, ty) = self.level_tiles[level as usize];
        if self.ty == LayoutType::TileArray {
            // Rects are explicit; enumerate them all and let the caller's
            // intersection test filter.
            return Some((0, 0, tx, ty));
        }
        let side = self.tile_scene_side(level);
        let x0 = ((area.x_low / side).floor().max(0.) as u32).min(tx - 1);
        let y0 = ((area.y_low / side).floor().max(0.) as u32).min(ty - 1);
        let x1 = ((area.x_high / side).ceil().max(1.) as u32).min(tx);
        let y1 = ((area.y_high / side).ceil().max(1.) as u32).min(ty);
        Some((x0, y0, x1, y1))
    }

    /// The ordered fetch wish-list for this view: the chosen level and all
    /// coarser ancestors over the border-expanded viewport, visible tiles
    /// first, priority favoring ancestors, distance from the viewport
    /// center breaking ties. Tiles already complete in `existing` are not
    /// emitted.
    pub fn needed(
        &self,
        viewport: &Viewport,
        camera_transform: &Transform,
        layer_transform: &Transform,
        prefetch_border: u32,
        mipmap_bias: f64,
        existing: &FxHashMap<TileIndex, Tile>,
    ) -> Vec<TileSpec> {
        if !self.is_ready() {
            return Vec::new();
        }
        let full = camera_transform.compose(layer_transform);
        let visible_box = self.scene_viewport_box(viewport, camera_transform, layer_transform);
        if visible_box.is_empty() {
            return Vec::new();
        }
        let chosen = if self.ty == LayoutType::TileArray {
            0
        } else {
            self.level_for(full.z, mipmap_bias)
        };
        let fetch_box =
            visible_box.expanded(prefetch_border as f64 * self.tile_scene_side(chosen));
        let center = visible_box.center();

        struct Candidate {
            spec: TileSpec,
            dist2: f64,
        }
        let mut candidates = Vec::new();
        for level in (0..=chosen).rev() {
            let Some((x0, y0, x1, y1)) = self.tile_range(level, &fetch_box) else {
                continue;
            };
            for y in y0..y1 {
                for x in x0..x1 {
                    let rect = self.scene_rect(level, x, y);
                    if !rect.intersects(&fetch_box) {
                        continue;
                    }
                    let index = self.index(level, x, y);
                    if existing.get(&index).map_or(false, Tile::is_complete) {
                        continue;
                    }
                    let d = rect.center() - center;
                    candidates.push(Candidate {
                        spec: TileSpec {
                            index,
                            level,
                            x,
                            y,
                            priority: chosen - level,
                            in_view: rect.intersects(&visible_box),
                        },
                        dist2: d.x * d.x + d.y * d.y,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.spec
                .in_view
                .cmp(&a.spec.in_view)
                .then(b.spec.priority.cmp(&a.spec.priority))
                .then(a.dist2.partial_cmp(&b.dist2).unwrap_or(std::cmp::Ordering::Equal))
        });
        candidates.into_iter().map(|c| c.spec).collect()
    }

    /// What to draw this frame: for every wanted leaf, the nearest complete
    /// tile on its ancestor chain, flagged incomplete when it stands in for
    /// finer content.
    pub fn available(
        &self,
        viewport: &Viewport,
        camera_transform: &Transform,
        layer_transform: &Transform,
        mipmap_bias: f64,
        tiles: &FxHashMap<TileIndex, Tile>,
    ) -> FxHashMap<TileIndex, TileDraw> {
        let mut torender = FxHashMap::default();
        if !self.is_ready() {
            return torender;
        }
        let full = camera_transform.compose(layer_transform);
        let visible_box = self.scene_viewport_box(viewport, camera_transform, layer_transform);
        let chosen = if self.ty == LayoutType::TileArray {
            0
        } else {
            self.level_for(full.z, mipmap_bias)
        };
        let Some((x0, y0, x1, y1)) = self.tile_range(chosen, &visible_box) else {
            return torender;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                if !self.scene_rect(chosen, x, y).intersects(&visible_box) {
                    continue;
                }
                // Walk up the ancestor chain to the nearest complete tile.
                for level in (0..=chosen).rev() {
                    let shift = chosen - level;
                    let (ax, ay) = (x >> shift, y >> shift);
                    let index = self.index(level, ax, ay);
                    if tiles.get(&index).map_or(false, Tile::is_complete) {
                        let complete = level == chosen;
                        torender
                            .entry(index)
                            .and_modify(|draw: &mut TileDraw| draw.complete &= complete)
                            .or_insert(TileDraw {
                                index,
                                level,
                                x: ax,
                                y: ay,
                                complete,
                            });
                        break;
                    }
                }
            }
        }
        torender
    }

    /// The wire requests for one tile given the layer's channel count.
    pub fn tile_fetches(&self, spec: &TileSpec, channels: usize) -> Result<TileFetch, LayoutError> {
        if !self.is_ready() {
            return Err(LayoutError::NotReady);
        }
        let flat = spec.index.0 as usize;
        let fmt = &self.dims.format;
        match self.ty {
            LayoutType::Image => Ok(TileFetch::PerChannel(
                self.urls
                    .iter()
                    .map(|url| ChannelFetch {
                        url: url.clone(),
                        range: None,
                    })
                    .collect(),
            )),
            LayoutType::TileArray => {
                let rect = &self.tile_rects[spec.x as usize];
                Ok(TileFetch::PerChannel(
                    rect.urls
                        .iter()
                        .map(|url| ChannelFetch {
                            url: url.clone(),
                            range: None,
                        })
                        .collect(),
                ))
            }
            LayoutType::DeepZoom => {
                let wire = spec.level + self.deepzoom_wire_offset();
                Ok(TileFetch::PerChannel(
                    self.urls
                        .iter()
                        .map(|url| ChannelFetch {
                            url: format!(
                                "{}_files/{}/{}_{}.{}",
                                strip_suffix(url, ".dzi"),
                                wire,
                                spec.x,
                                spec.y,
                                fmt
                            ),
                            range: None,
                        })
                        .collect(),
                ))
            }
            LayoutType::Google => Ok(TileFetch::PerChannel(
                self.urls
                    .iter()
                    .map(|url| ChannelFetch {
                        url: format!("{}/{}/{}/{}.{}", url, spec.level, spec.y, spec.x, fmt),
                        range: None,
                    })
                    .collect(),
            )),
            LayoutType::Zoomify => {
                let group = flat / 256;
                Ok(TileFetch::PerChannel(
                    self.urls
                        .iter()
                        .map(|url| ChannelFetch {
                            url: format!(
                                "{}/TileGroup{}/{}-{}-{}.{}",
                                url, group, spec.level, spec.x, spec.y, fmt
                            ),
                            range: None,
                        })
                        .collect(),
                ))
            }
            LayoutType::Iiif => {
                let scale = 1u64 << (self.nlevels - 1 - spec.level);
                let ts = self.dims.tile_size as u64;
                let rx = spec.x as u64 * ts * scale;
                let ry = spec.y as u64 * ts * scale;
                let rw = (ts * scale).min(self.dims.width as u64 - rx);
                let rh = (ts * scale).min(self.dims.height as u64 - ry);
                let sw = (rw + scale - 1) / scale;
                Ok(TileFetch::PerChannel(
                    self.urls
                        .iter()
                        .map(|url| ChannelFetch {
                            url: format!(
                                "{}/{},{},{},{}/{},/0/default.{}",
                                strip_suffix(url, "/info.json"),
                                rx,
                                ry,
                                rw,
                                rh,
                                sw,
                                fmt
                            ),
                            range: None,
                        })
                        .collect(),
                ))
            }
            LayoutType::Tarzoom => {
                let mut fetches = SmallVec::new();
                for (channel, url) in self.urls.iter().enumerate() {
                    let archive = self
                        .archives
                        .get(channel)
                        .ok_or(LayoutError::NotReady)?;
                    let range = archive.segment(flat).ok_or_else(|| {
                        LayoutError::Config(format!("tile {} outside archive index", flat))
                    })?;
                    fetches.push(ChannelFetch {
                        url: format!("{}.tzb", strip_suffix(url, ".tzi")),
                        range: Some(range),
                    });
                }
                Ok(TileFetch::PerChannel(fetches))
            }
            LayoutType::ITarzoom => {
                let archive = self.archives.first().ok_or(LayoutError::NotReady)?;
                let nchan = archive.channels.max(1) as usize;
                debug_assert_eq!(nchan, channels);
                let base = flat * nchan;
                let start = *archive
                    .offsets
                    .get(base)
                    .ok_or_else(|| LayoutError::Config("tile outside archive".to_owned()))?;
                let end = *archive
                    .offsets
                    .get(base + nchan)
                    .ok_or_else(|| LayoutError::Config("tile outside archive".to_owned()))?;
                let offsets = archive.offsets[base..=base + nchan]
                    .iter()
                    .map(|&o| o - start)
                    .collect();
                Ok(TileFetch::Interleaved {
                    url: format!("{}.tzb", strip_suffix(&self.urls[0], ".tzi")),
                    start,
                    end,
                    offsets,
                })
            }
        }
    }

    fn deepzoom_wire_offset(&self) -> u32 {
        let mut max_wire = 0u32;
        let mut side = 1u32;
        while side < self.dims.width.max(self.dims.height) {
            side = side.saturating_mul(2);
            max_wire += 1;
        }
        max_wire - (self.nlevels - 1)
    }
}

fn strip_suffix<'a>(url: &'a str, suffix: &str) -> &'a str {
    url.strip_suffix(suffix).unwrap_or(url)
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("ty", &self.ty)
            .field("status", &self.status)
            .field("nlevels", &self.nlevels)
            .field("width", &self.dims.width)
            .field("height", &self.dims.height)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn deepzoom_2048() -> Layout {
        let mut layout = Layout::new(LayoutDesc {
            ty: LayoutType::DeepZoom,
            urls: vec!["http://example.com/img.dzi".to_owned()],
            ..Default::default()
        })
        .unwrap();
        let dzi = r#"<Image TileSize="256" Overlap="0" Format="jpg">
                       <Size Width="2048" Height="2048"/></Image>"#;
        layout.apply_manifest(0, dzi.as_bytes()).unwrap();
        layout
    }

    #[test]
    fn test_pyramid_shape() {
        let layout = deepzoom_2048();
        assert!(layout.is_ready());
        assert_eq!(layout.nlevels(), 4);
        assert_eq!(layout.tiles_at(3), (8, 8));
        assert_eq!(layout.tiles_at(0), (1, 1));
        assert_eq!(
            layout.bounding_box(),
            BoundingBox::new(0., 0., 2048., 2048.)
        );
    }

    #[test]
    fn test_index_is_bijective_per_level() {
        let layout = deepzoom_2048();
        let mut seen = std::collections::HashSet::new();
        for level in 0..4 {
            let (tx, ty) = layout.tiles_at(level);
            for y in 0..ty {
                for x in 0..tx {
                    assert!(seen.insert(layout.index(level, x, y)));
                }
            }
        }
        // 1 + 4 + 16 + 64
        assert_eq!(seen.len(), 85);
        assert_eq!(seen.iter().map(|i| i.0).max(), Some(84));
    }

    #[test]
    fn test_tile_coords_winding_and_uvs() {
        let layout = deepzoom_2048();
        let (coords, tcoords) = layout.tile_coords(3, 2, 5);
        // Signed (shoelace) area positive: counter-clockwise.
        let mut area = 0f32;
        for i in 0..4 {
            let (ax, ay) = (coords[i * 3], coords[i * 3 + 1]);
            let j = (i + 1) % 4;
            let (bx, by) = (coords[j * 3], coords[j * 3 + 1]);
            area += ax * by - bx * ay;
        }
        assert!(area > 0.);
        assert!(tcoords.iter().all(|&t| (0. ..=1.).contains(&t)));
        assert_eq!(&coords[0..2], &[512., 1280.]);
    }

    #[test]
    fn test_tile_coords_overlap_insets_uvs() {
        let mut layout = Layout::new(LayoutDesc {
            ty: LayoutType::DeepZoom,
            urls: vec!["http://example.com/img.dzi".to_owned()],
            ..Default::default()
        })
        .unwrap();
        let dzi = r#"<Image TileSize="256" Overlap="1" Format="jpg">
                       <Size Width="1024" Height="1024"/></Image>"#;
        layout.apply_manifest(0, dzi.as_bytes()).unwrap();
        // Interior tile: 258x258 texture holding 256 payload pixels.
        let (_, tcoords) = layout.tile_coords(2, 1, 1);
        let expect = 1. / 258.;
        assert!((tcoords[0] - expect).abs() < 1e-6);
        assert!((tcoords[2] - (257. / 258.)).abs() < 1e-6);
        // Corner tile has no left/top border.
        let (_, tcoords) = layout.tile_coords(2, 0, 0);
        assert_eq!(tcoords[0], 0.);
        assert_eq!(tcoords[1], 0.);
    }

    fn viewport() -> Viewport {
        Viewport::with_extent(1024, 1024)
    }

    fn fit_transform() -> Transform {
        // 2048 scene units into 1024 px: z = 0.5, centered.
        Transform::new(-1024. * 0.5, -1024. * 0.5, 0.5, 0.)
    }

    #[test]
    fn test_level_selection_follows_zoom_and_bias() {
        let layout = deepzoom_2048();
        assert_eq!(layout.level_for(1.0, 0.), 3);
        assert_eq!(layout.level_for(0.5, 0.), 2);
        assert_eq!(layout.level_for(0.25, 0.), 1);
        assert_eq!(layout.level_for(4.0, 0.), 3);
        // Bias >= 1 steps toward lower resolution.
        assert_eq!(layout.level_for(1.0, 1.), 2);
        assert_eq!(layout.level_for(0.0625, 0.), 0);
    }

    #[test]
    fn test_needed_prefers_visible_and_near() {
        let layout = deepzoom_2048();
        let existing = FxHashMap::default();
        let needed = layout.needed(
            &viewport(),
            &fit_transform(),
            &Transform::default(),
            1,
            0.,
            &existing,
        );
        assert!(!needed.is_empty());
        // The whole image is visible at fit: every level-2 tile plus all
        // ancestors are wanted; ancestors sort first via priority.
        assert_eq!(needed[0].level, 0);
        assert_eq!(needed[0].priority, 2);
        let leaves = needed.iter().filter(|s| s.level == 2).count();
        assert_eq!(leaves, 16);
        // Distances to the viewport center grow monotonically among the
        // visible leaf tiles.
        let center = nalgebra::Point2::new(1024., 1024.);
        let mut last = -1.0f64;
        for spec in needed.iter().filter(|s| s.level == 2) {
            let side = 512.;
            let cx = (spec.x as f64 + 0.5) * side;
            let cy = (spec.y as f64 + 0.5) * side;
            let d = (cx - center.x).powi(2) + (cy - center.y).powi(2);
            assert!(d >= last - 1e-9);
            last = d;
        }
    }

    #[test]
    fn test_needed_skips_complete_tiles() {
        let layout = deepzoom_2048();
        let mut existing: FxHashMap<TileIndex, Tile> = FxHashMap::default();
        // Everything at level <= 2 is already resident and complete.
        for level in 0..=2 {
            let (tx, ty) = layout.tiles_at(level);
            for y in 0..ty {
                for x in 0..tx {
                    let spec = TileSpec {
                        index: layout.index(level, x, y),
                        level,
                        x,
                        y,
                        priority: 0,
                        in_view: true,
                    };
                    let mut tile = Tile::from_spec(&spec, 1, 0);
                    tile.missing = 0;
                    existing.insert(spec.index, tile);
                }
            }
        }
        let needed = layout.needed(
            &viewport(),
            &fit_transform(),
            &Transform::default(),
            0,
            0.,
            &existing,
        );
        assert!(needed.is_empty());
    }

    #[test]
    fn test_pan_needs_entering_column() {
        // Native zoom over a 1024px viewport shows a 4x4 tile window at
        // the leaf level; all resident. Panning right by one tile width
        // exposes one new column of 4 leaves (plus their ancestors).
        let layout = deepzoom_2048();
        let viewport = viewport();
        let layer_transform = Transform::default();
        let at = |x: f64| Transform::new(x, -1024., 1.0, 0.);

        let mut resident: FxHashMap<TileIndex, Tile> = FxHashMap::default();
        for spec in layout.needed(&viewport, &at(-1024.), &layer_transform, 0, 0., &resident) {
            let mut tile = Tile::from_spec(&spec, 1, 0);
            tile.missing = 0;
            resident.insert(spec.index, tile);
        }

        // Pan right by one tile width (camera shifts left).
        let needed = layout.needed(&viewport, &at(-1280.), &layer_transform, 0, 0., &resident);
        // Newly exposed ancestors outrank the leaves in the queue.
        assert_eq!(needed[0].level, 2);
        let new_leaves: Vec<_> = needed.iter().filter(|s| s.level == 3).collect();
        assert_eq!(new_leaves.len(), 4);
        assert!(new_leaves.iter().all(|s| s.x == 6));
        assert_eq!(
            new_leaves.iter().map(|s| s.y).collect::<Vec<_>>(),
            // Nearest the viewport center first.
            vec![3, 4, 2, 5]
        );
    }

    #[test]
    fn test_available_falls_back_to_ancestor() {
        let layout = deepzoom_2048();
        let mut tiles: FxHashMap<TileIndex, Tile> = FxHashMap::default();
        // Only the root is resident.
        let root = TileSpec {
            index: layout.index(0, 0, 0),
            level: 0,
            x: 0,
            y: 0,
            priority: 0,
            in_view: true,
        };
        let mut tile = Tile::from_spec(&root, 1, 0);
        tile.missing = 0;
        tiles.insert(root.index, tile);

        let draws = layout.available(
            &viewport(),
            &fit_transform(),
            &Transform::default(),
            0.,
            &tiles,
        );
        assert_eq!(draws.len(), 1);
        let draw = draws.values().next().unwrap();
        assert_eq!(draw.level, 0);
        assert!(!draw.complete);
    }

    #[test]
    fn test_available_prefers_leaves_once_resident() {
        let layout = deepzoom_2048();
        let mut tiles: FxHashMap<TileIndex, Tile> = FxHashMap::default();
        for level in [0u32, 2] {
            let (tx, ty) = layout.tiles_at(level);
            for y in 0..ty {
                for x in 0..tx {
                    let spec = TileSpec {
                        index: layout.index(level, x, y),
                        level,
                        x,
                        y,
                        priority: 0,
                        in_view: true,
                    };
                    let mut tile = Tile::from_spec(&spec, 1, 0);
                    tile.missing = 0;
                    tiles.insert(spec.index, tile);
                }
            }
        }
        let draws = layout.available(
            &viewport(),
            &fit_transform(),
            &Transform::default(),
            0.,
            &tiles,
        );
        assert_eq!(draws.len(), 16);
        assert!(draws.values().all(|d| d.level == 2 && d.complete));
    }

    #[test]
    fn test_deepzoom_urls() {
        let layout = deepzoom_2048();
        let spec = TileSpec {
            index: layout.index(3, 5, 2),
            level: 3,
            x: 5,
            y: 2,
            priority: 0,
            in_view: true,
        };
        let TileFetch::PerChannel(fetches) = layout.tile_fetches(&spec, 1).unwrap() else {
            panic!("expected per-channel fetches");
        };
        assert_eq!(fetches[0].url, "http://example.com/img_files/11/5_2.jpg");
        assert_eq!(fetches[0].range, None);
    }

    #[test]
    fn test_google_and_zoomify_urls() {
        let layout = Layout::new(LayoutDesc {
            ty: LayoutType::Google,
            urls: vec!["http://example.com/pyr".to_owned()],
            width: 2048,
            height: 2048,
            ..Default::default()
        })
        .unwrap();
        let spec = TileSpec {
            index: layout.index(2, 3, 1),
            level: 2,
            x: 3,
            y: 1,
            priority: 0,
            in_view: true,
        };
        let TileFetch::PerChannel(fetches) = layout.tile_fetches(&spec, 1).unwrap() else {
            panic!();
        };
        assert_eq!(fetches[0].url, "http://example.com/pyr/2/1/3.jpg");

        let mut zoomify = Layout::new(LayoutDesc {
            ty: LayoutType::Zoomify,
            urls: vec!["http://example.com/zoom".to_owned()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            zoomify.manifest_requests(),
            vec![(0, "http://example.com/zoom/ImageProperties.xml".to_owned())]
        );
        zoomify
            .apply_manifest(
                0,
                br#"<IMAGE_PROPERTIES WIDTH="2048" HEIGHT="2048" TILESIZE="256"/>"#,
            )
            .unwrap();
        let spec = TileSpec {
            index: zoomify.index(3, 7, 7),
            level: 3,
            x: 7,
            y: 7,
            priority: 0,
            in_view: true,
        };
        let TileFetch::PerChannel(fetches) = zoomify.tile_fetches(&spec, 1).unwrap() else {
            panic!();
        };
        // Flat index 84 lands in TileGroup0.
        assert_eq!(fetches[0].url, "http://example.com/zoom/TileGroup0/3-7-7.jpg");
    }

    #[test]
    fn test_itarzoom_single_range() {
        let mut layout = Layout::new(LayoutDesc {
            ty: LayoutType::ITarzoom,
            urls: vec!["http://example.com/planes.tzi".to_owned()],
            ..Default::default()
        })
        .unwrap();
        // A 256x256 single-tile pyramid with three interleaved channels.
        let tzi = br#"{"width": 256, "height": 256, "tilesize": 256,
                       "channels": 3, "offsets": [100, 180, 300, 450]}"#;
        layout.apply_manifest(0, tzi).unwrap();
        let spec = TileSpec {
            index: layout.index(0, 0, 0),
            level: 0,
            x: 0,
            y: 0,
            priority: 0,
            in_view: true,
        };
        let fetch = layout.tile_fetches(&spec, 3).unwrap();
        match fetch {
            TileFetch::Interleaved {
                url,
                start,
                end,
                offsets,
            } => {
                assert_eq!(url, "http://example.com/planes.tzb");
                assert_eq!((start, end), (100, 450));
                assert_eq!(offsets.as_slice(), &[0, 80, 200, 350]);
            }
            _ => panic!("expected one interleaved range"),
        }
    }

    #[test]
    fn test_bad_manifest_fails_layout() {
        let mut layout = Layout::new(LayoutDesc {
            ty: LayoutType::DeepZoom,
            urls: vec!["http://example.com/img.dzi".to_owned()],
            ..Default::default()
        })
        .unwrap();
        assert!(layout.apply_manifest(0, b"not xml at all").is_err());
        assert!(matches!(layout.status(), LayoutStatus::Failed(_)));
    }
}
