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
use smallvec::SmallVec;
use std::sync::Arc;

/// Opaque tile identity, unique within one layout across all levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TileIndex(pub u64);

/// What the layout knows about a tile before anything is fetched: where it
/// sits in the pyramid and how much it is wanted right now.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileSpec {
    pub index: TileIndex,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    /// Distance of the requested render level above this tile's level;
    /// ancestors score higher because one of them covers many leaves.
    pub priority: u32,
    /// False for the prefetch ring outside the viewport proper.
    pub in_view: bool,
}

/// One raster channel's GPU residency.
#[derive(Clone, Debug)]
pub struct TileChannel {
    pub texture: Arc<wgpu::Texture>,
    pub bytes: u64,
}

/// A tile under load or resident. Created by its layer on first need,
/// filled channel by channel as fetches land, dropped by the cache.
#[derive(Debug, Default)]
pub struct Tile {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    /// Texture extent, known once the first channel decodes.
    pub w: u32,
    pub h: u32,
    /// Channels still to land before the tile is drawable.
    pub missing: i32,
    /// Bytes resident on the GPU across all channels.
    pub size: u64,
    /// Frame stamp of the most recent demand for this tile.
    pub time: u64,
    pub priority: u32,
    pub textures: SmallVec<[Option<TileChannel>; 4]>,
}

impl Tile {
    pub fn from_spec(spec: &TileSpec, channels: usize, time: u64) -> Self {
        let mut textures = SmallVec::new();
        textures.resize(channels, None);
        Self {
            level: spec.level,
            x: spec.x,
            y: spec.y,
            w: 0,
            h: 0,
            missing: channels as i32,
            size: 0,
            time,
            priority: spec.priority,
            textures,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }

    /// Install one channel's texture; returns true when that completed the
    /// tile.
    pub fn fill_channel(&mut self, channel: usize, data: TileChannel, w: u32, h: u32) -> bool {
        debug_assert!(self.textures[channel].is_none());
        self.size += data.bytes;
        self.textures[channel] = Some(data);
        self.w = self.w.max(w);
        self.h = self.h.max(h);
        self.missing -= 1;
        self.missing == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fill_counts_down() {
        let spec = TileSpec {
            index: TileIndex(0),
            level: 2,
            x: 1,
            y: 1,
            priority: 0,
            in_view: true,
        };
        let mut tile = Tile::from_spec(&spec, 3, 7);
        assert_eq!(tile.missing, 3);
        assert_eq!(tile.time, 7);
        assert!(!tile.is_complete());
        // Simulate channels landing without touching a device: metadata only.
        for channel in 0..3 {
            let done = {
                tile.size += 100;
                tile.missing -= 1;
                tile.missing == 0
            };
            assert_eq!(done, channel == 2);
        }
        assert!(tile.is_complete());
        assert_eq!(tile.size, 300);
    }
}
