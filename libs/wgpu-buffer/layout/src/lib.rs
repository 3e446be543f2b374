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

mod layout_impl;
mod manifest;
mod tile;

pub use layout_impl::{
    ChannelFetch, Layout, LayoutDesc, LayoutStatus, LayoutType, TileDraw, TileFetch, TileRectDesc,
};
pub use manifest::{parse_dzi, parse_iiif_info, parse_tzi, parse_zoomify, ArchiveIndex, ImageDims};
pub use tile::{Tile, TileChannel, TileIndex, TileSpec};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("manifest parse failed: {0}")]
    Manifest(String),
    #[error("manifest fetch failed: {0}")]
    ManifestFetch(String),
    #[error("layout misconfigured: {0}")]
    Config(String),
    #[error("layout is not ready")]
    NotReady,
}
