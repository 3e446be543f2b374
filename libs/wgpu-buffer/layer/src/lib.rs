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

mod layer_impl;
mod registry;
mod state;

pub use layer_impl::{DeriveDesc, Layer, LayerDesc, LayerStatus, TileCompletion};
pub use registry::{LayerFactory, LayerRegistry};
pub use state::LayerState;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error(transparent)]
    Layout(#[from] layout::LayoutError),
    #[error(transparent)]
    Shader(#[from] shader::ShaderError),
    #[error("unknown shader: {0}")]
    UnknownShader(String),
    #[error("layer misconfigured: {0}")]
    Config(String),
    #[error("derived layers share their source's tiles and cannot {0}")]
    DerivedImmutable(&'static str),
}
