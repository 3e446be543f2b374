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

mod filter;
mod shader_impl;
mod uniform;

pub use filter::{GammaFilter, ShaderFilter};
pub use shader_impl::{Sampler, Shader, ShaderDesc, ShaderMode};
pub use uniform::{UniformValue, std140_layout};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("unknown mode: {0}")]
    UnknownMode(String),
    #[error("unknown uniform: {0}")]
    UnknownUniform(String),
    #[error("uniform {0} set with a value of a different type")]
    TypeMismatch(String),
    #[error("duplicate filter: {0}")]
    DuplicateFilter(String),
    #[error("program has not been built")]
    NotBuilt,
}

#[derive(Debug, Error)]
#[error("{stage} shader failed to compile: {message}")]
pub struct ShaderCompileError {
    pub stage: &'static str,
    pub message: String,
}
