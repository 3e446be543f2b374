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
use crate::uniform::UniformValue;

/// A composable fragment stage. Appended to a shader, its function is
/// applied to the color produced by the previous stage:
/// `color = filter_k(...filter_1(data(uv))...)`.
///
/// Uniform and sampler names must be globally unique within a program;
/// implementations prefix them with the filter name.
pub trait ShaderFilter: Send + Sync {
    fn name(&self) -> &str;

    /// (name, initial value) pairs merged into the program's uniform block.
    fn uniforms(&self) -> Vec<(String, UniformValue)> {
        Vec::new()
    }

    /// Extra texture samplers, bound after the layer's raster channels.
    fn samplers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Free-standing GLSL (helper functions, constants).
    fn declarations(&self) -> String {
        String::new()
    }

    /// GLSL defining `vec4 <function_name>(vec4 color)`.
    fn body(&self) -> String;

    fn function_name(&self) -> String {
        format!("filter_{}", self.name())
    }
}

/// Exponent correction applied to the composed color; the no-surprises
/// member of the filter family and a template for richer ones.
pub struct GammaFilter {
    exponent: f32,
}

impl GammaFilter {
    pub fn new(exponent: f32) -> Self {
        Self { exponent }
    }

    pub const UNIFORM: &'static str = "u_gamma_exponent";
}

impl Default for GammaFilter {
    fn default() -> Self {
        Self { exponent: 2.2 }
    }
}

impl ShaderFilter for GammaFilter {
    fn name(&self) -> &str {
        "gamma"
    }

    fn uniforms(&self) -> Vec<(String, UniformValue)> {
        vec![(Self::UNIFORM.to_owned(), UniformValue::Float(self.exponent))]
    }

    fn body(&self) -> String {
        format!(
            "vec4 {}(vec4 color) {{\n    \
                 return vec4(pow(color.rgb, vec3(1.0 / {})), color.a);\n\
             }}\n",
            self.function_name(),
            Self::UNIFORM
        )
    }
}
