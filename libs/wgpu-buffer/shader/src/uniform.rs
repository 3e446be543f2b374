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

/// A uniform's typed value. Matrices are column-major, as GLSL reads them.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn glsl_type(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Vec2(_) => "vec2",
            Self::Vec3(_) => "vec3",
            Self::Vec4(_) => "vec4",
            Self::Mat3(_) => "mat3",
            Self::Mat4(_) => "mat4",
        }
    }

    pub fn same_type(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// std140 alignment in bytes.
    pub fn align(&self) -> usize {
        match self {
            Self::Float(_) | Self::Int(_) | Self::Bool(_) => 4,
            Self::Vec2(_) => 8,
            Self::Vec3(_) | Self::Vec4(_) | Self::Mat3(_) | Self::Mat4(_) => 16,
        }
    }

    /// std140 size in bytes (mat3 columns pad out to vec4).
    pub fn size(&self) -> usize {
        match self {
            Self::Float(_) | Self::Int(_) | Self::Bool(_) => 4,
            Self::Vec2(_) => 8,
            Self::Vec3(_) => 12,
            Self::Vec4(_) => 16,
            Self::Mat3(_) => 48,
            Self::Mat4(_) => 64,
        }
    }

    /// Serialize at `offset` into a block laid out by `std140_layout`.
    pub fn write(&self, block: &mut [u8], offset: usize) {
        let mut write_f32s = |values: &[f32], at: usize| {
            for (i, v) in values.iter().enumerate() {
                let o = at + i * 4;
                block[o..o + 4].copy_from_slice(&v.to_le_bytes());
            }
        };
        match self {
            Self::Float(v) => write_f32s(&[*v], offset),
            Self::Int(v) => block[offset..offset + 4].copy_from_slice(&v.to_le_bytes()),
            Self::Bool(v) => {
                block[offset..offset + 4].copy_from_slice(&(*v as i32).to_le_bytes())
            }
            Self::Vec2(v) => write_f32s(v, offset),
            Self::Vec3(v) => write_f32s(v, offset),
            Self::Vec4(v) => write_f32s(v, offset),
            Self::Mat3(v) => {
                // Three vec4-aligned columns.
                for col in 0..3 {
                    write_f32s(&v[col * 3..col * 3 + 3], offset + col * 16);
                }
            }
            Self::Mat4(v) => write_f32s(v, offset),
        }
    }
}

/// Assign std140 offsets in declaration order; returns (offsets, block
/// size), the block size rounded up to 16.
pub fn std140_layout(values: &[&UniformValue]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(values.len());
    let mut cursor = 0usize;
    for value in values {
        let align = value.align();
        cursor = (cursor + align - 1) / align * align;
        offsets.push(cursor);
        cursor += value.size();
    }
    let size = (cursor + 15) / 16 * 16;
    (offsets, size.max(16))
}
