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
use gpu::{Gpu, GpuError};
use log::trace;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("format {0:?} requires an injected data loader")]
    MissingLoader(SampleFormat),
    #[error("decoded {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
    #[error(transparent)]
    Upload(#[from] GpuError),
}

/// Per-channel sample layout as the shader will read it. Three-component
/// formats upload padded to four; the GPU has no 24/48-bit texel formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SampleFormat {
    Vec3,
    Vec4,
    Float,
    Rgba16F,
    Rgb16UI,
}

impl SampleFormat {
    pub fn is_hdr(&self) -> bool {
        matches!(self, Self::Rgba16F | Self::Rgb16UI)
    }

    /// Decoded bytes per texel, after padding.
    pub fn texel_bytes(&self, use_half_float: bool) -> u32 {
        match self {
            Self::Vec3 | Self::Vec4 => 4,
            Self::Float => {
                if use_half_float {
                    2
                } else {
                    4
                }
            }
            Self::Rgba16F | Self::Rgb16UI => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Colorspace {
    #[default]
    Srgb,
    Linear,
}

/// CPU-side pixels ready for upload, tightly packed to the raster's texture
/// format.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Decoder hook for formats the `image` crate does not cover: 16-bit
/// coefficient planes, half-float HDR packings and the like.
pub trait DataLoader: Send + Sync {
    fn load(&self, bytes: &[u8]) -> Result<DecodedImage, RasterError>;
}

/// One image channel of a layer: owns the texel format and knows how to
/// turn fetched bytes into a GPU texture. Does not own tiles.
pub struct Raster {
    format: SampleFormat,
    colorspace: Colorspace,
    use_half_float: bool,
    data_loader: Option<Box<dyn DataLoader>>,
}

impl Raster {
    pub fn new(format: SampleFormat, colorspace: Colorspace) -> Self {
        Self {
            format,
            colorspace,
            use_half_float: false,
            data_loader: None,
        }
    }

    pub fn with_half_float(mut self, use_half_float: bool) -> Self {
        self.use_half_float = use_half_float;
        self
    }

    pub fn with_data_loader(mut self, loader: Box<dyn DataLoader>) -> Self {
        self.data_loader = Some(loader);
        self
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn colorspace(&self) -> Colorspace {
        self.colorspace
    }

    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match (self.format, self.colorspace) {
            (SampleFormat::Vec3 | SampleFormat::Vec4, Colorspace::Srgb) => {
                wgpu::TextureFormat::Rgba8UnormSrgb
            }
            (SampleFormat::Vec3 | SampleFormat::Vec4, Colorspace::Linear) => {
                wgpu::TextureFormat::Rgba8Unorm
            }
            (SampleFormat::Float, _) => {
                if self.use_half_float {
                    wgpu::TextureFormat::R16Float
                } else {
                    wgpu::TextureFormat::R32Float
                }
            }
            (SampleFormat::Rgba16F, _) => wgpu::TextureFormat::Rgba16Float,
            (SampleFormat::Rgb16UI, _) => wgpu::TextureFormat::Rgba16Uint,
        }
    }

    /// Decode fetched bytes to packed pixels. LDR goes through the image
    /// crate; HDR formats require the injected loader.
    pub fn decode(&self, blob: &[u8]) -> Result<DecodedImage, RasterError> {
        if let Some(loader) = self.data_loader.as_ref() {
            return loader.load(blob);
        }
        if self.format.is_hdr() {
            return Err(RasterError::MissingLoader(self.format));
        }
        let decoded = image::load_from_memory(blob)
            .map_err(|err| RasterError::Decode(err.to_string()))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = (rgba.width(), rgba.height());
        let data = match self.format {
            SampleFormat::Float => {
                // Luminance as a single float channel.
                let mut out = Vec::with_capacity((width * height * 4) as usize);
                for px in rgba.pixels() {
                    let y = 0.2126 * px[0] as f32 + 0.7152 * px[1] as f32 + 0.0722 * px[2] as f32;
                    out.extend_from_slice(&(y / 255.).to_le_bytes());
                }
                out
            }
            _ => rgba.into_raw(),
        };
        Ok(DecodedImage {
            width,
            height,
            data,
        })
    }

    /// Upload decoded pixels; returns the texture and its resident size.
    pub fn to_texture(
        &self,
        gpu: &Gpu,
        decoded: &DecodedImage,
    ) -> Result<(Arc<wgpu::Texture>, u64), RasterError> {
        let texel = self.format.texel_bytes(self.use_half_float) as usize;
        let expected = decoded.width as usize * decoded.height as usize * texel;
        if decoded.data.len() != expected {
            return Err(RasterError::SizeMismatch {
                got: decoded.data.len(),
                expected,
            });
        }
        let (texture, bytes) = gpu.upload_texture(
            "raster-tile",
            decoded.width,
            decoded.height,
            self.texture_format(),
            &decoded.data,
        )?;
        trace!(
            "uploaded {}x{} {:?} ({} bytes)",
            decoded.width,
            decoded.height,
            self.format,
            bytes
        );
        Ok((Arc::new(texture), bytes))
    }

    /// Decode and upload in one step; the common tile path.
    pub fn load_image(
        &self,
        gpu: &Gpu,
        blob: &[u8],
    ) -> Result<(Arc<wgpu::Texture>, u64, u32, u32), RasterError> {
        let decoded = self.decode(blob)?;
        let (texture, bytes) = self.to_texture(gpu, &decoded)?;
        Ok((texture, bytes, decoded.width, decoded.height))
    }
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("format", &self.format)
            .field("colorspace", &self.colorspace)
            .field("use_half_float", &self.use_half_float)
            .field("has_loader", &self.data_loader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_ldr_pads_to_rgba() {
        let raster = Raster::new(SampleFormat::Vec3, Colorspace::Srgb);
        let decoded = raster.decode(&png_bytes(4, 3)).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 3));
        assert_eq!(decoded.data.len(), 4 * 3 * 4);
        assert_eq!(&decoded.data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_rejected() {
        let raster = Raster::new(SampleFormat::Vec4, Colorspace::Srgb);
        assert!(matches!(
            raster.decode(b"not an image"),
            Err(RasterError::Decode(_))
        ));
    }

    #[test]
    fn test_hdr_without_loader_rejected() {
        let raster = Raster::new(SampleFormat::Rgba16F, Colorspace::Linear);
        assert!(matches!(
            raster.decode(&png_bytes(2, 2)),
            Err(RasterError::MissingLoader(_))
        ));
    }

    #[test]
    fn test_injected_loader_wins() {
        struct Fixed;
        impl DataLoader for Fixed {
            fn load(&self, _bytes: &[u8]) -> Result<DecodedImage, RasterError> {
                Ok(DecodedImage {
                    width: 1,
                    height: 1,
                    data: vec![0; 8],
                })
            }
        }
        let raster =
            Raster::new(SampleFormat::Rgba16F, Colorspace::Linear).with_data_loader(Box::new(Fixed));
        let decoded = raster.decode(b"whatever").unwrap();
        assert_eq!(decoded.data.len(), 8);
    }

    #[test]
    fn test_texture_format_mapping() {
        assert_eq!(
            Raster::new(SampleFormat::Vec3, Colorspace::Srgb).texture_format(),
            wgpu::TextureFormat::Rgba8UnormSrgb
        );
        assert_eq!(
            Raster::new(SampleFormat::Vec4, Colorspace::Linear).texture_format(),
            wgpu::TextureFormat::Rgba8Unorm
        );
        assert_eq!(
            Raster::new(SampleFormat::Float, Colorspace::Linear)
                .with_half_float(true)
                .texture_format(),
            wgpu::TextureFormat::R16Float
        );
        assert_eq!(
            Raster::new(SampleFormat::Rgb16UI, Colorspace::Linear).texture_format(),
            wgpu::TextureFormat::Rgba16Uint
        );
    }

    #[test]
    fn test_float_decode_is_single_channel() {
        let raster = Raster::new(SampleFormat::Float, Colorspace::Linear);
        let decoded = raster.decode(&png_bytes(2, 2)).unwrap();
        assert_eq!(decoded.data.len(), 2 * 2 * 4);
    }
}
