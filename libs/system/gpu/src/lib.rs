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

// Note: re-export so dependent crates name wgpu types without tracking the
// version pin themselves.
pub use wgpu;

use anyhow::{anyhow, Result};
use futures::executor::block_on;
use log::{debug, info, warn};
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use winit::window::Window;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("graphics device lost; resources must be rebuilt")]
    DeviceLost,
    #[error("texture upload of {size} bytes exceeds device limits")]
    UploadTooLarge { size: u64 },
}

pub fn texture_format_size(texture_format: wgpu::TextureFormat) -> u32 {
    texture_format.describe().block_size as u32
}

#[derive(Clone, Copy, Debug)]
pub struct RenderConfig {
    pub present_mode: wgpu::PresentMode,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            present_mode: wgpu::PresentMode::AutoVsync,
        }
    }
}

/// Ownership of the graphics device and queue, and of the window surface
/// when one is attached. All texture and buffer traffic flows through here
/// so that byte accounting and device-loss tracking live in one place.
pub struct Gpu {
    _instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    surface: Option<wgpu::Surface>,
    surface_config: Option<wgpu::SurfaceConfiguration>,

    lost: Arc<AtomicBool>,
    config: RenderConfig,
}

impl Gpu {
    pub const SCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

    pub fn new(config: RenderConfig) -> Result<Self> {
        block_on(Self::new_async(config, None))
    }

    pub fn for_window(window: &Window, config: RenderConfig) -> Result<Self> {
        block_on(Self::new_async(config, Some(window)))
    }

    pub async fn new_async(config: RenderConfig, window: Option<&Window>) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::Backends::all());
        let surface = window.map(|win| unsafe { instance.create_surface(win) });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: surface.as_ref(),
            })
            .await
            .ok_or_else(|| anyhow!("no suitable graphics adapter"))?;
        info!("selected adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("xenon-device"),
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = lost.clone();
            device.on_uncaptured_error(move |error| {
                warn!("uncaptured device error: {}", error);
                if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                    lost.store(true, Ordering::SeqCst);
                }
            });
        }

        let mut gpu = Self {
            _instance: instance,
            adapter,
            device,
            queue,
            surface: None,
            surface_config: None,
            lost,
            config,
        };
        if let (Some(surface), Some(win)) = (surface, window) {
            let size = win.inner_size();
            gpu.surface = Some(surface);
            gpu.configure_surface(size.width, size.height);
        }
        Ok(gpu)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn configure_surface(&mut self, width: u32, height: u32) {
        if let Some(surface) = self.surface.as_ref() {
            let surface_config = wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: Self::SCREEN_FORMAT,
                width: width.max(1),
                height: height.max(1),
                present_mode: self.config.present_mode,
                alpha_mode: wgpu::CompositeAlphaMode::Auto,
            };
            surface.configure(&self.device, &surface_config);
            self.surface_config = Some(surface_config);
            debug!("surface configured at {}x{}", width, height);
        }
    }

    /// Acquire the next frame. Surface loss is folded into the device-loss
    /// flag so the compositor runs one restoration path.
    pub fn acquire_frame(&mut self) -> Result<wgpu::SurfaceTexture, GpuError> {
        let surface = self.surface.as_ref().ok_or(GpuError::DeviceLost)?;
        match surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Timeout) => {
                if let Some(surface_config) = self.surface_config.clone() {
                    self.configure_surface(surface_config.width, surface_config.height);
                }
                match self.surface.as_ref() {
                    Some(surface) => surface
                        .get_current_texture()
                        .map_err(|_| GpuError::DeviceLost),
                    None => Err(GpuError::DeviceLost),
                }
            }
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::OutOfMemory) => {
                self.lost.store(true, Ordering::SeqCst);
                Err(GpuError::DeviceLost)
            }
        }
    }

    /// True once after the device or surface was lost; clears the flag.
    pub fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::SeqCst)
    }

    /// Create and fill a 2d texture; returns the texture and its resident
    /// byte size for cache accounting.
    pub fn upload_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        data: &[u8],
    ) -> Result<(wgpu::Texture, u64), GpuError> {
        let texel = texture_format_size(format);
        let size = width as u64 * height as u64 * texel as u64;
        debug_assert_eq!(data.len() as u64, size);
        let limit = self.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(GpuError::UploadTooLarge { size });
        }
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        });
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: NonZeroU32::new(width * texel),
                rows_per_image: None,
            },
            extent,
        );
        Ok((texture, size))
    }
}

impl std::fmt::Debug for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Gpu")
            .field("lost", &self.lost.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
