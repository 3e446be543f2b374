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
use crate::{layer_impl::LayerDesc, LayerError};
use fxhash::FxHashMap;
use layout::LayoutDesc;
use raster::{Colorspace, Raster, SampleFormat};
use shader::{Shader, ShaderDesc};

/// Builds a full layer descriptor around a resolved data source.
pub type LayerFactory =
    Box<dyn Fn(&str, LayoutDesc) -> Result<LayerDesc, LayerError> + Send + Sync>;

/// Maps layer kinds to constructors. The stock kinds are registered up
/// front; embedders add their own (relightable stacks, annotation planes)
/// at startup rather than monkey-patching at use sites.
pub struct LayerRegistry {
    constructors: FxHashMap<String, LayerFactory>,
}

impl LayerRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: FxHashMap::default(),
        }
    }

    /// The stock registry: `image` covers every single-plane color source,
    /// whatever the wire format behind the layout.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("image", Box::new(image_layer));
        registry
    }

    pub fn register<S: Into<String>>(&mut self, kind: S, factory: LayerFactory) {
        self.constructors.insert(kind.into(), factory);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn create(&self, kind: &str, id: &str, layout: LayoutDesc) -> Result<LayerDesc, LayerError> {
        let factory = self
            .constructors
            .get(kind)
            .ok_or_else(|| LayerError::Config(format!("unknown layer kind: {}", kind)))?;
        factory(id, layout)
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("LayerRegistry").field("kinds", &kinds).finish()
    }
}

fn image_layer(id: &str, layout: LayoutDesc) -> Result<LayerDesc, LayerError> {
    let shader = Shader::new(ShaderDesc {
        label: "standard".to_owned(),
        samplers: vec!["kd".to_owned()],
        ..Default::default()
    })?;
    Ok(LayerDesc {
        id: id.to_owned(),
        label: id.to_owned(),
        layout,
        rasters: vec![Raster::new(SampleFormat::Vec4, Colorspace::Srgb)],
        shaders: vec![("standard".to_owned(), shader)],
        ..Default::default()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use layout::LayoutType;

    fn google_layout() -> LayoutDesc {
        LayoutDesc {
            ty: LayoutType::Google,
            urls: vec!["http://example.com/pyr".to_owned()],
            width: 1024,
            height: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_builtin_image_kind() {
        let registry = LayerRegistry::with_builtins();
        let desc = registry.create("image", "base", google_layout()).unwrap();
        assert_eq!(desc.id, "base");
        assert_eq!(desc.rasters.len(), 1);
        assert_eq!(desc.shaders[0].1.channel_count(), 1);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let registry = LayerRegistry::with_builtins();
        assert!(matches!(
            registry.create("hologram", "x", google_layout()),
            Err(LayerError::Config(_))
        ));
    }

    #[test]
    fn test_custom_kind_registration() {
        let mut registry = LayerRegistry::empty();
        registry.register(
            "coefficients",
            Box::new(|id, layout| {
                let shader = Shader::new(ShaderDesc {
                    label: "relight".to_owned(),
                    samplers: vec!["plane0".to_owned(), "plane1".to_owned(), "plane2".to_owned()],
                    ..Default::default()
                })?;
                Ok(LayerDesc {
                    id: id.to_owned(),
                    label: id.to_owned(),
                    layout,
                    rasters: (0..3)
                        .map(|_| Raster::new(SampleFormat::Vec4, Colorspace::Linear))
                        .collect(),
                    shaders: vec![("relight".to_owned(), shader)],
                    ..Default::default()
                })
            }),
        );
        let desc = registry
            .create("coefficients", "rti", google_layout())
            .unwrap();
        assert_eq!(desc.rasters.len(), 3);
        assert_eq!(desc.shaders[0].1.channel_count(), 3);
    }
}
