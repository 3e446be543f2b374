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
    filter::ShaderFilter,
    uniform::{std140_layout, UniformValue},
    ShaderCompileError, ShaderError,
};
use gpu::Gpu;
use log::{debug, error};
use signals::{Callback, SignalHandle, Signals};
use std::fmt::Write as _;

/// One declared texture input, bound in channel order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sampler {
    pub id: usize,
    pub name: String,
}

/// A named variant of the fragment `data()` stage.
#[derive(Clone, Debug)]
pub struct ShaderMode {
    pub name: String,
    /// GLSL defining `vec4 data(vec2 uv)`.
    pub body: String,
}

#[derive(Debug, Default)]
pub struct ShaderDesc {
    pub label: String,
    pub samplers: Vec<String>,
    pub uniforms: Vec<(String, UniformValue)>,
    pub modes: Vec<ShaderMode>,
    pub mode: Option<String>,
    /// Shader computes in linear space; output is encoded to sRGB.
    pub is_linear: bool,
    /// Use the gamma-2.2 approximation instead of the piecewise curves.
    pub is_srgb_simplified: bool,
    pub debug: bool,
}

struct Uniform {
    name: String,
    value: UniformValue,
    needs_update: bool,
    /// Byte offset in the uniform block; invalidated by every rebuild.
    offset: Option<usize>,
}

struct Program {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    cpu_block: Vec<u8>,
}

/// A GLSL program assembled at runtime: a fixed preamble, one std140
/// uniform block shared by both stages, the active mode's `data()` stage
/// and the filter chain, threaded by a generated `main`. The program is
/// valid only while `needs_update` is false; mode, filter and tile-size
/// changes all require a rebuild, uniform value changes only a push.
pub struct Shader {
    label: String,
    samplers: Vec<Sampler>,
    uniforms: Vec<Uniform>,
    modes: Vec<ShaderMode>,
    mode: Option<String>,
    filters: Vec<Box<dyn ShaderFilter>>,
    /// Samplers declared at construction; filter samplers bind after these.
    base_samplers: usize,
    tile_size: f32,
    is_linear: bool,
    is_srgb_simplified: bool,
    debug: bool,
    needs_update: bool,
    program: Option<Program>,
    signals: Signals,
}

impl Shader {
    pub const MATRIX_UNIFORM: &'static str = "u_matrix";
    const UNIFORM_BINDING: u32 = 0;
    const SAMPLER_BINDING: u32 = 1;
    const TEXTURE_BINDING_BASE: u32 = 2;

    pub fn new(desc: ShaderDesc) -> Result<Self, ShaderError> {
        if let Some(mode) = desc.mode.as_ref() {
            if !desc.modes.iter().any(|m| &m.name == mode) {
                return Err(ShaderError::UnknownMode(mode.clone()));
            }
        }
        let mut uniforms = vec![Uniform {
            name: Self::MATRIX_UNIFORM.to_owned(),
            value: UniformValue::Mat4(IDENTITY),
            needs_update: true,
            offset: None,
        }];
        for (name, value) in desc.uniforms {
            uniforms.push(Uniform {
                name,
                value,
                needs_update: true,
                offset: None,
            });
        }
        let mode = desc
            .mode
            .or_else(|| desc.modes.first().map(|m| m.name.clone()));
        let base_samplers = desc.samplers.len();
        Ok(Self {
            label: desc.label,
            samplers: desc
                .samplers
                .into_iter()
                .enumerate()
                .map(|(id, name)| Sampler { id, name })
                .collect(),
            base_samplers,
            uniforms,
            modes: desc.modes,
            mode,
            filters: Vec::new(),
            tile_size: 256.,
            is_linear: desc.is_linear,
            is_srgb_simplified: desc.is_srgb_simplified,
            debug: desc.debug,
            needs_update: true,
            program: None,
            signals: Signals::new(&["update"]),
        })
    }

    pub fn on_update(&mut self, callback: Callback) -> Option<SignalHandle> {
        self.signals.on("update", callback)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn samplers(&self) -> &[Sampler] {
        &self.samplers
    }

    /// All texture bindings, filter samplers included.
    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }

    /// Raster channels this shader consumes (filter samplers excluded).
    pub fn channel_count(&self) -> usize {
        self.base_samplers
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.modes.iter().map(|m| m.name.as_str())
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn is_built(&self) -> bool {
        self.program.is_some()
    }

    /// Switch the fragment `data()` stage; unknown names leave the active
    /// mode unchanged.
    pub fn set_mode(&mut self, mode: &str) -> Result<(), ShaderError> {
        if !self.modes.iter().any(|m| m.name == mode) {
            return Err(ShaderError::UnknownMode(mode.to_owned()));
        }
        if self.mode.as_deref() != Some(mode) {
            self.mode = Some(mode.to_owned());
            self.needs_update = true;
            self.signals.emit("update");
        }
        Ok(())
    }

    pub fn add_filter(&mut self, filter: Box<dyn ShaderFilter>) -> Result<(), ShaderError> {
        if self.filters.iter().any(|f| f.name() == filter.name()) {
            return Err(ShaderError::DuplicateFilter(filter.name().to_owned()));
        }
        for (name, value) in filter.uniforms() {
            self.uniforms.push(Uniform {
                name,
                value,
                needs_update: true,
                offset: None,
            });
        }
        for name in filter.samplers() {
            let id = self.samplers.len();
            self.samplers.push(Sampler { id, name });
        }
        self.filters.push(filter);
        self.needs_update = true;
        self.signals.emit("update");
        Ok(())
    }

    pub fn remove_filter(&mut self, name: &str) -> bool {
        let Some(at) = self.filters.iter().position(|f| f.name() == name) else {
            return false;
        };
        let filter = self.filters.remove(at);
        let dead: Vec<String> = filter.uniforms().into_iter().map(|(n, _)| n).collect();
        self.uniforms.retain(|u| !dead.contains(&u.name));
        let dead_samplers = filter.samplers();
        self.samplers.retain(|s| !dead_samplers.contains(&s.name));
        for (id, sampler) in self.samplers.iter_mut().enumerate() {
            sampler.id = id;
        }
        self.needs_update = true;
        self.signals.emit("update");
        true
    }

    pub fn clear_filters(&mut self) {
        while let Some(name) = self.filters.first().map(|f| f.name().to_owned()) {
            self.remove_filter(&name);
        }
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name() == name)
    }

    /// Update a declared uniform (the shader's own or a filter's). Equal
    /// values are a no-op; returns whether anything changed.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<bool, ShaderError> {
        let uniform = self
            .uniforms
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or_else(|| ShaderError::UnknownUniform(name.to_owned()))?;
        if !uniform.value.same_type(&value) {
            return Err(ShaderError::TypeMismatch(name.to_owned()));
        }
        if uniform.value == value {
            return Ok(false);
        }
        uniform.value = value;
        uniform.needs_update = true;
        self.signals.emit("update");
        Ok(true)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| &u.value)
    }

    pub fn set_matrix(&mut self, matrix: [f32; 16]) {
        // The matrix changes every frame; skip the equality scan.
        if let Some(uniform) = self
            .uniforms
            .iter_mut()
            .find(|u| u.name == Self::MATRIX_UNIFORM)
        {
            uniform.value = UniformValue::Mat4(matrix);
            uniform.needs_update = true;
        }
    }

    /// Inject the tile extent constant filters may reference.
    pub fn set_tile_size(&mut self, tile_size: f32) {
        if (self.tile_size - tile_size).abs() > f32::EPSILON {
            self.tile_size = tile_size;
            self.needs_update = true;
        }
    }

    fn uniform_block_source(&self) -> String {
        let mut out = String::new();
        writeln!(
            out,
            "layout(set = 0, binding = {}, std140) uniform Globals {{",
            Self::UNIFORM_BINDING
        )
        .ok();
        for uniform in &self.uniforms {
            writeln!(out, "    {} {};", uniform.value.glsl_type(), uniform.name).ok();
        }
        out.push_str("};\n");
        out
    }

    fn srgb_source(&self) -> &'static str {
        if self.is_srgb_simplified {
            "vec3 srgb_to_linear(vec3 c) { return pow(c, vec3(2.2)); }\n\
             vec3 linear_to_srgb(vec3 c) { return pow(c, vec3(1.0 / 2.2)); }\n"
        } else {
            "vec3 srgb_to_linear(vec3 c) {\n\
             \x20   vec3 lower = c / vec3(12.92);\n\
             \x20   vec3 higher = pow((c + vec3(0.055)) / vec3(1.055), vec3(2.4));\n\
             \x20   return mix(higher, lower, vec3(lessThan(c, vec3(0.04045))));\n\
             }\n\
             vec3 linear_to_srgb(vec3 c) {\n\
             \x20   vec3 lower = c * vec3(12.92);\n\
             \x20   vec3 higher = vec3(1.055) * pow(c, vec3(1.0 / 2.4)) - vec3(0.055);\n\
             \x20   return mix(higher, lower, vec3(lessThan(c, vec3(0.0031308))));\n\
             }\n"
        }
    }

    fn data_source(&self) -> String {
        if let Some(mode) = self.mode.as_ref() {
            if let Some(m) = self.modes.iter().find(|m| &m.name == mode) {
                return m.body.clone();
            }
        }
        match self.samplers.first() {
            Some(sampler) => format!(
                "vec4 data(vec2 uv) {{\n    \
                     return texture(sampler2D({}, tex_sampler), uv);\n\
                 }}\n",
                sampler.name
            ),
            None => "vec4 data(vec2 uv) { return vec4(0.0, 0.0, 0.0, 1.0); }\n".to_owned(),
        }
    }

    pub fn fragment_source(&self) -> String {
        let mut out = String::from("#version 450\n\n");
        out.push_str("layout(location = 0) in vec2 v_texcoord;\n");
        out.push_str("layout(location = 0) out vec4 frag_color;\n\n");
        out.push_str(&self.uniform_block_source());
        writeln!(
            out,
            "layout(set = 0, binding = {}) uniform sampler tex_sampler;",
            Self::SAMPLER_BINDING
        )
        .ok();
        for sampler in &self.samplers {
            writeln!(
                out,
                "layout(set = 0, binding = {}) uniform texture2D {};",
                Self::TEXTURE_BINDING_BASE + sampler.id as u32,
                sampler.name
            )
            .ok();
        }
        writeln!(out, "\nconst float tile_size = {:.1};\n", self.tile_size).ok();
        out.push_str(self.srgb_source());
        out.push('\n');
        out.push_str(&self.data_source());
        out.push('\n');
        for filter in &self.filters {
            let declarations = filter.declarations();
            if !declarations.is_empty() {
                out.push_str(&declarations);
                out.push('\n');
            }
            out.push_str(&filter.body());
            out.push('\n');
        }
        out.push_str("void main() {\n    vec4 color = data(v_texcoord);\n");
        for filter in &self.filters {
            writeln!(out, "    color = {}(color);", filter.function_name()).ok();
        }
        if self.is_linear {
            out.push_str("    frag_color = vec4(linear_to_srgb(color.rgb), color.a);\n");
        } else {
            out.push_str("    frag_color = color;\n");
        }
        out.push_str("}\n");
        out
    }

    pub fn vertex_source(&self) -> String {
        let mut out = String::from("#version 450\n\n");
        out.push_str("layout(location = 0) in vec3 a_position;\n");
        out.push_str("layout(location = 1) in vec2 a_texcoord;\n");
        out.push_str("layout(location = 0) out vec2 v_texcoord;\n\n");
        out.push_str(&self.uniform_block_source());
        out.push_str(
            "\nvoid main() {\n    \
                 v_texcoord = a_texcoord;\n    \
                 gl_Position = u_matrix * vec4(a_position, 1.0);\n\
             }\n",
        );
        out
    }

    fn check_source(
        &self,
        stage: naga::ShaderStage,
        stage_name: &'static str,
        source: &str,
    ) -> Result<(), ShaderCompileError> {
        let mut parser = naga::front::glsl::Parser::default();
        let options = naga::front::glsl::Options::from(stage);
        let module = match parser.parse(&options, source) {
            Ok(module) => module,
            Err(errors) => {
                self.log_numbered(stage_name, source);
                let message = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ShaderCompileError {
                    stage: stage_name,
                    message,
                });
            }
        };
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        if let Err(err) = validator.validate(&module) {
            self.log_numbered(stage_name, source);
            return Err(ShaderCompileError {
                stage: stage_name,
                message: err.to_string(),
            });
        }
        Ok(())
    }

    fn log_numbered(&self, stage_name: &str, source: &str) {
        error!("{} shader source for {}:", stage_name, self.label);
        for (i, line) in source.lines().enumerate() {
            error!("{:4}: {}", i + 1, line);
        }
    }

    /// Assemble, check and compile the program. Uniform offsets are
    /// reassigned and every uniform is marked for re-push; bind groups made
    /// against the previous layout are invalid afterwards.
    pub fn build(
        &mut self,
        gpu: &Gpu,
        target_format: wgpu::TextureFormat,
    ) -> Result<(), ShaderCompileError> {
        let fragment_source = self.fragment_source();
        let vertex_source = self.vertex_source();
        if self.debug {
            debug!("building shader {}:\n{}", self.label, fragment_source);
        }
        self.check_source(naga::ShaderStage::Vertex, "vertex", &vertex_source)?;
        self.check_source(naga::ShaderStage::Fragment, "fragment", &fragment_source)?;

        let device = gpu.device();
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}-vert", self.label)),
            source: wgpu::ShaderSource::Glsl {
                shader: vertex_source.into(),
                stage: naga::ShaderStage::Vertex,
                defines: Default::default(),
            },
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}-frag", self.label)),
            source: wgpu::ShaderSource::Glsl {
                shader: fragment_source.into(),
                stage: naga::ShaderStage::Fragment,
                defines: Default::default(),
            },
        });

        let values: Vec<&UniformValue> = self.uniforms.iter().map(|u| &u.value).collect();
        let (offsets, block_size) = std140_layout(&values);
        for (uniform, offset) in self.uniforms.iter_mut().zip(&offsets) {
            uniform.offset = Some(*offset);
            uniform.needs_update = true;
        }

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: Self::UNIFORM_BINDING,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: Self::SAMPLER_BINDING,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ];
        for sampler in &self.samplers {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: Self::TEXTURE_BINDING_BASE + sampler.id as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}-bind-group-layout", self.label)),
                entries: &entries,
            });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}-pipeline-layout", self.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{}-pipeline", self.label)),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: "main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 20,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x3,
                            offset: 0,
                            shader_location: 0,
                        },
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 12,
                            shader_location: 1,
                        },
                    ],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: "main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}-uniforms", self.label)),
            size: block_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{}-sampler", self.label)),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        self.program = Some(Program {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            cpu_block: vec![0u8; block_size],
        });
        self.needs_update = false;
        debug!("shader {} built ({} byte uniform block)", self.label, block_size);
        Ok(())
    }

    /// Push every dirty uniform, one buffer write for the lot.
    pub fn update_uniforms(&mut self, gpu: &Gpu) -> Result<(), ShaderError> {
        let program = self.program.as_mut().ok_or(ShaderError::NotBuilt)?;
        let mut any = false;
        for uniform in self.uniforms.iter_mut().filter(|u| u.needs_update) {
            let offset = uniform.offset.ok_or(ShaderError::NotBuilt)?;
            uniform.value.write(&mut program.cpu_block, offset);
            uniform.needs_update = false;
            any = true;
        }
        if any {
            gpu.queue()
                .write_buffer(&program.uniform_buffer, 0, &program.cpu_block);
        }
        Ok(())
    }

    pub fn pipeline(&self) -> Result<&wgpu::RenderPipeline, ShaderError> {
        self.program
            .as_ref()
            .map(|p| &p.pipeline)
            .ok_or(ShaderError::NotBuilt)
    }

    /// Bind group for one tile's channel textures (and filter textures
    /// appended in declaration order).
    pub fn create_bind_group(
        &self,
        gpu: &Gpu,
        views: &[&wgpu::TextureView],
    ) -> Result<wgpu::BindGroup, ShaderError> {
        let program = self.program.as_ref().ok_or(ShaderError::NotBuilt)?;
        debug_assert_eq!(views.len(), self.samplers.len());
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: Self::UNIFORM_BINDING,
                resource: program.uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: Self::SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(&program.sampler),
            },
        ];
        for (i, view) in views.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: Self::TEXTURE_BINDING_BASE + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        Ok(gpu
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{}-tile", self.label)),
                layout: &program.bind_group_layout,
                entries: &entries,
            }))
    }

    /// Drop the compiled program, e.g. after device loss. The next draw
    /// rebuilds from source.
    pub fn invalidate(&mut self) {
        self.program = None;
        self.needs_update = true;
        for uniform in &mut self.uniforms {
            uniform.offset = None;
            uniform.needs_update = true;
        }
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("label", &self.label)
            .field("mode", &self.mode)
            .field("samplers", &self.samplers.len())
            .field("filters", &self.filters.len())
            .field("needs_update", &self.needs_update)
            .finish()
    }
}

const IDENTITY: [f32; 16] = [
    1., 0., 0., 0., //
    0., 1., 0., 0., //
    0., 0., 1., 0., //
    0., 0., 0., 1.,
];

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::GammaFilter;

    fn rgb_shader() -> Shader {
        Shader::new(ShaderDesc {
            label: "rgb".to_owned(),
            samplers: vec!["kd".to_owned()],
            uniforms: vec![("u_exposure".to_owned(), UniformValue::Float(1.))],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_fragment_source_shape() {
        let shader = rgb_shader();
        let src = shader.fragment_source();
        assert!(src.starts_with("#version 450"));
        assert!(src.contains("uniform Globals"));
        assert!(src.contains("mat4 u_matrix;"));
        assert!(src.contains("float u_exposure;"));
        assert!(src.contains("uniform texture2D kd;"));
        assert!(src.contains("vec4 data(vec2 uv)"));
        assert!(src.contains("frag_color = color;"));
    }

    #[test]
    fn test_filter_chain_order_in_main() {
        struct Invert;
        impl ShaderFilter for Invert {
            fn name(&self) -> &str {
                "invert"
            }
            fn body(&self) -> String {
                "vec4 filter_invert(vec4 color) { return vec4(1.0 - color.rgb, color.a); }\n"
                    .to_owned()
            }
        }
        let mut shader = rgb_shader();
        shader.add_filter(Box::new(GammaFilter::default())).unwrap();
        shader.add_filter(Box::new(Invert)).unwrap();
        let src = shader.fragment_source();
        let gamma_call = src.find("color = filter_gamma(color);").unwrap();
        let invert_call = src.find("color = filter_invert(color);").unwrap();
        assert!(gamma_call < invert_call);
        assert!(src.contains("float u_gamma_exponent;"));
    }

    #[test]
    fn test_remove_filter_drops_its_uniforms() {
        let mut shader = rgb_shader();
        shader.add_filter(Box::new(GammaFilter::default())).unwrap();
        assert!(shader.uniform(GammaFilter::UNIFORM).is_some());
        assert!(shader.remove_filter("gamma"));
        assert!(shader.uniform(GammaFilter::UNIFORM).is_none());
        assert!(!shader.remove_filter("gamma"));
    }

    #[test]
    fn test_srgb_variant_selection() {
        let simplified = Shader::new(ShaderDesc {
            is_srgb_simplified: true,
            is_linear: true,
            ..Default::default()
        })
        .unwrap();
        assert!(simplified.fragment_source().contains("vec3(2.2)"));
        assert!(simplified
            .fragment_source()
            .contains("frag_color = vec4(linear_to_srgb(color.rgb)"));
        let accurate = Shader::new(ShaderDesc::default()).unwrap();
        assert!(accurate.fragment_source().contains("0.0031308"));
    }

    #[test]
    fn test_set_uniform_rules() {
        let mut shader = rgb_shader();
        // Unknown name.
        assert!(matches!(
            shader.set_uniform("nope", UniformValue::Float(0.)),
            Err(ShaderError::UnknownUniform(_))
        ));
        // Type mismatch.
        assert!(matches!(
            shader.set_uniform("u_exposure", UniformValue::Vec2([0.; 2])),
            Err(ShaderError::TypeMismatch(_))
        ));
        // Equal value is a no-op.
        assert_eq!(
            shader
                .set_uniform("u_exposure", UniformValue::Float(1.))
                .unwrap(),
            false
        );
        assert_eq!(
            shader
                .set_uniform("u_exposure", UniformValue::Float(0.5))
                .unwrap(),
            true
        );
    }

    #[test]
    fn test_unknown_mode_leaves_state() {
        let mut shader = Shader::new(ShaderDesc {
            modes: vec![
                ShaderMode {
                    name: "color".to_owned(),
                    body: "vec4 data(vec2 uv) { return vec4(1.0); }\n".to_owned(),
                },
                ShaderMode {
                    name: "depth".to_owned(),
                    body: "vec4 data(vec2 uv) { return vec4(0.0); }\n".to_owned(),
                },
            ],
            mode: Some("color".to_owned()),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            shader.set_mode("bogus"),
            Err(ShaderError::UnknownMode(_))
        ));
        assert_eq!(shader.mode(), Some("color"));
        shader.set_mode("depth").unwrap();
        assert_eq!(shader.mode(), Some("depth"));
        assert!(shader.needs_update());
    }

    #[test]
    fn test_tile_size_constant_injected() {
        let mut shader = rgb_shader();
        shader.set_tile_size(512.);
        assert!(shader
            .fragment_source()
            .contains("const float tile_size = 512.0;"));
    }

    #[test]
    fn test_filter_sampler_binding_follows_channels() {
        struct Lut;
        impl ShaderFilter for Lut {
            fn name(&self) -> &str {
                "lut"
            }
            fn samplers(&self) -> Vec<String> {
                vec!["lut_map".to_owned()]
            }
            fn body(&self) -> String {
                "vec4 filter_lut(vec4 color) { return color; }\n".to_owned()
            }
        }
        let mut shader = rgb_shader();
        shader.add_filter(Box::new(Lut)).unwrap();
        let src = shader.fragment_source();
        // Channel texture at binding 2, filter texture after it.
        assert!(src.contains("binding = 2) uniform texture2D kd;"));
        assert!(src.contains("binding = 3) uniform texture2D lut_map;"));
    }

    #[test]
    fn test_invalidate_marks_everything_dirty() {
        let mut shader = rgb_shader();
        shader.invalidate();
        assert!(shader.needs_update());
        assert!(!shader.is_built());
    }
}
