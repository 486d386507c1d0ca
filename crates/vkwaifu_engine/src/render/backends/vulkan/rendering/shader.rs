//! Shader modules and the fixed full-screen graphics pipeline
//!
//! The pipeline has no vertex input: the vertex shader generates a quad from
//! `gl_VertexIndex`, so a draw is always [`QUAD_VERTEX_COUNT`] vertices.

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use crate::render::backends::vulkan::{VulkanResult, VulkanError};

/// Vertices in the generated full-screen quad (two triangles)
pub const QUAD_VERTEX_COUNT: u32 = 6;

const ENTRY_POINT: &[u8] = b"main\0";

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Vertex stage compiled from `resources/shaders/quad.vert` by the build script
pub const EMBEDDED_VERTEX_SPIRV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.spv"));

/// Fragment stage compiled from `resources/shaders/image.frag` by the build script
pub const EMBEDDED_FRAGMENT_SPIRV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/image.spv"));

/// Decode SPIR-V bytes into words, checking size and magic number
pub fn spirv_words(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {}", e)))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(VulkanError::InitializationFailed(
            "Invalid SPIR-V: missing magic number".to_string(),
        ));
    }
    Ok(words)
}

/// Read and decode a SPIR-V file
pub fn load_spirv<P: AsRef<Path>>(path: P) -> VulkanResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        VulkanError::InitializationFailed(format!("Failed to read shader {}: {}", path.display(), e))
    })?;
    log::debug!("Loaded {} bytes of SPIR-V from {}", bytes.len(), path.display());
    spirv_words(&bytes)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V words
    pub fn from_words(device: Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);

        let module = unsafe {
            device.create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Create shader stage create info
    pub fn create_stage_info(&self, stage: vk::ShaderStageFlags, entry_point: &CStr) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(entry_point)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// SPIR-V for the two pipeline stages, decoded once and reused on every rebuild
#[derive(Debug, Clone)]
pub struct PipelineShaders {
    /// Vertex stage words
    pub vertex: Vec<u32>,
    /// Fragment stage words
    pub fragment: Vec<u32>,
}

impl PipelineShaders {
    /// The SPIR-V built into the library
    pub fn embedded() -> VulkanResult<Self> {
        Ok(Self {
            vertex: spirv_words(EMBEDDED_VERTEX_SPIRV)?,
            fragment: spirv_words(EMBEDDED_FRAGMENT_SPIRV)?,
        })
    }

    /// Load both stages from disk
    pub fn load<P: AsRef<Path>>(vertex_path: P, fragment_path: P) -> VulkanResult<Self> {
        Ok(Self {
            vertex: load_spirv(vertex_path)?,
            fragment: load_spirv(fragment_path)?,
        })
    }
}

/// Pipeline layout wrapper; outlives every pipeline built against it
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout over the given descriptor set layouts, without push constants
    pub fn new(device: Device, set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe {
            device.create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, layout })
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build the full-screen quad pipeline with a static viewport and scissor of `extent`
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        shaders: &PipelineShaders,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let vertex_shader = ShaderModule::from_words(device.clone(), &shaders.vertex)?;
        let fragment_shader = ShaderModule::from_words(device.clone(), &shaders.fragment)?;

        let entry_point = CStr::from_bytes_with_nul(ENTRY_POINT)
            .map_err(|e| VulkanError::InitializationFailed(format!("Bad entry point name: {}", e)))?;
        let shader_stages = [
            vertex_shader.create_stage_info(vk::ShaderStageFlags::VERTEX, entry_point),
            fragment_shader.create_stage_info(vk::ShaderStageFlags::FRAGMENT, entry_point),
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();
        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            ).map_err(|(_, err)| VulkanError::Api(err))?
        };

        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            VulkanError::InitializationFailed("Pipeline creation returned no pipeline".to_string())
        })?;

        log::debug!("Built graphics pipeline for {}x{}", extent.width, extent.height);

        Ok(Self { device, pipeline })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv_words_decodes_little_endian() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 7];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(spirv_words(&bytes).unwrap(), words.to_vec());
    }

    #[test]
    fn test_spirv_words_rejects_truncated_input() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(spirv_words(&bytes), Err(VulkanError::InitializationFailed(_))));
    }

    #[test]
    fn test_spirv_words_rejects_bad_magic() {
        let bytes = 0xdead_beef_u32.to_le_bytes();
        assert!(spirv_words(&bytes).is_err());
    }

    #[test]
    fn test_missing_shader_file() {
        let err = load_spirv("no/such/shader.spv").unwrap_err();
        assert!(err.to_string().contains("no/such/shader.spv"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_embedded_shaders_decode() {
        let shaders = PipelineShaders::embedded().unwrap();
        assert_eq!(shaders.vertex.first(), Some(&SPIRV_MAGIC));
        assert_eq!(shaders.fragment.first(), Some(&SPIRV_MAGIC));
        assert_ne!(shaders.vertex, shaders.fragment);
    }

    #[test]
    fn test_entry_point_is_main() {
        assert_eq!(CStr::from_bytes_with_nul(ENTRY_POINT).unwrap().to_str().unwrap(), "main");
    }
}
