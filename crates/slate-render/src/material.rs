//! Materials: shaders, textures, descriptor allocation, and pipeline.

use crate::error::{RenderError, Result};
use crate::mesh::Vertex;
use crate::pipeline::{load_shader, GraphicsPipeline, GraphicsPipelineConfig, PushConstants};
use crate::render_pass::RenderPass;
use crate::texture::Texture;
use ash::vk;
use slate_gpu::command::CommandPool;
use slate_gpu::{DescriptorAllocator, GpuContext, SampledImage, DEFAULT_SETS_PER_POOL};
use std::path::PathBuf;

/// A material: shader pair, texture list, and the descriptor allocator and
/// pipeline built from them.
///
/// Resource creation is deferred so materials can be declared before the
/// GPU context exists. `create_resources` builds textures, then the
/// allocator (whose layout is sized by the texture count), then the
/// pipeline.
pub struct Material {
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    textures: Vec<Texture>,
    allocator: Option<DescriptorAllocator>,
    pipeline: Option<GraphicsPipeline>,
}

impl Material {
    pub fn new(
        vertex_shader: impl Into<PathBuf>,
        fragment_shader: impl Into<PathBuf>,
        texture_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            textures: texture_paths.into_iter().map(Texture::new).collect(),
            allocator: None,
            pipeline: None,
        }
    }

    /// Number of texture slots in this material's set layout.
    pub fn texture_count(&self) -> u32 {
        self.textures.len() as u32
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    /// The material's descriptor allocator.
    pub fn allocator_mut(&mut self) -> Result<&mut DescriptorAllocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| RenderError::InvalidState("Material resources not created".to_string()))
    }

    /// View/sampler pairs for every tracked texture, in binding order.
    pub fn sampled_images(&self) -> Vec<SampledImage> {
        self.textures
            .iter()
            .filter(|t| t.is_tracked())
            .map(|t| SampledImage {
                view: t.view(),
                sampler: t.sampler(),
            })
            .collect()
    }

    /// The graphics pipeline, once created.
    pub fn pipeline(&self) -> Result<&GraphicsPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState("Material pipeline not created".to_string()))
    }

    /// Build textures, descriptor allocator, and pipeline, in that order.
    ///
    /// # Safety
    /// The GPU context, command pool, and render pass must be valid.
    pub unsafe fn create_resources(
        &mut self,
        gpu: &GpuContext,
        pool: &CommandPool,
        render_pass: &RenderPass,
    ) -> Result<()> {
        for texture in &mut self.textures {
            texture.create_resources(gpu, pool)?;
        }

        let allocator = DescriptorAllocator::new(
            gpu.device(),
            self.texture_count(),
            DEFAULT_SETS_PER_POOL,
        )?;

        let config = GraphicsPipelineConfig {
            vertex_shader: load_shader(&self.vertex_shader)?,
            fragment_shader: load_shader(&self.fragment_shader)?,
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions(),
            samples: render_pass.samples(),
            ..Default::default()
        };

        let pipeline = GraphicsPipeline::new(
            gpu.device(),
            &config,
            render_pass.handle(),
            &[allocator.layout()],
            &[PushConstants::range()],
        )?;

        self.allocator = Some(allocator);
        self.pipeline = Some(pipeline);
        tracing::debug!(
            vert = %self.vertex_shader.display(),
            frag = %self.fragment_shader.display(),
            textures = self.textures.len(),
            "material resources created"
        );

        Ok(())
    }

    /// Bind the pipeline and write this frame's push constants.
    ///
    /// # Safety
    /// The command buffer must be recording inside the material's pass.
    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        push: &PushConstants,
    ) -> Result<()> {
        let pipeline = self.pipeline()?;
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        device.cmd_push_constants(
            cmd,
            pipeline.layout,
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::bytes_of(push),
        );
        Ok(())
    }

    /// Destroy the pipeline, allocator, and textures.
    ///
    /// # Safety
    /// Nothing from this material may be in use.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(gpu.device());
        }
        if let Some(mut allocator) = self.allocator.take() {
            allocator.destroy(gpu.device());
        }
        for texture in &mut self.textures {
            texture.destroy(gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_declares_without_gpu() {
        let mut material = Material::new(
            "shaders/scene.vert.spv",
            "shaders/scene.frag.spv",
            vec![PathBuf::from("assets/crate.png")],
        );
        assert_eq!(material.texture_count(), 1);
        assert!(material.allocator_mut().is_err());
        assert!(material.pipeline().is_err());
    }

    #[test]
    fn untracked_textures_excluded_from_bindings() {
        let mut material = Material::new("v.spv", "f.spv", vec![]);
        material.textures.push(Texture::untracked());
        assert!(material.sampled_images().is_empty());
    }
}
