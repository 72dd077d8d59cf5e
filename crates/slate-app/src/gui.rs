//! GUI bridge.
//!
//! Owns the Vulkan resources an immediate-mode GUI backend needs: a
//! dedicated command pool, an overlay render pass that presents, a
//! descriptor allocator sized for the backend's mixed descriptor usage, and
//! the handle bundle its init call consumes. The backend's own rendering
//! stays a native dependency; this module only produces what it asks for.

use ash::vk;
use slate_gpu::command::CommandPool;
use slate_gpu::{DescriptorAllocator, DescriptorBatch, GpuContext, SampledImage};
use slate_render::{RenderPass, RenderPassConfig, Result};

/// Sets per GUI pool, and descriptors of each type per pool.
const GUI_POOL_SIZE: u32 = 1000;

/// Handle bundle consumed by the GUI backend's init call.
pub struct GuiInitInfo {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue_family: u32,
    pub queue: vk::Queue,
    pub descriptor_pool: vk::DescriptorPool,
    pub render_pass: vk::RenderPass,
    pub min_image_count: u32,
    pub image_count: u32,
}

/// GUI overlay resources.
pub struct GuiLayer {
    command_pool: CommandPool,
    pass: RenderPass,
    allocator: DescriptorAllocator,
    backend_pool: vk::DescriptorPool,
}

impl GuiLayer {
    /// Create the GUI command pool, overlay pass over the swapchain views,
    /// descriptor allocator, and the standalone pool for the backend.
    ///
    /// # Safety
    /// The GPU context and swapchain resources must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        color_format: vk::Format,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<Self> {
        let command_pool = CommandPool::new(
            gpu.device(),
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        let pass = RenderPass::new(
            gpu,
            &command_pool,
            RenderPassConfig::overlay(color_format),
            extent,
            image_views,
        )?;

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let pool_sizes = gui_pool_sizes();

        let allocator = DescriptorAllocator::with_config(
            gpu.device(),
            &bindings,
            pool_sizes,
            GUI_POOL_SIZE,
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
        )?;

        let backend_pool = allocator.create_raw_pool(gpu.device())?;

        Ok(Self {
            command_pool,
            pass,
            allocator,
            backend_pool,
        })
    }

    /// The handle bundle for the backend's init call.
    pub fn init_info(
        &self,
        gpu: &GpuContext,
        min_image_count: u32,
        image_count: u32,
    ) -> GuiInitInfo {
        GuiInitInfo {
            instance: gpu.instance().handle(),
            physical_device: gpu.physical_device(),
            device: gpu.device().handle(),
            queue_family: gpu.graphics_queue_family(),
            queue: gpu.graphics_queue(),
            descriptor_pool: self.backend_pool,
            render_pass: self.pass.handle(),
            min_image_count,
            image_count,
        }
    }

    /// The overlay render pass.
    pub fn pass(&self) -> &RenderPass {
        &self.pass
    }

    /// The GUI command buffer for a frame.
    pub fn command_buffer(&self, frame_index: usize) -> vk::CommandBuffer {
        self.pass.command_buffer(frame_index)
    }

    /// Allocate per-frame descriptor sets for a texture shown by the GUI.
    ///
    /// # Safety
    /// The view and sampler must be valid.
    pub unsafe fn register_texture(
        &mut self,
        device: &ash::Device,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<DescriptorBatch> {
        let batch = self.allocator.allocate_sets(
            device,
            slate_gpu::MAX_FRAMES_IN_FLIGHT,
            None,
            &[SampledImage { view, sampler }],
        )?;
        Ok(batch)
    }

    /// Return a registered texture's sets to the allocator.
    ///
    /// # Safety
    /// The sets must not be referenced by any in-flight frame.
    pub unsafe fn free_texture(&mut self, device: &ash::Device, batch: DescriptorBatch) {
        self.allocator
            .release(device, batch.pool_index, batch.sets.len() as u32);
    }

    /// Rebuild the overlay framebuffers after swapchain recreation.
    ///
    /// # Safety
    /// The old framebuffers must not be in use.
    pub unsafe fn recreate_framebuffers(
        &mut self,
        gpu: &GpuContext,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<()> {
        self.pass.recreate_framebuffers(gpu, extent, image_views)
    }

    /// Destroy everything the layer owns.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        gpu.device().destroy_descriptor_pool(self.backend_pool, None);
        self.allocator.destroy(gpu.device());
        self.pass.destroy(gpu);
        self.command_pool.destroy(gpu.device());
    }
}

/// The backend's recommended pool sizing: a large count of every descriptor
/// type it may bind.
fn gui_pool_sizes() -> Vec<vk::DescriptorPoolSize> {
    [
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        vk::DescriptorType::INPUT_ATTACHMENT,
    ]
    .into_iter()
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: GUI_POOL_SIZE,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gui_pools_cover_all_backend_types() {
        let sizes = gui_pool_sizes();
        assert_eq!(sizes.len(), 11);
        assert!(sizes.iter().all(|s| s.descriptor_count == 1000));
    }
}
