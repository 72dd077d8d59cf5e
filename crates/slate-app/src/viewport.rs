//! Editor viewport images.
//!
//! One sampled image per swapchain image, filled by copying the rendered
//! scene out of the swapchain each frame and registered with the GUI layer
//! so the editor can draw the scene inside a GUI window.

use crate::gui::GuiLayer;
use ash::vk;
use gpu_allocator::MemoryLocation;
use slate_gpu::command::{execute_single_time_commands, CommandPool};
use slate_gpu::{DescriptorBatch, GpuContext, GpuImage};
use slate_render::Result;

/// Per-swapchain-image scene capture targets.
pub struct Viewport {
    images: Vec<GpuImage>,
    views: Vec<vk::ImageView>,
    sampler: vk::Sampler,
    batches: Vec<DescriptorBatch>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Viewport {
    /// Create the viewport images, transition them to SHADER_READ_ONLY, and
    /// register each with the GUI layer.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        pool: &CommandPool,
        gui: &mut GuiLayer,
        format: vk::Format,
        extent: vk::Extent2D,
        image_count: usize,
    ) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        let sampler = gpu.device().create_sampler(&sampler_info, None)?;

        let mut viewport = Self {
            images: Vec::new(),
            views: Vec::new(),
            sampler,
            batches: Vec::new(),
            format,
            extent,
        };
        viewport.create_images(gpu, pool, gui, extent, image_count)?;
        Ok(viewport)
    }

    unsafe fn create_images(
        &mut self,
        gpu: &GpuContext,
        pool: &CommandPool,
        gui: &mut GuiLayer,
        extent: vk::Extent2D,
        image_count: usize,
    ) -> Result<()> {
        self.extent = extent;

        for _ in 0..image_count {
            let image_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(self.format)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::LINEAR)
                .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = gpu.allocator().lock().create_image(
                &image_info,
                MemoryLocation::GpuOnly,
                "viewport",
            )?;

            let view_info = vk::ImageViewCreateInfo::default()
                .image(image.image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = gpu.device().create_image_view(&view_info, None)?;

            let batch = gui.register_texture(gpu.device(), view, self.sampler)?;

            self.images.push(image);
            self.views.push(view);
            self.batches.push(batch);
        }

        // Start readable; each capture cycles through TRANSFER_DST and back
        let device = gpu.device();
        let handles: Vec<vk::Image> = self.images.iter().map(|i| i.image).collect();
        execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
            for &image in &handles {
                image_barrier(
                    device,
                    cmd,
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::SHADER_READ,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                );
            }
        })?;

        Ok(())
    }

    /// The GUI descriptor set showing image `image_index` on `frame_index`.
    pub fn descriptor_set(
        &self,
        image_index: u32,
        frame_index: usize,
    ) -> Option<vk::DescriptorSet> {
        self.batches
            .get(image_index as usize)
            .and_then(|batch| batch.sets.get(frame_index))
            .copied()
    }

    /// Record a copy of the rendered swapchain image into the matching
    /// viewport image. The swapchain image must be in
    /// COLOR_ATTACHMENT_OPTIMAL and is returned to it.
    ///
    /// # Safety
    /// The command buffer must be recording, outside a render pass.
    pub unsafe fn capture(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        swapchain_image: vk::Image,
        image_index: u32,
    ) {
        let target = self.images[image_index as usize].image;

        image_barrier(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        );
        image_barrier(
            device,
            cmd,
            target,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
        );

        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .layer_count(1);
        let copy = vk::ImageCopy::default()
            .src_subresource(subresource)
            .dst_subresource(subresource)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            });
        device.cmd_copy_image(
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            target,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[copy],
        );

        image_barrier(
            device,
            cmd,
            target,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
        image_barrier(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );
    }

    /// Recreate the viewport images after swapchain recreation.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub unsafe fn recreate(
        &mut self,
        gpu: &GpuContext,
        pool: &CommandPool,
        gui: &mut GuiLayer,
        extent: vk::Extent2D,
        image_count: usize,
    ) -> Result<()> {
        self.destroy_images(gpu, gui);
        self.create_images(gpu, pool, gui, extent, image_count)
    }

    unsafe fn destroy_images(&mut self, gpu: &GpuContext, gui: &mut GuiLayer) {
        for batch in self.batches.drain(..) {
            gui.free_texture(gpu.device(), batch);
        }
        for view in self.views.drain(..) {
            gpu.device().destroy_image_view(view, None);
        }
        for mut image in self.images.drain(..) {
            if let Err(e) = gpu.allocator().lock().free_image(&mut image) {
                tracing::warn!("Failed to free viewport image: {e}");
            }
        }
    }

    /// Destroy all viewport resources.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext, gui: &mut GuiLayer) {
        self.destroy_images(gpu, gui);
        gpu.device().destroy_sampler(self.sampler, None);
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}
