//! Render pass and framebuffer management.

use crate::error::{RenderError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use slate_gpu::command::CommandPool;
use slate_gpu::{GpuContext, GpuImage, MAX_FRAMES_IN_FLIGHT};

/// Render pass configuration.
#[derive(Clone)]
pub struct RenderPassConfig {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub clear_color: [f32; 4],
}

impl Default for RenderPassConfig {
    fn default() -> Self {
        Self {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: Some(vk::Format::D32_SFLOAT),
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RenderPassConfig {
    /// Configuration for an overlay pass drawn on top of existing contents
    /// and presented afterwards.
    pub fn overlay(color_format: vk::Format) -> Self {
        Self {
            color_format,
            depth_format: None,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::LOAD,
            initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Set the multisample count. Anything above one sample renders into a
    /// pass-owned color image and resolves into the target view.
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Whether this pass renders multisampled and resolves.
    pub fn multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }
}

/// The highest sample count usable for both color and depth framebuffers.
pub fn max_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    for candidate in [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ] {
        if counts.contains(candidate) {
            return candidate;
        }
    }
    vk::SampleCountFlags::TYPE_1
}

/// Attachment descriptions for a config, in framebuffer order: color, then
/// depth if present, then the resolve target if multisampled. When
/// multisampled, the color attachment stays in COLOR_ATTACHMENT_OPTIMAL and
/// the resolve attachment carries the configured final layout.
pub fn build_attachments(config: &RenderPassConfig) -> Vec<vk::AttachmentDescription> {
    let color_final_layout = if config.multisampled() {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        config.final_layout
    };

    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(config.color_format)
        .samples(config.samples)
        .load_op(config.load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(config.initial_layout)
        .final_layout(color_final_layout)];

    if let Some(depth_format) = config.depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(config.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    if config.multisampled() {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(config.color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(config.final_layout),
        );
    }

    attachments
}

/// Depth attachment resources owned by a render pass.
struct DepthResources {
    image: GpuImage,
    view: vk::ImageView,
}

/// Multisampled color attachment owned by a render pass.
struct ColorResources {
    image: GpuImage,
    view: vk::ImageView,
}

/// Render pass with its framebuffers and per-frame command buffers.
pub struct RenderPass {
    render_pass: vk::RenderPass,
    config: RenderPassConfig,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
    depth: Option<DepthResources>,
    color: Option<ColorResources>,
    extent: vk::Extent2D,
}

impl RenderPass {
    /// Create a render pass, framebuffers over the given image views, and
    /// one primary command buffer per frame in flight.
    ///
    /// # Safety
    /// The GPU context, command pool, and image views must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        command_pool: &CommandPool,
        config: RenderPassConfig,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<Self> {
        let render_pass = create_render_pass(gpu.device(), &config)?;

        let depth = match config.depth_format {
            Some(format) => Some(create_depth_resources(gpu, format, config.samples, extent)?),
            None => None,
        };

        let color = if config.multisampled() {
            Some(create_color_resources(gpu, &config, extent)?)
        } else {
            None
        };

        let framebuffers = create_framebuffers(
            gpu.device(),
            render_pass,
            extent,
            image_views,
            depth.as_ref().map(|d| d.view),
            color.as_ref().map(|c| c.view),
        )?;

        let command_buffers = command_pool.allocate_command_buffers(
            gpu.device(),
            vk::CommandBufferLevel::PRIMARY,
            MAX_FRAMES_IN_FLIGHT as u32,
        )?;

        Ok(Self {
            render_pass,
            config,
            framebuffers,
            command_buffers,
            depth,
            color,
            extent,
        })
    }

    /// Get the raw render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// The sample count this pass renders with.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.config.samples
    }

    /// Get the command buffer for a frame index.
    pub fn command_buffer(&self, frame_index: usize) -> vk::CommandBuffer {
        self.command_buffers[frame_index % self.command_buffers.len()]
    }

    /// Current framebuffer extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Begin the pass on `cmd` for the given swapchain image, setting the
    /// dynamic viewport and scissor to the full extent.
    ///
    /// # Safety
    /// The command buffer must be in the recording state.
    pub unsafe fn begin(&self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: u32) {
        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.clear_color,
            },
        }];
        if self.depth.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport::default()
            .width(self.extent.width as f32)
            .height(self.extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        device.cmd_set_viewport(cmd, 0, &[viewport]);

        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }

    /// End the pass on `cmd`.
    ///
    /// # Safety
    /// The command buffer must be recording this pass.
    pub unsafe fn end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_end_render_pass(cmd);
    }

    /// Rebuild framebuffers and size-dependent attachments after swapchain
    /// recreation. The render pass object itself is kept.
    ///
    /// # Safety
    /// The old framebuffers must not be in use.
    pub unsafe fn recreate_framebuffers(
        &mut self,
        gpu: &GpuContext,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<()> {
        for &fb in &self.framebuffers {
            gpu.device().destroy_framebuffer(fb, None);
        }
        if let Some(mut depth) = self.depth.take() {
            gpu.device().destroy_image_view(depth.view, None);
            gpu.allocator().lock().free_image(&mut depth.image)?;
        }
        if let Some(mut color) = self.color.take() {
            gpu.device().destroy_image_view(color.view, None);
            gpu.allocator().lock().free_image(&mut color.image)?;
        }

        self.extent = extent;
        self.depth = match self.config.depth_format {
            Some(format) => {
                Some(create_depth_resources(gpu, format, self.config.samples, extent)?)
            }
            None => None,
        };
        self.color = if self.config.multisampled() {
            Some(create_color_resources(gpu, &self.config, extent)?)
        } else {
            None
        };
        self.framebuffers = create_framebuffers(
            gpu.device(),
            self.render_pass,
            extent,
            image_views,
            self.depth.as_ref().map(|d| d.view),
            self.color.as_ref().map(|c| c.view),
        )?;

        Ok(())
    }

    /// Destroy the pass and everything it owns.
    ///
    /// # Safety
    /// Nothing recorded against this pass may still be executing.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        for &fb in &self.framebuffers {
            gpu.device().destroy_framebuffer(fb, None);
        }
        self.framebuffers.clear();
        if let Some(mut depth) = self.depth.take() {
            gpu.device().destroy_image_view(depth.view, None);
            if let Err(e) = gpu.allocator().lock().free_image(&mut depth.image) {
                tracing::warn!("Failed to free depth image: {e}");
            }
        }
        if let Some(mut color) = self.color.take() {
            gpu.device().destroy_image_view(color.view, None);
            if let Err(e) = gpu.allocator().lock().free_image(&mut color.image) {
                tracing::warn!("Failed to free multisample color image: {e}");
            }
        }
        gpu.device().destroy_render_pass(self.render_pass, None);
    }
}

unsafe fn create_render_pass(
    device: &ash::Device,
    config: &RenderPassConfig,
) -> Result<vk::RenderPass> {
    let attachments = build_attachments(config);

    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_ref;
    let resolve_ref;
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref));

    if config.depth_format.is_some() {
        depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    if config.multisampled() {
        resolve_ref = vk::AttachmentReference::default()
            .attachment(attachments.len() as u32 - 1)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        subpass = subpass.resolve_attachments(std::slice::from_ref(&resolve_ref));
    }

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    let render_pass = device.create_render_pass(&create_info, None)?;
    Ok(render_pass)
}

unsafe fn create_depth_resources(
    gpu: &GpuContext,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    extent: vk::Extent2D,
) -> Result<DepthResources> {
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(samples)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = gpu
        .allocator()
        .lock()
        .create_image(&image_info, MemoryLocation::GpuOnly, "depth")?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image.image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = gpu.device().create_image_view(&view_info, None)?;

    Ok(DepthResources { image, view })
}

unsafe fn create_color_resources(
    gpu: &GpuContext,
    config: &RenderPassConfig,
    extent: vk::Extent2D,
) -> Result<ColorResources> {
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(config.color_format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(config.samples)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(
            vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = gpu
        .allocator()
        .lock()
        .create_image(&image_info, MemoryLocation::GpuOnly, "msaa color")?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image.image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(config.color_format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = gpu.device().create_image_view(&view_info, None)?;

    Ok(ColorResources { image, view })
}

unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    image_views: &[vk::ImageView],
    depth_view: Option<vk::ImageView>,
    msaa_color_view: Option<vk::ImageView>,
) -> Result<Vec<vk::Framebuffer>> {
    image_views
        .iter()
        .map(|&view| {
            // Attachment order must match build_attachments: when
            // multisampled the pass-owned color image is attachment 0 and
            // the target view becomes the resolve attachment at the end.
            let mut attachments = match msaa_color_view {
                Some(msaa) => vec![msaa],
                None => vec![view],
            };
            if let Some(depth) = depth_view {
                attachments.push(depth);
            }
            if msaa_color_view.is_some() {
                attachments.push(view);
            }

            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            device
                .create_framebuffer(&create_info, None)
                .map_err(RenderError::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_pass_has_no_resolve() {
        let config = RenderPassConfig::default();
        let attachments = build_attachments(&config);
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[0].final_layout, config.final_layout);
    }

    #[test]
    fn multisampled_pass_adds_resolve_attachment() {
        let config = RenderPassConfig {
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }
        .with_samples(vk::SampleCountFlags::TYPE_4);

        let attachments = build_attachments(&config);
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            attachments[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);

        let resolve = attachments[2];
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.format, config.color_format);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn overlay_pass_is_single_sampled() {
        let config = RenderPassConfig::overlay(vk::Format::B8G8R8A8_SRGB);
        assert!(!config.multisampled());
        assert_eq!(build_attachments(&config).len(), 1);
    }

    #[test]
    fn max_sample_count_picks_highest_common() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }
}
