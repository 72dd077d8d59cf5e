//! Application context.

use std::sync::Arc;
use std::time::Instant;

use crate::frame::FrameContext;
use crate::gui::{GuiInitInfo, GuiLayer};
use crate::viewport::Viewport;
use ash::vk;
use slate_gpu::command::{begin_command_buffer, end_command_buffer, CommandPool};
use slate_gpu::swapchain::Swapchain;
use slate_gpu::sync::FrameSyncManager;
use slate_gpu::{GpuContext, SurfaceContext, MAX_FRAMES_IN_FLIGHT};
use slate_render::{
    max_sample_count, Material, Mesh, Model, PushConstants, RenderPass, RenderPassConfig,
};
use winit::window::Window;

/// A named material and the meshes drawn with it.
pub struct MaterialSlot {
    name: String,
    pub material: Material,
    pub meshes: Vec<Mesh>,
}

/// Application context shared across all app methods.
///
/// Owns the window, GPU context, swapchain, render passes, GUI layer,
/// viewport images, and the material/mesh scene.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// Surface context for windowed rendering.
    pub surface: SurfaceContext,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Command pool for scene command buffers and uploads.
    pub command_pool: CommandPool,
    pub(crate) sync: FrameSyncManager,
    pub(crate) frame_index: usize,
    /// Total frames rendered.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
    pub(crate) start_time: Instant,
    /// Whether vsync is enabled.
    pub vsync: bool,

    scene_pass: RenderPass,
    gui: GuiLayer,
    viewport: Viewport,
    slots: Vec<MaterialSlot>,
}

impl AppContext {
    /// Create the application context over an existing GPU context and
    /// surface.
    ///
    /// # Safety
    /// The window must have valid handles.
    pub(crate) unsafe fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        surface: SurfaceContext,
        vsync: bool,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let swapchain = surface.create_swapchain(&gpu, width, height, vsync, None)?;
        tracing::info!(
            "Swapchain created: {}x{} ({} images)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );

        let command_pool = CommandPool::new(
            gpu.device(),
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        let sync = FrameSyncManager::new(gpu.device(), MAX_FRAMES_IN_FLIGHT, swapchain.images.len())?;

        let scene_pass = RenderPass::new(
            &gpu,
            &command_pool,
            RenderPassConfig {
                color_format: swapchain.format,
                samples: max_sample_count(&gpu.limits()),
                ..Default::default()
            },
            swapchain.extent,
            &swapchain.image_views,
        )?;

        let mut gui = GuiLayer::new(&gpu, swapchain.format, swapchain.extent, &swapchain.image_views)?;

        let viewport = Viewport::new(
            &gpu,
            &command_pool,
            &mut gui,
            swapchain.format,
            swapchain.extent,
            swapchain.images.len(),
        )?;

        Ok(Self {
            window,
            gpu,
            surface,
            swapchain,
            command_pool,
            sync,
            frame_index: 0,
            frame_count: 0,
            last_frame_time: Instant::now(),
            start_time: Instant::now(),
            vsync,
            scene_pass,
            gui,
            viewport,
            slots: Vec::new(),
        })
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    /// Register a material under a name.
    pub fn add_material(&mut self, name: impl Into<String>, material: Material) {
        self.slots.push(MaterialSlot {
            name: name.into(),
            material,
            meshes: Vec::new(),
        });
    }

    /// Add a mesh drawn with the named material.
    pub fn add_mesh(&mut self, material_name: &str, model: Model) -> anyhow::Result<()> {
        let slot = self
            .slot_mut(material_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown material: {material_name}"))?;
        slot.meshes.push(Mesh::new(model));
        Ok(())
    }

    /// The slot for a named material.
    pub fn slot_mut(&mut self, name: &str) -> Option<&mut MaterialSlot> {
        self.slots.iter_mut().find(|s| s.name == name)
    }

    /// The handle bundle for the GUI backend's init call.
    pub fn gui_init_info(&self) -> GuiInitInfo {
        let image_count = self.swapchain.images.len() as u32;
        self.gui.init_info(&self.gpu, image_count, image_count)
    }

    /// The GUI descriptor set showing the viewport for this frame.
    pub fn viewport_descriptor_set(
        &self,
        image_index: u32,
        frame_index: usize,
    ) -> Option<vk::DescriptorSet> {
        self.viewport.descriptor_set(image_index, frame_index)
    }

    /// Create GPU resources for every declared material and mesh, then
    /// allocate their descriptor sets.
    ///
    /// # Safety
    /// Must run before the first frame, after materials and meshes are
    /// declared.
    pub(crate) unsafe fn create_scene_resources(&mut self) -> anyhow::Result<()> {
        for slot in &mut self.slots {
            slot.material
                .create_resources(&self.gpu, &self.command_pool, &self.scene_pass)?;
            for mesh in &mut slot.meshes {
                mesh.model_mut()
                    .create_resources(&self.gpu, &self.command_pool)?;
                if let Err(e) = mesh.allocate_sets(&self.gpu, &mut slot.material) {
                    tracing::error!(material = %slot.name, "descriptor allocation failed: {e}");
                    return Err(e.into());
                }
            }
            tracing::info!(
                material = %slot.name,
                meshes = slot.meshes.len(),
                "scene resources created"
            );
        }
        Ok(())
    }

    /// Record the scene pass and viewport capture for this frame.
    ///
    /// # Safety
    /// The frame's command buffer must not be in use.
    pub(crate) unsafe fn record_scene(
        &self,
        frame: &FrameContext,
    ) -> anyhow::Result<vk::CommandBuffer> {
        let device = self.gpu.device();
        let cmd = self.scene_pass.command_buffer(frame.frame_index);

        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        self.scene_pass.begin(device, cmd, frame.image_index);

        let push = PushConstants {
            time: frame.elapsed,
            sin_time: frame.elapsed.sin(),
            cos_time: frame.elapsed.cos(),
        };

        for slot in &self.slots {
            slot.material.bind(device, cmd, &push)?;
            let layout = slot.material.pipeline()?.layout;

            for mesh in &slot.meshes {
                let (Some(vertex_buffer), Some(index_buffer)) =
                    (mesh.model().vertex_buffer(), mesh.model().index_buffer())
                else {
                    continue;
                };
                let Some(set) = mesh.descriptor_set(frame.frame_index) else {
                    continue;
                };

                device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer], &[0]);
                device.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    0,
                    &[set],
                    &[],
                );
                device.cmd_draw_indexed(cmd, mesh.model().index_count(), 1, 0, 0, 0);
            }
        }

        self.scene_pass.end(device, cmd);

        self.viewport.capture(
            device,
            cmd,
            self.swapchain.images[frame.image_index as usize],
            frame.image_index,
        );

        end_command_buffer(device, cmd)?;
        Ok(cmd)
    }

    /// Record the GUI overlay pass for this frame, invoking `draw` with the
    /// command buffer while the pass is open so a GUI backend can record its
    /// draw data.
    ///
    /// # Safety
    /// The frame's GUI command buffer must not be in use.
    pub(crate) unsafe fn record_gui(
        &self,
        frame: &FrameContext,
        draw: impl FnOnce(vk::CommandBuffer),
    ) -> anyhow::Result<vk::CommandBuffer> {
        let device = self.gpu.device();
        let cmd = self.gui.command_buffer(frame.frame_index);

        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        self.gui.pass().begin(device, cmd, frame.image_index);
        draw(cmd);
        self.gui.pass().end(device, cmd);

        end_command_buffer(device, cmd)?;
        Ok(cmd)
    }

    /// Recreate the swapchain and everything sized to it.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub(crate) unsafe fn recreate_swapchain(
        &mut self,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        self.swapchain = self.surface.recreate_swapchain(
            &self.gpu,
            &mut self.swapchain,
            width,
            height,
            self.vsync,
        )?;

        self.scene_pass.recreate_framebuffers(
            &self.gpu,
            self.swapchain.extent,
            &self.swapchain.image_views,
        )?;
        self.gui.recreate_framebuffers(
            &self.gpu,
            self.swapchain.extent,
            &self.swapchain.image_views,
        )?;
        self.sync
            .resize_images(self.gpu.device(), self.swapchain.images.len())?;
        self.viewport.recreate(
            &self.gpu,
            &self.command_pool,
            &mut self.gui,
            self.swapchain.extent,
            self.swapchain.images.len(),
        )?;

        tracing::info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }

    /// Release and destroy everything the context owns.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub(crate) unsafe fn cleanup(&mut self) {
        for slot in &mut self.slots {
            for mesh in &mut slot.meshes {
                if let Err(e) = mesh.release(&self.gpu, &mut slot.material) {
                    tracing::warn!("Failed to release mesh sets: {e}");
                }
                mesh.destroy(&self.gpu);
            }
            slot.meshes.clear();
            slot.material.destroy(&self.gpu);
        }
        self.slots.clear();

        self.viewport.destroy(&self.gpu, &mut self.gui);
        self.gui.destroy(&self.gpu);
        self.scene_pass.destroy(&self.gpu);
        self.sync.destroy(self.gpu.device());
        self.command_pool.destroy(self.gpu.device());
        self.swapchain
            .destroy(self.gpu.device(), &self.surface.swapchain_loader);
        self.surface.destroy();
    }
}
