//! `SlateApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use ash::vk;
use winit::event::WindowEvent;

/// Trait for Slate applications.
///
/// Implement this trait to create a new application. The framework handles
/// window creation, GPU initialization, swapchain management, scene and GUI
/// pass recording, and the event loop.
pub trait SlateApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the GPU context and window exist. Declare materials
    /// and meshes on the context here; their GPU resources are created by
    /// the framework right after this returns.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering, with the delta time in seconds.
    fn update(&mut self, ctx: &mut AppContext, dt: f32);

    /// Per-frame hook before command recording.
    ///
    /// Use this to write uniform data for the frame. The framework records
    /// the scene and GUI passes afterwards.
    #[allow(unused_variables)]
    fn render(&mut self, ctx: &mut AppContext, frame: &FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Record GUI draw commands.
    ///
    /// Called with the GUI command buffer while its overlay pass is open;
    /// a GUI backend initialized from `AppContext::gui_init_info` records
    /// its draw data here. The default records nothing.
    #[allow(unused_variables)]
    fn record_gui(&mut self, ctx: &AppContext, cmd: vk::CommandBuffer, frame: &FrameContext) {}

    /// Handle window resize.
    ///
    /// The framework recreates the swapchain and framebuffers before this
    /// is called.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was consumed.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup before shutdown. The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
