//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use slate_gpu::command::submit_command_buffers;
use slate_gpu::{GpuContextBuilder, GpuError, MAX_FRAMES_IN_FLIGHT};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::SlateApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Slate Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Run a SlateApp with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and runs the
/// event loop until the application exits. Construction failures are logged
/// and fatal.
pub fn run_app<A: SlateApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

/// Internal application runner implementing winit's ApplicationHandler.
struct AppRunner<A: SlateApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

struct AppState<A: SlateApp> {
    ctx: AppContext,
    app: A,
}

impl<A: SlateApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: SlateApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build_windowed(window.as_ref())?;

        let mut ctx = unsafe { AppContext::new(window, gpu, surface, self.config.vsync)? };

        let app = A::init(&mut ctx)?;
        unsafe { ctx.create_scene_resources()? };

        Ok(AppState { ctx, app })
    }
}

impl<A: SlateApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        self.app.update(&mut self.ctx, dt);

        let frame_index = self.ctx.frame_index;
        let (image_available, in_flight) = {
            let sync = self.ctx.sync.frame(frame_index);
            (sync.image_available, sync.in_flight)
        };

        // Out-of-date at acquire means no image was taken; recreate and try
        // again next frame.
        let (image_index, suboptimal) = unsafe {
            self.ctx.sync.frame(frame_index).wait(self.ctx.gpu.device())?;

            match self.ctx.swapchain.acquire_next_image(
                &self.ctx.surface.swapchain_loader,
                image_available,
                u64::MAX,
            ) {
                Ok(acquired) => acquired,
                Err(GpuError::SwapchainOutOfDate) => {
                    self.recreate_swapchain()?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        };

        unsafe {
            self.ctx.sync.frame(frame_index).reset(self.ctx.gpu.device())?;
        }

        let frame = FrameContext {
            frame_index,
            image_index,
            dt,
            elapsed: self.ctx.start_time.elapsed().as_secs_f32(),
            frame_number: self.ctx.frame_count,
        };

        self.app.render(&mut self.ctx, &frame)?;

        let needs_recreate = unsafe {
            let scene_cmd = self.ctx.record_scene(&frame)?;
            let gui_cmd = self
                .ctx
                .record_gui(&frame, |cmd| self.app.record_gui(&self.ctx, cmd, &frame))?;

            let render_finished = self.ctx.sync.render_finished(image_index);
            let wait_semaphores = [image_available];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let signal_semaphores = [render_finished];
            let command_buffers = [scene_cmd, gui_cmd];

            submit_command_buffers(
                self.ctx.gpu.device(),
                self.ctx.gpu.graphics_queue(),
                &command_buffers,
                &wait_semaphores,
                &wait_stages,
                &signal_semaphores,
                in_flight,
            )?;

            self.ctx.swapchain.present(
                &self.ctx.surface.swapchain_loader,
                self.ctx.gpu.present_queue(),
                image_index,
                &signal_semaphores,
            )? || suboptimal
        };

        if needs_recreate {
            self.recreate_swapchain()?;
        }

        self.ctx.frame_index = (frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
        self.ctx.frame_count += 1;

        Ok(())
    }

    fn recreate_swapchain(&mut self) -> anyhow::Result<()> {
        let size = self.ctx.window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        self.ctx.gpu.wait_idle()?;
        unsafe {
            self.ctx.recreate_swapchain(size.width, size.height)?;
        }
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.ctx.gpu.wait_idle()?;
        unsafe {
            self.ctx.recreate_swapchain(width, height)?;
        }
        self.app.on_resize(&mut self.ctx, width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        info!("Starting cleanup...");
        if self.ctx.frame_count > 0 {
            info!("Total frames: {}", self.ctx.frame_count);
        }

        unsafe {
            if let Err(e) = self.ctx.gpu.wait_idle() {
                error!("Failed to wait idle: {e}");
            }

            self.app.cleanup(&mut self.ctx);
            self.ctx.cleanup();
        }
        info!("Cleanup complete");
    }
}
