//! Application framework for the Slate engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - GPU context initialization
//! - Swapchain creation and recreation
//! - Scene and GUI render passes
//! - Frame synchronization
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use slate_app::{SlateApp, AppContext, FrameContext, AppConfig, run_app};
//!
//! struct MyApp {
//!     // Application state
//! }
//!
//! impl SlateApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp {})
//!     }
//!
//!     fn update(&mut self, ctx: &mut AppContext, dt: f32) {
//!         // Update logic
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My App"))
//! }
//! ```

mod app;
mod context;
mod frame;
mod gui;
mod runner;
mod viewport;

pub use app::SlateApp;
pub use context::{AppContext, MaterialSlot};
pub use frame::FrameContext;
pub use gui::GuiInitInfo;
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use slate_gpu::{GpuContext, GpuContextBuilder, MAX_FRAMES_IN_FLIGHT};
pub use slate_render::{Material, Model, Texture, UniformBufferObject, Vertex};
pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};
