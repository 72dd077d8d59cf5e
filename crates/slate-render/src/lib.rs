//! Render resources for the Slate engine.
//!
//! Render passes with framebuffers, graphics pipelines, textures with mip
//! chains, and the material/model/mesh resource holders the frame loop
//! draws.

pub mod error;
pub mod material;
pub mod mesh;
pub mod pipeline;
pub mod render_pass;
pub mod texture;

pub use error::{RenderError, Result};
pub use material::Material;
pub use mesh::{Mesh, Model, UniformBufferObject, Vertex};
pub use pipeline::{load_shader, GraphicsPipeline, GraphicsPipelineConfig, PushConstants};
pub use render_pass::{build_attachments, max_sample_count, RenderPass, RenderPassConfig};
pub use texture::{mip_level_count, transition_image_layout, Texture};
