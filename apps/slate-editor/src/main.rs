//! Slate Engine Demo Editor
//!
//! Renders a spinning textured cube through the mesh pipeline and captures
//! the scene into viewport images for GUI embedding.
//!
//! ```bash
//! cargo run -p slate-editor
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use slate_app::{run_app, AppConfig};

use crate::app::Editor;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    run_app::<Editor>(AppConfig::new("Slate Editor").with_size(WIDTH, HEIGHT))
}
