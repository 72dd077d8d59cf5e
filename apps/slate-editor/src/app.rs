//! Editor application implementation.

use glam::{Mat4, Vec3};
use tracing::info;

use slate_app::{AppContext, FrameContext, Material, Model, SlateApp, UniformBufferObject};

/// Camera distance from the origin.
const CAMERA_DISTANCE: f32 = 3.0;

/// Model rotation speed in radians per second.
const ROTATION_SPEED: f32 = 0.8;

/// Editor application state.
///
/// Declares a single textured material with a spinning cube and drives its
/// uniform buffer each frame. The scene is also captured into the viewport
/// images so a GUI backend can present it inside a panel.
pub struct Editor {
    rotation: f32,
}

impl SlateApp for Editor {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let material = Material::new(
            concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/mesh.vert.spv"),
            concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/mesh.frag.spv"),
            vec![concat!(env!("CARGO_MANIFEST_DIR"), "/assets/textures/checker.png").into()],
        );
        ctx.add_material("default", material);
        ctx.add_mesh("default", Model::cube())?;

        info!("Editor scene declared: 1 material, 1 mesh");
        Ok(Self { rotation: 0.0 })
    }

    fn update(&mut self, _ctx: &mut AppContext, dt: f32) {
        self.rotation += ROTATION_SPEED * dt;
    }

    fn render(&mut self, ctx: &mut AppContext, frame: &FrameContext) -> anyhow::Result<()> {
        let aspect = ctx.aspect_ratio();

        let mut proj = Mat4::perspective_rh(45.0_f32.to_radians(), aspect, 0.1, 100.0);
        // Vulkan clip space has an inverted Y relative to OpenGL conventions.
        proj.y_axis.y *= -1.0;

        let ubo = UniformBufferObject {
            model: Mat4::from_rotation_y(self.rotation),
            view: Mat4::look_at_rh(
                Vec3::new(0.0, 1.5, CAMERA_DISTANCE),
                Vec3::ZERO,
                Vec3::Y,
            ),
            proj,
        };

        if let Some(slot) = ctx.slot_mut("default") {
            for mesh in &slot.meshes {
                mesh.model().update_uniform(frame.frame_index, &ubo)?;
            }
        }

        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        info!("Editor shutting down");
    }
}
