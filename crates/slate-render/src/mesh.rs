//! Mesh geometry, GPU buffers, and descriptor set holders.

use crate::error::{RenderError, Result};
use crate::material::Material;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use slate_gpu::command::{execute_single_time_commands, CommandPool};
use slate_gpu::{GpuBuffer, GpuContext, MAX_FRAMES_IN_FLIGHT};
use std::path::Path;

/// Vertex format for scene geometry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Binding description for the vertex buffer at binding 0.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// Attribute descriptions for position, color, and texture coordinates.
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(12),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(24),
        ]
    }
}

/// Per-object uniform block at binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub fn identity() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

/// Geometry plus its device buffers and per-frame uniform buffers.
pub struct Model {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    vertex_buffer: Option<GpuBuffer>,
    index_buffer: Option<GpuBuffer>,
    uniform_buffers: Vec<GpuBuffer>,
}

impl Model {
    /// Build a model from raw geometry.
    pub fn from_geometry(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            vertex_buffer: None,
            index_buffer: None,
            uniform_buffers: Vec::new(),
        }
    }

    /// A unit quad in the XY plane.
    pub fn quad() -> Self {
        let vertices = vec![
            Vertex {
                position: [-0.5, -0.5, 0.0],
                color: [1.0, 1.0, 1.0],
                tex_coord: [0.0, 0.0],
            },
            Vertex {
                position: [0.5, -0.5, 0.0],
                color: [1.0, 1.0, 1.0],
                tex_coord: [1.0, 0.0],
            },
            Vertex {
                position: [0.5, 0.5, 0.0],
                color: [1.0, 1.0, 1.0],
                tex_coord: [1.0, 1.0],
            },
            Vertex {
                position: [-0.5, 0.5, 0.0],
                color: [1.0, 1.0, 1.0],
                tex_coord: [0.0, 1.0],
            },
        ];
        let indices = vec![0, 1, 2, 2, 3, 0];
        Self::from_geometry(vertices, indices)
    }

    /// A unit cube centered on the origin.
    pub fn cube() -> Self {
        let corners: [[f32; 3]; 8] = [
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [-0.5, -0.5, 0.5],
            [0.5, -0.5, 0.5],
            [0.5, 0.5, 0.5],
            [-0.5, 0.5, 0.5],
        ];
        // Four corners per face, counter-clockwise from outside
        let faces: [[usize; 4]; 6] = [
            [4, 5, 6, 7], // +Z
            [1, 0, 3, 2], // -Z
            [5, 1, 2, 6], // +X
            [0, 4, 7, 3], // -X
            [3, 7, 6, 2], // +Y
            [0, 1, 5, 4], // -Y
        ];
        let uvs: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for face in faces {
            let base = vertices.len() as u32;
            for (corner, uv) in face.into_iter().zip(uvs) {
                vertices.push(Vertex {
                    position: corners[corner],
                    color: [1.0, 1.0, 1.0],
                    tex_coord: uv,
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        Self::from_geometry(vertices, indices)
    }

    /// Load geometry from an OBJ file, triangulated, one model per file.
    pub fn from_obj(path: &Path) -> Result<Self> {
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .map_err(|e| RenderError::ModelLoad(format!("{}: {e}", path.display())))?;

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for model in models {
            let mesh = model.mesh;
            let base = vertices.len() as u32;
            for i in 0..mesh.positions.len() / 3 {
                let tex_coord = if mesh.texcoords.len() >= (i + 1) * 2 {
                    // OBJ uses a bottom-left UV origin
                    [mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1]]
                } else {
                    [0.0, 0.0]
                };
                vertices.push(Vertex {
                    position: [
                        mesh.positions[i * 3],
                        mesh.positions[i * 3 + 1],
                        mesh.positions[i * 3 + 2],
                    ],
                    color: [1.0, 1.0, 1.0],
                    tex_coord,
                });
            }
            indices.extend(mesh.indices.iter().map(|&i| base + i));
        }

        if vertices.is_empty() {
            return Err(RenderError::ModelLoad(format!(
                "{}: no geometry",
                path.display()
            )));
        }

        Ok(Self::from_geometry(vertices, indices))
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex_buffer(&self) -> Option<vk::Buffer> {
        self.vertex_buffer.as_ref().map(|b| b.buffer)
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index_buffer.as_ref().map(|b| b.buffer)
    }

    /// Per-frame uniform buffer handles.
    pub fn uniform_buffers(&self) -> Vec<vk::Buffer> {
        self.uniform_buffers.iter().map(|b| b.buffer).collect()
    }

    /// Upload geometry to device-local buffers through a staging copy and
    /// create per-frame host-visible uniform buffers.
    ///
    /// # Safety
    /// The GPU context and command pool must be valid.
    pub unsafe fn create_resources(&mut self, gpu: &GpuContext, pool: &CommandPool) -> Result<()> {
        self.vertex_buffer = Some(upload_device_local(
            gpu,
            pool,
            bytemuck::cast_slice(&self.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "vertex buffer",
        )?);
        self.index_buffer = Some(upload_device_local(
            gpu,
            pool,
            bytemuck::cast_slice(&self.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "index buffer",
        )?);

        let ubo_size = std::mem::size_of::<UniformBufferObject>() as u64;
        self.uniform_buffers.clear();
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            self.uniform_buffers.push(gpu.allocator().lock().create_buffer(
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                "uniform buffer",
            )?);
        }

        Ok(())
    }

    /// Write this frame's uniform data.
    pub fn update_uniform(&self, frame_index: usize, ubo: &UniformBufferObject) -> Result<()> {
        let buffer = self
            .uniform_buffers
            .get(frame_index)
            .ok_or_else(|| RenderError::InvalidState("Uniform buffers not created".to_string()))?;
        buffer.write(std::slice::from_ref(ubo))?;
        Ok(())
    }

    /// Free all GPU buffers.
    ///
    /// # Safety
    /// The buffers must not be in use.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        let mut allocator = gpu.allocator().lock();
        if let Some(mut buffer) = self.vertex_buffer.take() {
            let _ = allocator.free_buffer(&mut buffer);
        }
        if let Some(mut buffer) = self.index_buffer.take() {
            let _ = allocator.free_buffer(&mut buffer);
        }
        for mut buffer in self.uniform_buffers.drain(..) {
            let _ = allocator.free_buffer(&mut buffer);
        }
    }
}

/// Create a device-local buffer and fill it through a staging copy.
unsafe fn upload_device_local(
    gpu: &GpuContext,
    pool: &CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let size = data.len() as u64;

    let mut staging = gpu.allocator().lock().create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "staging",
    )?;
    staging.write_bytes(0, data)?;

    let buffer = gpu.allocator().lock().create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        name,
    )?;

    let device = gpu.device();
    let src = staging.buffer;
    let dst = buffer.buffer;
    execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
        let region = vk::BufferCopy::default().size(size);
        device.cmd_copy_buffer(cmd, src, dst, &[region]);
    })?;

    gpu.allocator().lock().free_buffer(&mut staging)?;

    Ok(buffer)
}

/// A drawable instance: a model bound to a material's descriptor sets.
pub struct Mesh {
    model: Model,
    descriptor_sets: Vec<vk::DescriptorSet>,
    pool_index: Option<usize>,
}

impl Mesh {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            descriptor_sets: Vec::new(),
            pool_index: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// The descriptor set for a frame, when allocation succeeded.
    pub fn descriptor_set(&self, frame_index: usize) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(frame_index).copied()
    }

    /// Pool index the sets were drawn from.
    pub fn pool_index(&self) -> Option<usize> {
        self.pool_index
    }

    /// Allocate one descriptor set per frame from the material's allocator,
    /// bound to this model's uniform buffers and the material's textures.
    ///
    /// On failure the mesh keeps no pool index and must not be drawn.
    ///
    /// # Safety
    /// Model and material resources must already be created.
    pub unsafe fn allocate_sets(&mut self, gpu: &GpuContext, material: &mut Material) -> Result<()> {
        let uniforms = self.model.uniform_buffers();
        let images = material.sampled_images();
        let ubo_size = std::mem::size_of::<UniformBufferObject>() as u64;

        let batch = material.allocator_mut()?.allocate_sets(
            gpu.device(),
            MAX_FRAMES_IN_FLIGHT,
            Some((&uniforms, ubo_size)),
            &images,
        )?;

        self.descriptor_sets = batch.sets;
        self.pool_index = Some(batch.pool_index);
        Ok(())
    }

    /// Return the sets' accounting to the material's allocator. Safe to call
    /// more than once; only the first call releases.
    ///
    /// # Safety
    /// The sets must not be referenced by any in-flight frame.
    pub unsafe fn release(&mut self, gpu: &GpuContext, material: &mut Material) -> Result<()> {
        if let Some(pool_index) = self.pool_index.take() {
            let count = self.descriptor_sets.len() as u32;
            material
                .allocator_mut()?
                .release(gpu.device(), pool_index, count);
            self.descriptor_sets.clear();
        }
        Ok(())
    }

    /// Free the model's buffers. Descriptor accounting must already have
    /// been released.
    ///
    /// # Safety
    /// Nothing from this mesh may be in use.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) {
        self.model.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);

        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 32);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
    }

    #[test]
    fn uniform_block_is_three_mat4() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 192);
    }

    #[test]
    fn quad_geometry() {
        let quad = Model::quad();
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.index_count(), 6);
    }

    #[test]
    fn cube_geometry() {
        let cube = Model::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        // Every index refers to a real vertex
        let max = Model::cube();
        assert!(max.indices.iter().all(|&i| (i as usize) < 24));
    }

    #[test]
    fn mesh_starts_without_sets() {
        let mesh = Mesh::new(Model::quad());
        assert!(mesh.pool_index().is_none());
        assert!(mesh.descriptor_set(0).is_none());
    }

    #[test]
    fn obj_loading_triangulates_and_flips_uvs() {
        use std::io::Write;

        let path = std::env::temp_dir().join("slate_mesh_quad_test.obj");
        {
            let mut file = std::fs::File::create(&path).expect("create temp obj");
            write!(
                file,
                "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
                 vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
                 f 1/1 2/2 3/3 4/4\n"
            )
            .expect("write temp obj");
        }

        let model = Model::from_obj(&path).expect("load obj");
        let _ = std::fs::remove_file(&path);

        // One quad face triangulated over four shared vertices
        assert_eq!(model.vertex_count(), 4);
        assert_eq!(model.index_count(), 6);
        assert!(model.indices.iter().all(|&i| (i as usize) < 4));
        // OBJ's bottom-left texture origin becomes top-left
        assert_eq!(model.vertices[0].tex_coord, [0.0, 1.0]);
        assert_eq!(model.vertices[2].tex_coord, [1.0, 0.0]);
    }

    #[test]
    fn missing_obj_is_an_error() {
        let path = std::env::temp_dir().join("slate_mesh_missing_test.obj");
        assert!(Model::from_obj(&path).is_err());
    }
}
