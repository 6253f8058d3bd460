// =============================================================================
// MESH - Vertex layout and OBJ loading with deduplication
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Interleaved vertex: position, color, texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub fn new(pos: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    fn bits(&self) -> [u32; 8] {
        [
            self.pos.x.to_bits(),
            self.pos.y.to_bits(),
            self.pos.z.to_bits(),
            self.color.x.to_bits(),
            self.color.y.to_bits(),
            self.color.z.to_bits(),
            self.tex_coord.x.to_bits(),
            self.tex_coord.y.to_bits(),
        ]
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            // Position (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, pos) as u32)
                .build(),
            // Color (location 1)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, color) as u32)
                .build(),
            // Texture coordinate (location 2)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, tex_coord) as u32)
                .build(),
        ]
    }
}

// Bitwise equality so Eq and Hash agree
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Deduplicated geometry ready for upload
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Load a triangulated OBJ. Every distinct vertex is stored once.
    pub fn load_obj(path: &Path) -> Result<Self> {
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("Failed to load model {:?}", path))?;

        let mut builder = MeshBuilder::default();

        for model in &models {
            let mesh = &model.mesh;
            for &index in &mesh.indices {
                let i = index as usize;
                let pos = Vec3::new(
                    mesh.positions[3 * i],
                    mesh.positions[3 * i + 1],
                    mesh.positions[3 * i + 2],
                );
                // OBJ puts v = 0 at the bottom, Vulkan samples top-down
                let tex_coord = if mesh.texcoords.len() >= 2 * i + 2 {
                    Vec2::new(mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1])
                } else {
                    Vec2::ZERO
                };

                builder.push(Vertex::new(pos, Vec3::ONE, tex_coord));
            }
        }

        let mesh = builder.build();
        log::info!(
            "Loaded model {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }
}

/// Accumulates vertices, reusing the index of any vertex seen before.
#[derive(Default)]
pub struct MeshBuilder {
    unique: HashMap<Vertex, u32>,
    mesh: Mesh,
}

impl MeshBuilder {
    pub fn push(&mut self, vertex: Vertex) {
        let next = self.mesh.vertices.len() as u32;
        let index = *self.unique.entry(vertex).or_insert_with(|| {
            self.mesh.vertices.push(vertex);
            next
        });
        self.mesh.indices.push(index);
    }

    pub fn build(self) -> Mesh {
        self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vertex(x: f32, u: f32) -> Vertex {
        Vertex::new(Vec3::new(x, 0.0, 0.0), Vec3::ONE, Vec2::new(u, 0.0))
    }

    #[test]
    fn identical_vertices_share_a_slot() {
        let mut builder = MeshBuilder::default();
        for v in [vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 0.0), vertex(1.0, 0.0)] {
            builder.push(v);
        }
        let mesh = builder.build();

        assert_eq!(mesh.vertices.len(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 0, 1]);
    }

    #[test]
    fn any_differing_field_makes_a_new_vertex() {
        let mut builder = MeshBuilder::default();
        builder.push(vertex(0.0, 0.0));
        builder.push(vertex(0.0, 0.5));
        let mut recolored = vertex(0.0, 0.0);
        recolored.color = Vec3::new(1.0, 0.0, 0.0);
        builder.push(recolored);
        let mesh = builder.build();

        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn indices_stay_in_range() {
        let mut builder = MeshBuilder::default();
        for i in 0..30 {
            builder.push(vertex((i % 7) as f32, (i % 3) as f32));
        }
        let mesh = builder.build();

        assert_eq!(mesh.indices.len(), 30);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        assert_eq!(mesh.vertices.len(), 21);
    }

    #[test]
    fn signed_zero_is_distinct() {
        // Bitwise comparison: -0.0 and 0.0 are different vertices
        assert_ne!(vertex(0.0, 0.0), vertex(-0.0, 0.0));
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn obj_quad_is_deduplicated_and_flipped() {
        let dir = std::env::temp_dir().join(format!("mesh-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quad.obj");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
             vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
             f 1/1 2/2 3/3 4/4"
        )
        .unwrap();
        drop(file);

        let mesh = Mesh::load_obj(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        // A quad triangulates into two triangles over four corners
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.vertices.iter().all(|v| v.color == Vec3::ONE));

        let origin = mesh
            .vertices
            .iter()
            .find(|v| v.pos == Vec3::ZERO)
            .unwrap();
        assert_eq!(origin.tex_coord, Vec2::new(0.0, 1.0));
    }
}
