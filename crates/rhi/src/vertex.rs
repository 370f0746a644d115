//! Vertex format and its input descriptions.
//!
//! | location | field       | format              | offset |
//! |----------|-------------|---------------------|--------|
//! | 0        | `position`  | `R32G32B32_SFLOAT`  | 0      |
//! | 1        | `color`     | `R32G32B32_SFLOAT`  | 12     |
//! | 2        | `tex_coord` | `R32G32_SFLOAT`     | 24     |

use std::hash::{Hash, Hasher};
use std::mem::offset_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Mesh vertex: position, per-vertex color, and texture coordinate.
///
/// Equality and hashing compare the exact bit patterns of every component,
/// which is what vertex de-duplication needs (`-0.0` and `0.0` are distinct,
/// a NaN equals itself).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }

    fn bits(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);
        assert_eq!(
            Vertex::binding_description().input_rate,
            vk::VertexInputRate::VERTEX
        );
    }

    #[test]
    fn test_attribute_descriptions() {
        let attrs = Vertex::attribute_descriptions();

        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);

        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[1].format, vk::Format::R32G32B32_SFLOAT);

        assert_eq!(attrs[2].location, 2);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);

        assert!(attrs.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn test_equal_vertices_hash_once() {
        let a = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, Vec2::new(0.5, 0.25));
        let b = a;
        let c = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, Vec2::new(0.5, 0.75));

        let set: HashSet<Vertex> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_equality_is_bitwise() {
        let positive = Vertex::new(Vec3::ZERO, Vec3::ONE, Vec2::ZERO);
        let negative = Vertex::new(Vec3::new(-0.0, 0.0, 0.0), Vec3::ONE, Vec2::ZERO);
        assert_ne!(positive, negative);

        let nan = Vertex::new(Vec3::splat(f32::NAN), Vec3::ONE, Vec2::ZERO);
        assert_eq!(nan, nan);
    }

    #[test]
    fn test_vertex_is_pod() {
        let vertices = [Vertex::default(); 4];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 128);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
