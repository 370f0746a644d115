//! Wavefront OBJ loading.
//!
//! Every face corner becomes a [`Vertex`] (position, white color, texture
//! coordinate with `v` flipped for Vulkan's top-left origin). Identical
//! corners are merged so the index buffer references each unique vertex once.

use std::collections::HashMap;
use std::path::Path;

use glam::{Vec2, Vec3};
use tracing::{debug, info, warn};
use viewer_rhi::vertex::Vertex;

use crate::error::{ResourceError, ResourceResult};

/// De-duplicated triangle list ready for upload.
#[derive(Debug, Default, Clone)]
pub struct Model {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Model {
    /// Loads and triangulates every shape in the OBJ file at `path`.
    ///
    /// Materials referenced by the file are ignored.
    pub fn load_obj(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let (shapes, materials) =
            tobj::load_obj(path, &load_options()).map_err(|source| ResourceError::ObjLoad {
                path: path.to_path_buf(),
                source,
            })?;

        if let Err(e) = materials {
            debug!("Ignoring OBJ materials for {:?}: {}", path, e);
        }

        let model = Self::from_shapes(&shapes)?;
        if model.indices.is_empty() {
            return Err(ResourceError::EmptyModel(path.to_path_buf()));
        }

        info!(
            "Loaded {:?}: {} shape(s), {} unique vertices, {} indices",
            path,
            shapes.len(),
            model.vertices.len(),
            model.indices.len()
        );

        Ok(model)
    }

    /// Builds the merged vertex and index lists from parsed shapes.
    pub fn from_shapes(shapes: &[tobj::Model]) -> ResourceResult<Self> {
        let mut model = Self::default();
        let mut unique: HashMap<Vertex, u32> = HashMap::new();

        for shape in shapes {
            let mesh = &shape.mesh;
            if mesh.texcoord_indices.is_empty() && !mesh.indices.is_empty() {
                warn!("Shape '{}' has no texture coordinates", shape.name);
            }

            for (corner, &position_index) in mesh.indices.iter().enumerate() {
                let position = read_vec3(&mesh.positions, position_index).ok_or_else(|| {
                    malformed(&shape.name, format!("position index {} out of range", position_index))
                })?;

                let tex_coord = match mesh.texcoord_indices.get(corner) {
                    Some(&uv_index) => {
                        let uv = read_vec2(&mesh.texcoords, uv_index).ok_or_else(|| {
                            malformed(
                                &shape.name,
                                format!("texcoord index {} out of range", uv_index),
                            )
                        })?;
                        Vec2::new(uv.x, 1.0 - uv.y)
                    }
                    None => Vec2::ZERO,
                };

                let vertex = Vertex::new(position, Vec3::ONE, tex_coord);
                let index = match unique.get(&vertex) {
                    Some(&index) => index,
                    None => {
                        let index = u32::try_from(model.vertices.len()).map_err(|_| {
                            malformed(&shape.name, "more than u32::MAX unique vertices".into())
                        })?;
                        model.vertices.push(vertex);
                        unique.insert(vertex, index);
                        index
                    }
                };
                model.indices.push(index);
            }
        }

        Ok(model)
    }
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: false,
        ..Default::default()
    }
}

fn read_vec3(data: &[f32], index: u32) -> Option<Vec3> {
    let start = index as usize * 3;
    data.get(start..start + 3).map(Vec3::from_slice)
}

fn read_vec2(data: &[f32], index: u32) -> Option<Vec2> {
    let start = index as usize * 2;
    data.get(start..start + 2).map(Vec2::from_slice)
}

fn malformed(mesh: &str, message: String) -> ResourceError {
    ResourceError::MalformedMesh {
        mesh: mesh.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> tobj::Model {
        let mesh = tobj::Mesh {
            positions: vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, //
                0.0, 1.0, 0.0,
            ],
            texcoords: vec![
                0.0, 0.0, //
                1.0, 0.0, //
                1.0, 1.0, //
                0.0, 1.0,
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
            texcoord_indices: vec![0, 1, 2, 2, 3, 0],
            ..Default::default()
        };
        tobj::Model::new(mesh, "quad".to_string())
    }

    #[test]
    fn test_shared_corners_are_merged() {
        let model = Model::from_shapes(&[quad()]).unwrap();

        assert_eq!(model.vertices.len(), 4);
        assert_eq!(model.indices, vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn test_v_coordinate_is_flipped() {
        let model = Model::from_shapes(&[quad()]).unwrap();

        assert_eq!(model.vertices[0].tex_coord, Vec2::new(0.0, 1.0));
        assert_eq!(model.vertices[2].tex_coord, Vec2::new(1.0, 0.0));
        assert!(model.vertices.iter().all(|v| v.color == Vec3::ONE));
    }

    #[test]
    fn test_same_position_different_uv_stays_distinct() {
        let mut shape = quad();
        shape.mesh.texcoord_indices = vec![0, 1, 2, 3, 3, 0];

        let model = Model::from_shapes(&[shape]).unwrap();
        assert_eq!(model.vertices.len(), 5);
        assert_eq!(model.indices.len(), 6);
        assert!(model.indices.iter().all(|&i| (i as usize) < model.vertices.len()));
    }

    #[test]
    fn test_missing_texcoords_default_to_zero() {
        let mut shape = quad();
        shape.mesh.texcoords.clear();
        shape.mesh.texcoord_indices.clear();

        let model = Model::from_shapes(&[shape]).unwrap();
        assert_eq!(model.vertices.len(), 4);
        assert!(model.vertices.iter().all(|v| v.tex_coord == Vec2::ZERO));
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let mut shape = quad();
        shape.mesh.indices[1] = 9;

        let err = Model::from_shapes(&[shape]).unwrap_err();
        assert!(matches!(err, ResourceError::MalformedMesh { .. }));
    }
}
