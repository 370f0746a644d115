//! Loading assets from files on disk.

use std::fs;

use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};
use tempfile::tempdir;

use viewer_resources::{Model, ResourceError, TextureData};

const QUAD_OBJ: &str = "\
# unit quad as a single polygon
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
f 1/1 2/2 3/3 4/4
";

#[test]
fn test_load_obj_triangulates_and_merges() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quad.obj");
    fs::write(&path, QUAD_OBJ).unwrap();

    let model = Model::load_obj(&path).unwrap();

    assert_eq!(model.indices.len(), 6);
    assert_eq!(model.vertices.len(), 4);
    assert!(
        model
            .indices
            .iter()
            .all(|&i| (i as usize) < model.vertices.len())
    );

    let origin = model
        .vertices
        .iter()
        .find(|v| v.position == Vec3::ZERO)
        .unwrap();
    assert_eq!(origin.tex_coord, Vec2::new(0.0, 1.0));
    assert_eq!(origin.color, Vec3::ONE);
}

#[test]
fn test_load_obj_missing_file() {
    let dir = tempdir().unwrap();
    let err = Model::load_obj(&dir.path().join("missing.obj")).unwrap_err();
    assert!(matches!(err, ResourceError::FileNotFound(_)));
}

#[test]
fn test_load_obj_without_faces_is_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("points.obj");
    fs::write(&path, "v 0 0 0\nv 1 0 0\n").unwrap();

    let err = Model::load_obj(&path).unwrap_err();
    assert!(matches!(err, ResourceError::EmptyModel(_)));
}

#[test]
fn test_load_png_as_rgba8() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("checker.png");

    let image = RgbaImage::from_fn(4, 2, |x, _| {
        if x % 2 == 0 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 128])
        }
    });
    image.save(&path).unwrap();

    let texture = TextureData::load(&path).unwrap();

    assert_eq!((texture.width, texture.height), (4, 2));
    assert_eq!(texture.byte_len(), 4 * 2 * 4);
    assert_eq!(&texture.pixels[0..4], &[255, 0, 0, 255]);
    assert_eq!(&texture.pixels[4..8], &[0, 0, 255, 128]);
}

#[test]
fn test_load_garbage_image_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.png");
    fs::write(&path, b"not a png").unwrap();

    let err = TextureData::load(&path).unwrap_err();
    assert!(matches!(err, ResourceError::Image { .. }));
}
