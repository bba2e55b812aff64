//! Demo scene: one colored quad in front of the camera

use log::info;
use present_engine::prelude::*;

/// Build the demo scene
pub fn quad_scene() -> Result<Scene, RenderError> {
    let mut scene = Scene::new();

    let checker = Texture::new("checker", 2, 2, checker_pixels()).unwrap_or_else(|| Texture::solid("white", [255; 4]));
    let texture = scene.textures.add(checker);
    let material = scene
        .materials
        .add(Material::flat("quad", [0.9, 0.5, 0.2]).with_diffuse_map(texture));

    let mesh = scene.meshes.add(Mesh {
        name: "quad".to_string(),
        positions: vec![-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0],
        normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        uvs: vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        indices: vec![0, 1, 2, 2, 3, 0],
        slices: vec![MeshSlice {
            index_offset: 0,
            triangle_count: 2,
            material,
        }],
    });
    scene.meshes.get(mesh)?.validate()?;

    let transform = scene.transforms.add(Transform::default());
    scene.add_instance(mesh, transform)?;
    scene.add_camera(Camera::default());

    info!("Demo scene ready: {} resources", scene.resource_count());
    Ok(scene)
}

fn checker_pixels() -> Vec<u8> {
    [[255, 255, 255, 255], [40, 40, 40, 255], [40, 40, 40, 255], [255, 255, 255, 255]]
        .concat()
}
