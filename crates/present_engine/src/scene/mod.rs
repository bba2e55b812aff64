//! Scene resource registry
//!
//! One [`ResourceTable`] per resource category. The renderer reads the scene
//! by handle every frame and never keeps positions into the tables.

pub mod records;
pub mod resource_table;

pub use records::{
    Camera, CameraHandle, Instance, InstanceHandle, Material, MaterialHandle, Mesh, MeshError,
    MeshHandle, MeshSlice, Texture, TextureError, TextureHandle, Transform, TransformHandle, VERTEX_STRIDE_FLOATS,
};
pub use resource_table::{handle_from_bits, HandleId, ResourceError, ResourceTable};

use crate::foundation::math::Mat4;

/// A resolved draw: everything needed to record one instance
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    /// Instance being drawn
    pub instance: InstanceHandle,
    /// Mesh the instance references
    pub mesh: MeshHandle,
    /// World matrix of the instance transform
    pub model: Mat4,
}

/// All resource tables for one scene
#[derive(Debug, Default)]
pub struct Scene {
    /// Diffuse maps
    pub textures: ResourceTable<TextureHandle, Texture>,
    /// Surface materials
    pub materials: ResourceTable<MaterialHandle, Material>,
    /// Triangle meshes
    pub meshes: ResourceTable<MeshHandle, Mesh>,
    /// Instance placements
    pub transforms: ResourceTable<TransformHandle, Transform>,
    /// Drawable mesh occurrences
    pub instances: ResourceTable<InstanceHandle, Instance>,
    /// Cameras
    pub cameras: ResourceTable<CameraHandle, Camera>,
    /// Camera used for rendering
    pub main_camera: Option<CameraHandle>,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance after checking both references are live
    pub fn add_instance(
        &mut self,
        mesh: MeshHandle,
        transform: TransformHandle,
    ) -> Result<InstanceHandle, ResourceError> {
        self.meshes.get(mesh)?;
        self.transforms.get(transform)?;
        Ok(self.instances.add(Instance { mesh, transform }))
    }

    /// Add a camera, making it the main camera if there is none yet
    pub fn add_camera(&mut self, camera: Camera) -> CameraHandle {
        let handle = self.cameras.add(camera);
        self.main_camera.get_or_insert(handle);
        handle
    }

    /// The main camera record, if one is set and still live
    pub fn main_camera(&self) -> Option<&Camera> {
        self.main_camera.and_then(|h| self.cameras.get(h).ok())
    }

    /// Resolve every instance into a draw item, in instance iteration order
    pub fn draw_list(&self) -> Result<Vec<DrawItem>, ResourceError> {
        self.instances
            .iter()
            .map(|(handle, instance)| {
                self.meshes.get(instance.mesh)?;
                let transform = self.transforms.get(instance.transform)?;
                Ok(DrawItem {
                    instance: handle,
                    mesh: instance.mesh,
                    model: transform.matrix(),
                })
            })
            .collect()
    }

    /// Check every cross-reference in the scene
    ///
    /// Instances must name live meshes and transforms, mesh slices live
    /// materials, materials live textures, and the main camera a live camera.
    pub fn validate_references(&self) -> Result<(), ResourceError> {
        for (_, instance) in self.instances.iter() {
            self.meshes.get(instance.mesh)?;
            self.transforms.get(instance.transform)?;
        }
        for (_, mesh) in self.meshes.iter() {
            for slice in &mesh.slices {
                self.materials.get(slice.material)?;
            }
        }
        for (_, material) in self.materials.iter() {
            if let Some(texture) = material.diffuse_map {
                self.textures.get(texture)?;
            }
        }
        if let Some(camera) = self.main_camera {
            self.cameras.get(camera)?;
        }
        Ok(())
    }

    /// Total number of live records across all tables
    pub fn resource_count(&self) -> usize {
        self.textures.size()
            + self.materials.size()
            + self.meshes.size()
            + self.transforms.size()
            + self.instances.size()
            + self.cameras.size()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::foundation::math::Vec3;

    /// One textured quad, one instance, one camera
    pub fn quad_scene() -> (Scene, MeshHandle, InstanceHandle) {
        let mut scene = Scene::new();
        let texture = scene.textures.add(Texture::solid("white", [255, 255, 255, 255]));
        let material = scene
            .materials
            .add(Material::flat("quad", [0.8, 0.2, 0.2]).with_diffuse_map(texture));
        let mesh = scene.meshes.add(Mesh {
            name: "quad".to_string(),
            positions: vec![-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0],
            normals: Vec::new(),
            uvs: Vec::new(),
            indices: vec![0, 1, 2, 2, 3, 0],
            slices: vec![MeshSlice {
                index_offset: 0,
                triangle_count: 2,
                material,
            }],
        });
        let transform = scene.transforms.add(Transform::from_position(Vec3::new(0.0, 0.0, -1.0)));
        let instance = scene
            .add_instance(mesh, transform)
            .unwrap_or_else(|e| panic!("fixture instance: {e}"));
        scene.add_camera(Camera::default());
        (scene, mesh, instance)
    }
}
