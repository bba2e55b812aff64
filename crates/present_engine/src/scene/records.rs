//! Resource records stored in the scene tables
//!
//! Records are logical data. The asset importer fills them in; the renderer
//! creates GPU objects from them while binding resources and owns those
//! objects itself. All cross-references are typed handles.

use serde::{Deserialize, Serialize};

use crate::foundation::math::{Mat4, Point3f, Quat, Vec3};

slotmap::new_key_type! {
    /// Handle to a [`Texture`]
    pub struct TextureHandle;
    /// Handle to a [`Material`]
    pub struct MaterialHandle;
    /// Handle to a [`Mesh`]
    pub struct MeshHandle;
    /// Handle to a [`Transform`]
    pub struct TransformHandle;
    /// Handle to an [`Instance`]
    pub struct InstanceHandle;
    /// Handle to a [`Camera`]
    pub struct CameraHandle;
}

/// Diffuse map pixels in RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    /// Debug name
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Tightly packed RGBA8 rows
    pub pixels: Vec<u8>,
}

impl Texture {
    /// Create a texture, checking the pixel count against the extent
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let texture = Self {
            name: name.into(),
            width,
            height,
            pixels,
        };
        texture.validate().is_ok().then_some(texture)
    }

    /// Whether the texture has no pixels to upload
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check the pixel buffer against the extent
    pub fn validate(&self) -> Result<(), TextureError> {
        let expected = u64::from(self.width) * u64::from(self.height) * 4;
        if self.pixels.len() as u64 == expected {
            Ok(())
        } else {
            Err(TextureError::PixelCount {
                name: self.name.clone(),
                expected,
                actual: self.pixels.len(),
            })
        }
    }

    /// Single-color 1x1 texture
    pub fn solid(name: impl Into<String>, rgba: [u8; 4]) -> Self {
        Self {
            name: name.into(),
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }
}

/// Problems found by [`Texture::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextureError {
    /// Pixel buffer length does not match width * height * 4
    #[error("Texture '{name}': expected {expected} bytes of RGBA8, got {actual}")]
    PixelCount {
        /// Texture name
        name: String,
        /// Bytes implied by the extent
        expected: u64,
        /// Bytes present
        actual: usize,
    },
}

/// Phong-style surface description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Debug name
    pub name: String,
    /// Ambient reflectance
    pub ambient: [f32; 3],
    /// Diffuse reflectance
    pub diffuse: [f32; 3],
    /// Specular reflectance
    pub specular: [f32; 3],
    /// Specular exponent
    pub shininess: f32,
    /// Optional diffuse map
    #[serde(skip)]
    pub diffuse_map: Option<TextureHandle>,
}

impl Material {
    /// Untextured material with a flat diffuse color
    pub fn flat(name: impl Into<String>, diffuse: [f32; 3]) -> Self {
        Self {
            name: name.into(),
            ambient: [0.1, 0.1, 0.1],
            diffuse,
            specular: [0.5, 0.5, 0.5],
            shininess: 32.0,
            diffuse_map: None,
        }
    }

    /// Attach a diffuse map
    pub fn with_diffuse_map(mut self, texture: TextureHandle) -> Self {
        self.diffuse_map = Some(texture);
        self
    }
}

/// Contiguous index range drawn with one material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSlice {
    /// First index in the mesh index buffer
    pub index_offset: u32,
    /// Number of triangles in the slice
    pub triangle_count: u32,
    /// Material used for the slice
    pub material: MaterialHandle,
}

impl MeshSlice {
    /// Number of indices covered by the slice
    pub fn index_count(&self) -> u64 {
        u64::from(self.triangle_count) * 3
    }
}

/// Problems found by [`Mesh::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    /// Attribute arrays disagree on the vertex count
    #[error("Mesh '{name}': attribute arrays disagree ({positions} positions, {normals} normals, {uvs} uvs)")]
    AttributeMismatch {
        /// Mesh name
        name: String,
        /// Position count
        positions: usize,
        /// Normal count
        normals: usize,
        /// UV count
        uvs: usize,
    },
    /// An index points past the last vertex
    #[error("Mesh '{name}': index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Mesh name
        name: String,
        /// Offending index
        index: u32,
        /// Vertex count
        vertex_count: usize,
    },
    /// A slice reaches past the index buffer
    #[error("Mesh '{name}': slice {slice} ends at index {end}, buffer has {index_count}")]
    SliceOutOfRange {
        /// Mesh name
        name: String,
        /// Slice position
        slice: usize,
        /// One past the last index used by the slice
        end: u64,
        /// Index buffer length
        index_count: usize,
    },
}

/// Triangle mesh with per-material draw slices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    /// Debug name
    pub name: String,
    /// xyz positions
    pub positions: Vec<f32>,
    /// xyz normals (empty or one per position)
    pub normals: Vec<f32>,
    /// uv coordinates (empty or one per position)
    pub uvs: Vec<f32>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Draw slices, one per material
    pub slices: Vec<MeshSlice>,
}

/// Floats per interleaved vertex: position, normal, uv
pub const VERTEX_STRIDE_FLOATS: usize = 8;

impl Mesh {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Total triangles across all slices
    pub fn triangle_count(&self) -> u64 {
        self.slices.iter().map(|s| u64::from(s.triangle_count)).sum()
    }

    /// Check attribute counts, index range and slice bounds
    pub fn validate(&self) -> Result<(), MeshError> {
        let vertex_count = self.vertex_count();
        let normals = self.normals.len() / 3;
        let uvs = self.uvs.len() / 2;
        if self.positions.len() % 3 != 0
            || (!self.normals.is_empty() && normals != vertex_count)
            || (!self.uvs.is_empty() && uvs != vertex_count)
        {
            return Err(MeshError::AttributeMismatch {
                name: self.name.clone(),
                positions: vertex_count,
                normals,
                uvs,
            });
        }

        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange {
                name: self.name.clone(),
                index,
                vertex_count,
            });
        }

        for (slice_index, slice) in self.slices.iter().enumerate() {
            let end = u64::from(slice.index_offset) + slice.index_count();
            if end > self.indices.len() as u64 {
                return Err(MeshError::SliceOutOfRange {
                    name: self.name.clone(),
                    slice: slice_index,
                    end,
                    index_count: self.indices.len(),
                });
            }
        }

        Ok(())
    }

    /// Pack position, normal and uv per vertex
    ///
    /// Missing normals default to +Z and missing uvs to zero.
    pub fn interleaved_vertices(&self) -> Vec<f32> {
        let count = self.vertex_count();
        let mut out = Vec::with_capacity(count * VERTEX_STRIDE_FLOATS);
        for i in 0..count {
            out.extend_from_slice(&self.positions[i * 3..i * 3 + 3]);
            match self.normals.get(i * 3..i * 3 + 3) {
                Some(n) => out.extend_from_slice(n),
                None => out.extend_from_slice(&[0.0, 0.0, 1.0]),
            }
            match self.uvs.get(i * 2..i * 2 + 2) {
                Some(uv) => out.extend_from_slice(uv),
                None => out.extend_from_slice(&[0.0, 0.0]),
            }
        }
        out
    }
}

/// Position, rotation and scale of an instance
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// World position
    pub position: Vec3,
    /// Per-axis scale
    pub scale: Vec3,
    /// World rotation
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotation: Quat::identity(),
        }
    }
}

impl Transform {
    /// Identity transform at a position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Model matrix: translate * rotate * scale
    pub fn matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// One drawable occurrence of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance {
    /// Mesh to draw
    pub mesh: MeshHandle,
    /// Placement of the mesh
    pub transform: TransformHandle,
}

/// Perspective camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position
    pub eye: Point3f,
    /// Look-at target
    pub target: Point3f,
    /// Up direction
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width / height
    pub aspect: f32,
    /// Near clip distance
    pub near_z: f32,
    /// Far clip distance
    pub far_z: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Point3f::new(0.0, 0.0, 3.0),
            target: Point3f::origin(),
            up: Vec3::y(),
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near_z: 0.1,
            far_z: 100.0,
        }
    }
}

impl Camera {
    /// Right-handed look-at view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(&self.eye, &self.target, &self.up)
    }

    /// Perspective projection with Vulkan's inverted Y
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::new_perspective(self.aspect, self.fov_y, self.near_z, self.far_z);
        proj[(1, 1)] *= -1.0;
        proj
    }

    /// Match the aspect ratio to a swapchain extent
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}
