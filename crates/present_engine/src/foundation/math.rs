//! Math utilities and types
//!
//! The renderer only consumes math values; all algebra comes from nalgebra.

pub use nalgebra::{Matrix4, Point3, Quaternion, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3f = Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;
