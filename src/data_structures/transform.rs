//! Local node transforms.
//!
//! A scene node stores position, rotation (as quaternion) and scale relative
//! to its parent. World matrices are derived on demand by the scene graph.

use cgmath::One;

/// Local transformation: position, rotation (as quaternion), and scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Transform {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Builds a transform from glTF `translation`, `rotation` (`[x, y, z, w]`)
    /// and `scale` arrays. Missing components stay at identity.
    pub fn from_gltf(
        translation: Option<[f32; 3]>,
        rotation: Option<[f32; 4]>,
        scale: Option<[f32; 3]>,
    ) -> Self {
        let identity = Self::new();
        Self {
            position: translation.map_or(identity.position, Into::into),
            rotation: rotation.map_or(identity.rotation, |[x, y, z, w]| {
                cgmath::Quaternion::new(w, x, y, z)
            }),
            scale: scale.map_or(identity.scale, Into::into),
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens a matrix into column-major order, the layout WebGL uniforms expect.
pub fn flatten_matrix(matrix: &cgmath::Matrix4<f32>) -> [f32; 16] {
    let columns: [[f32; 4]; 4] = (*matrix).into();
    bytemuck::cast(columns)
}
