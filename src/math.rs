//! Column-major 4x4 matrices and rigid poses used to place cubes and eyes.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }
}

/// Unit quaternion, `w` last as the XR runtime reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `radians` about +Y.
    pub fn from_rotation_y(radians: f32) -> Self {
        let half = radians * 0.5;
        Self::new(0.0, half.sin(), 0.0, half.cos())
    }

    pub fn from_axis_angle(axis: Vec3, radians: f32) -> Self {
        let len = (axis.x * axis.x + axis.y * axis.y + axis.z * axis.z).sqrt();
        if len == 0.0 {
            return Self::IDENTITY;
        }
        let (s, c) = (radians * 0.5).sin_cos();
        let k = s / len;
        Self::new(axis.x * k, axis.y * k, axis.z * k, c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    pub const fn new(orientation: Quat, position: Vec3) -> Self {
        Self {
            orientation,
            position,
        }
    }

    /// Model matrix for this pose at the given scale.
    pub fn matrix(&self, scale: Vec3) -> Mat4 {
        Mat4::compose_trs(self.position, self.orientation, scale)
    }
}

/// Per-eye field of view as tangent-space half angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(half_angle: f32) -> Self {
        Self {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }
}

/// 4x4 matrix stored column-major: element `(row, col)` lives at `col * 4 + row`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[rustfmt::skip]
impl Mat4 {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);
}

impl Mat4 {
    pub fn scale(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = x;
        m.0[5] = y;
        m.0[10] = z;
        m
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }

    /// Rotation matrix for a unit quaternion.
    pub fn from_orientation(q: Quat) -> Self {
        let x2 = q.x + q.x;
        let y2 = q.y + q.y;
        let z2 = q.z + q.z;

        let xx2 = q.x * x2;
        let yy2 = q.y * y2;
        let zz2 = q.z * z2;

        let yz2 = q.y * z2;
        let wx2 = q.w * x2;
        let xy2 = q.x * y2;
        let wz2 = q.w * z2;
        let xz2 = q.x * z2;
        let wy2 = q.w * y2;

        let mut m = [0.0; 16];
        m[0] = 1.0 - yy2 - zz2;
        m[1] = xy2 + wz2;
        m[2] = xz2 - wy2;

        m[4] = xy2 - wz2;
        m[5] = 1.0 - xx2 - zz2;
        m[6] = yz2 + wx2;

        m[8] = xz2 + wy2;
        m[9] = yz2 - wx2;
        m[10] = 1.0 - xx2 - yy2;

        m[15] = 1.0;
        Self(m)
    }

    /// `T * R * S`: scale first, then rotate, then translate.
    pub fn compose_trs(translation: Vec3, orientation: Quat, scale: Vec3) -> Self {
        let s = Self::scale(scale.x, scale.y, scale.z);
        let r = Self::from_orientation(orientation);
        let t = Self::translation(translation.x, translation.y, translation.z);
        t * (r * s)
    }

    /// Asymmetric perspective projection for Vulkan clip space (y down, z in `[0, 1]`).
    ///
    /// A `far_z <= near_z` yields an infinite far plane.
    pub fn projection(fov: Fov, near_z: f32, far_z: f32) -> Self {
        let tan_left = fov.angle_left.tan();
        let tan_right = fov.angle_right.tan();
        let tan_down = fov.angle_down.tan();
        let tan_up = fov.angle_up.tan();

        let tan_width = tan_right - tan_left;
        let tan_height = tan_down - tan_up;

        let mut m = [0.0; 16];
        m[0] = 2.0 / tan_width;
        m[8] = (tan_right + tan_left) / tan_width;

        m[5] = 2.0 / tan_height;
        m[9] = (tan_up + tan_down) / tan_height;

        m[11] = -1.0;

        if far_z <= near_z {
            m[10] = -1.0;
            m[14] = -near_z;
        } else {
            m[10] = -far_z / (far_z - near_z);
            m[14] = -(far_z * near_z) / (far_z - near_z);
        }
        Self(m)
    }

    /// Inverse of a rotation + translation matrix.
    ///
    /// Only valid when the upper 3x3 block is orthonormal; any scale or shear
    /// produces a silently wrong result.
    pub fn rigid_inverse(&self) -> Self {
        let s = &self.0;
        let mut m = [0.0; 16];
        m[0] = s[0];
        m[1] = s[4];
        m[2] = s[8];

        m[4] = s[1];
        m[5] = s[5];
        m[6] = s[9];

        m[8] = s[2];
        m[9] = s[6];
        m[10] = s[10];

        m[12] = -(s[0] * s[12] + s[1] * s[13] + s[2] * s[14]);
        m[13] = -(s[4] * s[12] + s[5] * s[13] + s[6] * s[14]);
        m[14] = -(s[8] * s[12] + s[9] * s[13] + s[10] * s[14]);
        m[15] = 1.0;
        Self(m)
    }

    pub fn multiply(&self, rhs: &Mat4) -> Self {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [0.0; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
            }
        }
        Self(out)
    }

    /// Applies the matrix to a point with an implicit `w = 1`, without the
    /// perspective divide.
    pub fn transform_point(&self, p: Vec3) -> [f32; 4] {
        let m = &self.0;
        std::array::from_fn(|row| m[row] * p.x + m[4 + row] * p.y + m[8 + row] * p.z + m[12 + row])
    }

    pub fn column(&self, col: usize) -> [f32; 4] {
        std::array::from_fn(|row| self.0[col * 4 + row])
    }

    pub fn approx_eq(&self, other: &Mat4, epsilon: f32) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        self.multiply(&rhs)
    }
}
