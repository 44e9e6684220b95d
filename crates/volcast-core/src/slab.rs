//! Oriented clip box for ray marching.
//!
//! A slab lives in volume space: positions are measured in shape units
//! (voxels, with the slice axis scaled by the slice gap) from the volume's
//! corner at texture coordinate 0. Samples outside the slab do not
//! contribute to the image.

use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// An oriented box used to clip rays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slab {
    /// Center in volume space.
    center: Vec3,
    /// Full extents along the slab's local axes.
    shape: Vec3,
    /// Rotation from slab-local axes to volume axes.
    orient: Quat,
    /// Shape of the volume the slab clips.
    volume_shape: Vec3,
}

impl Slab {
    /// Creates a slab covering the whole volume.
    pub fn new(volume_shape: Vec3) -> Self {
        Self {
            center: volume_shape * 0.5,
            shape: volume_shape,
            orient: Quat::IDENTITY,
            volume_shape,
        }
    }

    /// Creates a slab with a specific pose.
    pub fn with_pose(volume_shape: Vec3, center: Vec3, shape: Vec3, orient: Quat) -> Self {
        Self {
            center,
            shape: shape.abs(),
            orient: orient.normalize(),
            volume_shape,
        }
    }

    /// Restores the no-clipping pose: volume center, volume shape, no rotation.
    pub fn reset(&mut self) {
        *self = Self::new(self.volume_shape);
    }

    /// Re-targets the slab at a newly loaded volume and resets it.
    pub fn reset_to(&mut self, volume_shape: Vec3) {
        *self = Self::new(volume_shape);
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn set_center(&mut self, center: Vec3) {
        self.center = center;
    }

    pub fn shape(&self) -> Vec3 {
        self.shape
    }

    pub fn set_shape(&mut self, shape: Vec3) {
        self.shape = shape.abs();
    }

    pub fn orient(&self) -> Quat {
        self.orient
    }

    pub fn set_orient(&mut self, orient: Quat) {
        self.orient = orient.normalize();
    }

    pub fn volume_shape(&self) -> Vec3 {
        self.volume_shape
    }

    /// Half extents.
    pub fn half_extents(&self) -> Vec3 {
        self.shape * 0.5
    }

    /// The 8 corners in texture coordinates.
    pub fn corners(&self) -> [Vec3; 8] {
        let h = self.half_extents();
        let signs = [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
        ];
        signs.map(|s| (self.center + self.orient * (s * h)) / self.volume_shape)
    }

    /// Slab-local position of a texture coordinate.
    pub fn to_local(&self, tc: Vec3) -> Vec3 {
        self.orient.inverse() * (tc * self.volume_shape - self.center)
    }

    /// Whether a texture coordinate lies inside the slab (boundary included).
    pub fn contains(&self, tc: Vec3) -> bool {
        within(self.to_local(tc), self.half_extents())
    }

    /// Matrix form of [`Slab::to_local`], used by GPU programs.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.orient.inverse())
            * Mat4::from_translation(-self.center)
            * Mat4::from_scale(self.volume_shape)
    }

    /// Hoists the slab transform out of a march along
    /// `tc(t) = tc_origin + tc_dir * t`.
    pub fn ray(&self, tc_origin: Vec3, tc_dir: Vec3) -> SlabRay {
        let inv = self.orient.inverse();
        SlabRay {
            origin: inv * (tc_origin * self.volume_shape - self.center),
            dir: inv * (tc_dir * self.volume_shape),
            half: self.half_extents(),
            orient: Mat3::from_quat(self.orient),
        }
    }
}

impl Default for Slab {
    fn default() -> Self {
        Self::new(Vec3::ONE)
    }
}

fn within(local: Vec3, half: Vec3) -> bool {
    local.abs().cmple(half * (1.0 + 1e-4) + 1e-6).all()
}

/// A slab transform specialised to one ray: slab-local position is linear in
/// the march distance.
#[derive(Debug, Clone, Copy)]
pub struct SlabRay {
    origin: Vec3,
    dir: Vec3,
    half: Vec3,
    orient: Mat3,
}

impl SlabRay {
    /// Slab-local position at distance `t`.
    pub fn local_at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }

    /// Whether the ray is inside the slab at distance `t`.
    pub fn contains_at(&self, t: f32) -> bool {
        within(self.local_at(t), self.half)
    }

    /// Distance in shape units to the nearest slab face at `t`, with that
    /// face's outward normal in volume axes.
    pub fn nearest_face(&self, t: f32) -> (f32, Vec3) {
        let local = self.local_at(t);
        let gap = self.half - local.abs();
        let axis = if gap.x <= gap.y && gap.x <= gap.z {
            Vec3::X * local.x.signum()
        } else if gap.y <= gap.z {
            Vec3::Y * local.y.signum()
        } else {
            Vec3::Z * local.z.signum()
        };
        (gap.min_element().max(0.0), self.orient * axis)
    }
}

/// GPU-compatible slab uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SlabUniforms {
    /// Texture space to slab-local transform.
    pub local_from_texture: [[f32; 4]; 4],
    /// Rotation from slab-local to volume axes.
    pub orient: [[f32; 4]; 4],
    /// Half extents, w = 1.0 when clipping is enabled.
    pub half: [f32; 4],
}

impl SlabUniforms {
    pub fn new(slab: &Slab, enabled: bool) -> Self {
        Self {
            local_from_texture: slab.local_matrix().to_cols_array_2d(),
            orient: Mat4::from_quat(slab.orient).to_cols_array_2d(),
            half: slab
                .half_extents()
                .extend(if enabled { 1.0 } else { 0.0 })
                .to_array(),
        }
    }
}
