//! Coordinate conventions shared by every volume pass.
//!
//! All handedness decisions live here:
//!
//! - Model space is right-handed. The volume box is centered at the origin
//!   with extent `aspect = shape / max(shape)`, so its longest side is 1.
//! - Texture space is the unit cube. `x` follows image columns, `y` follows
//!   image rows and `z` follows the slice index; slice 0 sits at `z = 0`.
//!   `texture = model / aspect + 0.5` with no axis reversal.
//! - The camera sits on +Z looking toward −Z. Clip-space depth is `[0, 1]`.
//! - Pixel rows grow downward: pixel row 0 maps to NDC `y = +1`.

use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

/// Direction the default camera looks along.
pub const CAMERA_FORWARD: Vec3 = Vec3::NEG_Z;

/// A ray in model space. `dir` is unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self {
            origin,
            dir: dir.normalize_or_zero(),
        }
    }

    /// Point at distance `t` along the ray.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }

    /// Intersects the ray with the box `[-half, half]`.
    ///
    /// Returns the entry and exit distances, with entry clamped to 0 when the
    /// origin is inside the box.
    pub fn intersect_box(&self, half: Vec3) -> Option<(f32, f32)> {
        let inv = self.dir.recip();
        let t0 = (-half - self.origin) * inv;
        let t1 = (half - self.origin) * inv;
        let near = t0.min(t1);
        let far = t0.max(t1);

        let t_near = near.max_element();
        let t_far = far.min_element();
        if t_far < 0.0 || t_near > t_far {
            return None;
        }
        Some((t_near.max(0.0), t_far))
    }

    /// Intersects the ray with a sphere, returning the nearest non-negative hit.
    pub fn intersect_sphere(&self, center: Vec3, radius: f32) -> Option<f32> {
        let oc = self.origin - center;
        let b = oc.dot(self.dir);
        let c = oc.length_squared() - radius * radius;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let root = disc.sqrt();
        let t = if -b - root >= 0.0 { -b - root } else { -b + root };
        (t >= 0.0).then_some(t)
    }
}

/// Model-space extent of a volume of the given physical shape.
pub fn aspect_of(shape: Vec3) -> Vec3 {
    let max = shape.max_element();
    if max > 0.0 {
        shape / max
    } else {
        Vec3::ONE
    }
}

/// Model space to texture space.
pub fn model_to_texture(p: Vec3, aspect: Vec3) -> Vec3 {
    p / aspect + 0.5
}

/// Texture space to model space.
pub fn texture_to_model(tc: Vec3, aspect: Vec3) -> Vec3 {
    (tc - 0.5) * aspect
}

/// Whether a texture coordinate lies in the closed unit cube.
pub fn in_unit_cube(tc: Vec3) -> bool {
    tc.cmpge(Vec3::ZERO).all() && tc.cmple(Vec3::ONE).all()
}

/// NDC position of the center of pixel `(px, py)` in a `size` viewport.
pub fn pixel_to_ndc(px: u32, py: u32, size: (u32, u32)) -> Vec2 {
    let x = (px as f32 + 0.5) / size.0 as f32 * 2.0 - 1.0;
    let y = 1.0 - (py as f32 + 0.5) / size.1 as f32 * 2.0;
    Vec2::new(x, y)
}

/// Unprojects an NDC position into a model-space ray running from the near
/// plane toward the far plane.
pub fn ndc_ray(inv_view_proj: Mat4, ndc: Vec2) -> Ray {
    let near = inv_view_proj * ndc.extend(0.0).extend(1.0);
    let far = inv_view_proj * ndc.extend(1.0).extend(1.0);
    let near = near.xyz() / near.w;
    let far = far.xyz() / far.w;
    Ray::new(near, far - near)
}
