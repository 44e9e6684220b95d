//! Directional lighting.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Number of directional lights.
pub const MAX_LIGHTS: usize = 2;

/// A directional light.
///
/// `dir` points from the volume toward the light, in model space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirLight {
    pub diffuse: f32,
    pub spec_strength: f32,
    pub spec_exp: f32,
    /// Multiplier on the occluded fraction; 0 disables shadows for this light.
    pub shadow_darkness: f32,
    /// Spread of the shadow filter, 0..1.
    pub shadow_softness: f32,
    pub dir: Vec3,
}

impl DirLight {
    /// Unit direction toward the light.
    pub fn direction(&self) -> Vec3 {
        let d = self.dir.normalize_or_zero();
        if d == Vec3::ZERO {
            Vec3::Z
        } else {
            d
        }
    }

    pub fn casts_shadows(&self) -> bool {
        self.shadow_darkness > 0.0
    }
}

impl Default for DirLight {
    fn default() -> Self {
        Self {
            diffuse: 0.0,
            spec_strength: 0.0,
            spec_exp: 1.0,
            shadow_darkness: 0.0,
            shadow_softness: 0.75,
            dir: Vec3::new(-0.9, 0.0, 0.4359),
        }
    }
}

/// Ambient term plus two directional lights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightSet {
    pub ambient: f32,
    pub lights: [DirLight; MAX_LIGHTS],
}

impl LightSet {
    /// Ambient-only lighting.
    pub fn ambient_only(ambient: f32) -> Self {
        Self {
            ambient,
            lights: [DirLight::default(); MAX_LIGHTS],
        }
    }

    /// Whether any light needs a shadow map.
    pub fn shadows_enabled(&self) -> bool {
        self.lights.iter().any(DirLight::casts_shadows)
    }

    /// Lighting multiplier for a sample.
    ///
    /// `normal` may be zero (flat region), in which case only the ambient
    /// term applies. `to_eye` is the unit vector toward the viewer and
    /// `shadow` holds each light's shadow factor.
    pub fn shade(&self, rgb: Vec3, normal: Vec3, to_eye: Vec3, shadow: [f32; MAX_LIGHTS]) -> Vec3 {
        let mut diffuse = self.ambient;
        let mut specular = 0.0;
        if normal != Vec3::ZERO {
            for (light, shadow) in self.lights.iter().zip(shadow) {
                let l = light.direction();
                let n_dot_l = normal.dot(l).max(0.0);
                diffuse += shadow * light.diffuse * n_dot_l;
                if light.spec_strength > 0.0 {
                    let r = reflect(-l, normal);
                    specular += shadow * light.spec_strength * r.dot(to_eye).max(0.0).powf(light.spec_exp);
                }
            }
        }
        rgb * diffuse + Vec3::splat(specular)
    }
}

impl Default for LightSet {
    fn default() -> Self {
        Self {
            ambient: 0.66,
            lights: [
                DirLight {
                    diffuse: 0.22,
                    spec_strength: 0.22,
                    spec_exp: 2.0,
                    shadow_darkness: 0.0,
                    shadow_softness: 0.75,
                    dir: Vec3::new(0.483, -0.420, 0.768),
                },
                DirLight::default(),
            ],
        }
    }
}

fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - 2.0 * n.dot(i) * n
}

/// GPU-compatible light uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniforms {
    /// xyz = direction toward the light, w = diffuse.
    pub dir_diffuse: [[f32; 4]; MAX_LIGHTS],
    /// spec strength, spec exponent, shadow darkness, shadow softness.
    pub spec_shadow: [[f32; 4]; MAX_LIGHTS],
    /// x = ambient.
    pub ambient: [f32; 4],
}

impl From<&LightSet> for LightUniforms {
    fn from(set: &LightSet) -> Self {
        Self {
            dir_diffuse: set.lights.map(|l| l.direction().extend(l.diffuse).to_array()),
            spec_shadow: set.lights.map(|l| {
                [
                    l.spec_strength,
                    l.spec_exp,
                    l.shadow_darkness,
                    l.shadow_softness,
                ]
            }),
            ambient: [set.ambient, 0.0, 0.0, 0.0],
        }
    }
}
