//! Shadow maps for directional lights.
//!
//! Each shadow-casting light gets a reduced ray march from its point of
//! view. Instead of colour, the march records the depth at the end of the
//! run of samples with the largest drop in transmittance, i.e. where the
//! light is mostly absorbed. Depths are stored as 16 bits split over two
//! 8-bit channels, and both lights share one texture in stacked halves.

use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

use crate::coords::{self, Ray};
use crate::lights::{LightSet, MAX_LIGHTS};
use crate::raymarch::{pcg_hash, hash_to_unit, RayMarcher};
use crate::sampler::VolumeSampler;

/// Default shadow map resolution per light.
pub const SHADOW_MAP_SIZE: u32 = 256;

/// Number of percentage-closer filter taps.
pub const PCF_SAMPLES: usize = 60;

/// Depth bias against self-shadowing, in normalized light depth.
pub const SHADOW_BIAS: f32 = 0.01;

/// Filter radius in texels at zero softness.
pub const PCF_BASE_RADIUS: f32 = 1.0;

/// Extra filter radius in texels at full softness.
pub const PCF_SOFTNESS_RADIUS: f32 = 6.0;

/// Angle between successive filter taps.
pub const GOLDEN_ANGLE: f32 = 2.399_963;

/// Packs a depth in `[0, 1]` as `(high, low)` bytes.
pub fn encode_depth(depth: f32) -> [u8; 2] {
    let v = (depth.clamp(0.0, 1.0) * 65535.0).round() as u16;
    v.to_be_bytes()
}

/// Inverse of [`encode_depth`].
pub fn decode_depth(bytes: [u8; 2]) -> f32 {
    f32::from(u16::from_be_bytes(bytes)) / 65535.0
}

/// Filter tap `index` on the unit disc: a golden-angle spiral with a fixed
/// per-tap radial jitter.
pub fn pcf_offset(index: u32) -> Vec2 {
    let jitter = hash_to_unit(pcg_hash(index + 1));
    let r = ((index as f32 + jitter) / PCF_SAMPLES as f32).sqrt();
    let theta = index as f32 * GOLDEN_ANGLE;
    Vec2::new(theta.cos(), theta.sin()) * r
}

/// Orthographic projection of the volume's bounding sphere as seen from a
/// light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightProjection {
    view_proj: Mat4,
    inv_view_proj: Mat4,
    /// Distance from the near to the far plane.
    depth_range: f32,
}

impl LightProjection {
    /// `to_light` points from the volume toward the light.
    pub fn new(to_light: Vec3, radius: f32) -> Self {
        let to_light = to_light.normalize_or_zero();
        let to_light = if to_light == Vec3::ZERO { Vec3::Z } else { to_light };
        let radius = radius.max(1e-3);
        let eye = to_light * radius * 2.0;
        let up = if to_light.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, up);
        let proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, radius, radius * 3.0);
        let view_proj = proj * view;
        Self {
            view_proj,
            inv_view_proj: view_proj.inverse(),
            depth_range: radius * 2.0,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.view_proj
    }

    /// Map position (in texels, rows downward) and normalized depth of a
    /// model-space point.
    pub fn project(&self, p: Vec3, size: u32) -> (Vec2, f32) {
        let clip = self.view_proj * p.extend(1.0);
        let ndc = clip.xyz() / clip.w;
        let texel = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5) * size as f32;
        (texel, ndc.z)
    }

    /// Ray through the centre of map texel `(x, y)`, starting on the near
    /// plane; distance along it divided by [`Self::depth_range`] is depth.
    pub fn texel_ray(&self, x: u32, y: u32, size: u32) -> Ray {
        coords::ndc_ray(self.inv_view_proj, coords::pixel_to_ndc(x, y, (size, size)))
    }

    pub fn depth_range(&self) -> f32 {
        self.depth_range
    }
}

/// Shadow maps for both lights in one `size x 2*size` RGBA8 image.
#[derive(Debug, Clone)]
pub struct ShadowMaps {
    size: u32,
    projections: [Option<LightProjection>; MAX_LIGHTS],
    texels: Vec<u8>,
}

impl ShadowMaps {
    /// Projections for the shadow-casting lights of a set.
    pub fn projections(lights: &LightSet, aspect: Vec3) -> [Option<LightProjection>; MAX_LIGHTS] {
        let radius = aspect.length() * 0.5;
        lights
            .lights
            .map(|l| l.casts_shadows().then(|| LightProjection::new(l.direction(), radius)))
    }

    /// Runs the occlusion march for every texel of every shadow-casting
    /// light.
    pub fn generate<S: VolumeSampler>(marcher: &RayMarcher<'_, S>, size: u32) -> Self {
        let projections = Self::projections(&marcher.params().lights, marcher.aspect());
        let mut maps = Self {
            size,
            projections,
            texels: vec![0; (size * size * 2) as usize * 4],
        };
        for (light, projection) in projections.iter().enumerate() {
            let Some(projection) = projection else { continue };
            for y in 0..size {
                for x in 0..size {
                    let ray = projection.texel_ray(x, y, size);
                    let depth = marcher
                        .occlusion_depth(&ray)
                        .map_or(1.0, |t| t / projection.depth_range());
                    maps.set(light, x, y, depth);
                }
            }
            log::debug!("generated {size}x{size} shadow map for light {light}");
        }
        maps
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn projection(&self, light: usize) -> Option<&LightProjection> {
        self.projections.get(light).and_then(Option::as_ref)
    }

    /// The packed RGBA8 image, light 0 in the top half.
    pub fn texels(&self) -> &[u8] {
        &self.texels
    }

    fn offset(&self, light: usize, x: u32, y: u32) -> usize {
        let row = light as u32 * self.size + y;
        (row * self.size + x) as usize * 4
    }

    fn set(&mut self, light: usize, x: u32, y: u32, depth: f32) {
        let [hi, lo] = encode_depth(depth);
        let o = self.offset(light, x, y);
        self.texels[o..o + 4].copy_from_slice(&[hi, lo, 0, 255]);
    }

    /// Stored occluder depth of a map texel.
    pub fn depth(&self, light: usize, x: u32, y: u32) -> f32 {
        let o = self.offset(light, x, y);
        decode_depth([self.texels[o], self.texels[o + 1]])
    }

    /// Lighting multiplier for light `light` at model-space point `p`:
    /// `1 - darkness * occluded_fraction`, never negative.
    pub fn factor(&self, light: usize, p: Vec3, darkness: f32, softness: f32) -> f32 {
        let Some(projection) = self.projection(light) else {
            return 1.0;
        };
        let (center, depth) = projection.project(p, self.size);
        let radius = PCF_BASE_RADIUS + softness.clamp(0.0, 1.0) * PCF_SOFTNESS_RADIUS;
        let max = self.size as f32;

        let mut occluded = 0usize;
        for i in 0..PCF_SAMPLES as u32 {
            let tap = center + pcf_offset(i) * radius;
            if tap.x < 0.0 || tap.y < 0.0 || tap.x >= max || tap.y >= max {
                continue;
            }
            if depth - SHADOW_BIAS > self.depth(light, tap.x as u32, tap.y as u32) {
                occluded += 1;
            }
        }
        let fraction = occluded as f32 / PCF_SAMPLES as f32;
        (1.0 - darkness * fraction).max(0.0)
    }
}

/// GPU-compatible shadow uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniforms {
    pub view_proj: [[[f32; 4]; 4]; MAX_LIGHTS],
    pub inv_view_proj: [[[f32; 4]; 4]; MAX_LIGHTS],
    /// x = map size, y = bias, z/w = depth range of light 0/1.
    pub params: [f32; 4],
}

impl ShadowUniforms {
    pub fn new(projections: &[Option<LightProjection>; MAX_LIGHTS], size: u32) -> Self {
        let mat = |i: usize, f: fn(&LightProjection) -> Mat4| {
            projections[i].as_ref().map_or(Mat4::IDENTITY, f).to_cols_array_2d()
        };
        let range = |i: usize| projections[i].as_ref().map_or(1.0, LightProjection::depth_range);
        Self {
            view_proj: [mat(0, |p| p.view_proj), mat(1, |p| p.view_proj)],
            inv_view_proj: [mat(0, |p| p.inv_view_proj), mat(1, |p| p.inv_view_proj)],
            params: [size as f32, SHADOW_BIAS, range(0), range(1)],
        }
    }
}
