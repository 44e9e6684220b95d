//! Per-pixel ray integration: MIP, VR and x-ray compositing, picking.
//!
//! This is the reference implementation of the ray-march programs in
//! `volcast-render`; both walk the ray with the same step rules, sample
//! smoothing, compositing and termination so that CPU and GPU images agree.

use glam::{UVec3, Vec3, Vec4};

use crate::coords::{self, Ray};
use crate::curve::{self, OpacityCurve};
use crate::lights::MAX_LIGHTS;
use crate::mask::ReliefMask;
use crate::overlay::Surface;
use crate::params::{FeatureFlags, ProgramKey, RenderMode, RenderParams};
use crate::sampler::VolumeSampler;
use crate::shadow::ShadowMaps;
use crate::slab::{Slab, SlabRay};
use crate::volume::VolumeInfo;

/// Compositing stops once transmittance drops below this.
pub const TRANSMITTANCE_EPSILON: f32 = 0.02;

/// Optical density normalisation: `T *= (1 - a)^(step * OPACITY_STEP_SCALE)`.
pub const OPACITY_STEP_SCALE: f32 = 128.0;

/// Gain of the x-ray attenuation integral.
pub const XRAY_GAIN: f32 = 1.0;

/// Antialiasing jitter is inserted at one of the first this many steps.
pub const JITTER_WINDOW: u32 = 8;

/// Iteration cap as a multiple of the steps needed to cross the unit cube
/// diagonal.
pub const MAX_STEP_FACTOR: f32 = 2.0;

/// Border sealing falls off over this many voxels.
pub const SEAL_DISTANCE: f32 = 2.0;

/// Bit set in an encoded pick when a voxel was found.
pub const PICK_HIT_BIT: u32 = 1 << 30;

/// PCG hash, identical in the ray-march programs.
pub fn pcg_hash(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Uniform value in `[0, 1)` from a hash.
pub fn hash_to_unit(h: u32) -> f32 {
    (h >> 8) as f32 / 16_777_216.0
}

/// Jitter for a pixel: the step index at which to insert the extra offset
/// and the offset as a fraction of the nominal step.
pub fn pixel_jitter(px: u32, py: u32) -> (u32, f32) {
    let seed = pcg_hash(px.wrapping_add(pcg_hash(py)));
    (seed % JITTER_WINDOW, hash_to_unit(pcg_hash(seed)))
}

/// Iteration cap for a nominal step.
pub fn max_steps(step: f32) -> u32 {
    (3f32.sqrt() / step * MAX_STEP_FACTOR).ceil() as u32 + 2
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Output of one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayResult {
    /// Premultiplied VR colour.
    pub color: Vec3,
    /// Remaining transmittance, 1 for an empty ray.
    pub transmittance: f32,
    /// MIP maximum or clamped x-ray integral, in `[0, 1]`.
    pub intensity: f32,
    /// Nearest overlay colour, its weight reduced by the volume intensity in
    /// front of it (MIP and x-ray only).
    pub overlay: Vec4,
    /// Loop iterations used.
    pub steps: u32,
}

impl RayResult {
    pub const EMPTY: Self = Self {
        color: Vec3::ZERO,
        transmittance: 1.0,
        intensity: 0.0,
        overlay: Vec4::ZERO,
        steps: 0,
    };

    /// `(r, g, b, 1 - T)` for VR, `(intensity, 0, 0, 1)` otherwise.
    pub fn volume_texel(&self, mode: RenderMode) -> Vec4 {
        match mode {
            RenderMode::Vr => self.color.extend(1.0 - self.transmittance),
            RenderMode::Mip | RenderMode::XRay => Vec4::new(self.intensity, 0.0, 0.0, 1.0),
        }
    }
}

/// Voxel located by a pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickResult {
    pub voxel: Option<UVec3>,
}

impl PickResult {
    /// Packs the voxel into 10 bits per axis plus a hit bit.
    pub fn encode(&self) -> u32 {
        match self.voxel {
            Some(v) => {
                let v = v.min(UVec3::splat(1023));
                v.x | (v.y << 10) | (v.z << 20) | PICK_HIT_BIT
            }
            None => 0,
        }
    }

    pub fn decode(bits: u32) -> Self {
        let voxel = (bits & PICK_HIT_BIT != 0)
            .then(|| UVec3::new(bits & 1023, (bits >> 10) & 1023, (bits >> 20) & 1023));
        Self { voxel }
    }

    /// Encoded form as RGBA8 bytes.
    pub fn to_rgba(&self) -> [u8; 4] {
        self.encode().to_le_bytes()
    }

    pub fn from_rgba(rgba: [u8; 4]) -> Self {
        Self::decode(u32::from_le_bytes(rgba))
    }
}

/// Tracks the contiguous run of decreasing transmittance with the largest
/// total drop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DropTracker {
    run_start: f32,
    in_run: bool,
    best_drop: f32,
    best_t: Option<f32>,
}

impl DropTracker {
    pub(crate) fn new() -> Self {
        Self {
            run_start: 1.0,
            in_run: false,
            best_drop: 0.0,
            best_t: None,
        }
    }

    pub(crate) fn update(&mut self, before: f32, after: f32, t: f32) {
        if after < before {
            if !self.in_run {
                self.run_start = before;
                self.in_run = true;
            }
            let drop = self.run_start - after;
            if drop > self.best_drop {
                self.best_drop = drop;
                self.best_t = Some(t);
            }
        } else {
            self.in_run = false;
        }
    }

    /// Distance at the end of the best run.
    pub(crate) fn best_t(&self) -> Option<f32> {
        self.best_t
    }
}

/// Outcome of a MIP or x-ray march.
#[derive(Debug, Clone, Copy)]
struct ScalarMarch {
    result: RayResult,
    /// Distance of the strongest sample.
    best_t: Option<f32>,
    /// Intensity accumulated in front of the nearest overlay surface.
    in_front: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipState {
    Normal,
    Skipping,
    Recovering,
}

/// A relief mask seen along one ray, in texture coordinates.
struct MaskRay<'m> {
    mask: &'m ReliefMask,
    origin: Vec3,
    dir: Vec3,
}

/// Step bookkeeping shared by all modes.
struct Walk<'m> {
    t: f32,
    t_end: f32,
    step: f32,
    iter: u32,
    max_iter: u32,
    jitter: Option<(u32, f32)>,
    slab: Option<SlabRay>,
    entered_slab: bool,
    mask: Option<MaskRay<'m>>,
    window: Option<[f32; 3]>,
}

enum WalkStep {
    /// Take a sample at `t`.
    Sample,
    /// Outside the slab; the walk already advanced.
    Skipped,
    /// Hidden by the relief mask; the walk already advanced.
    Masked,
    /// Out of range or out of iterations.
    Done,
}

impl Walk<'_> {
    fn next(&mut self) -> WalkStep {
        if self.iter >= self.max_iter || self.t > self.t_end {
            return WalkStep::Done;
        }
        if let Some((k, offset)) = self.jitter {
            if self.iter == k {
                self.t += offset * self.step;
                self.window = None;
                if self.t > self.t_end {
                    return WalkStep::Done;
                }
            }
        }
        self.iter += 1;

        if let Some(slab) = &self.slab {
            if !slab.contains_at(self.t) {
                if self.entered_slab {
                    return WalkStep::Done;
                }
                self.advance(2.0 * self.step);
                return WalkStep::Skipped;
            }
            self.entered_slab = true;
        }

        if let Some(m) = &self.mask {
            if m.mask.hides(m.origin + m.dir * self.t) {
                self.window = None;
                self.advance(self.step);
                return WalkStep::Masked;
            }
        }
        WalkStep::Sample
    }

    fn advance(&mut self, dt: f32) {
        self.t += dt;
        if dt != self.step {
            self.window = None;
        }
    }

    fn back_up(&mut self) {
        self.t -= self.step;
        self.window = None;
    }
}

/// Ray marcher over one volume for one frame.
pub struct RayMarcher<'a, S> {
    sampler: &'a S,
    params: &'a RenderParams,
    lut: Vec<Vec4>,
    flags: FeatureFlags,
    aspect: Vec3,
    dims: UVec3,
    shape: Vec3,
    step: f32,
    max_steps: u32,
    slab: Slab,
    shadows: Option<&'a ShadowMaps>,
    mask: Option<&'a ReliefMask>,
}

impl<'a, S: VolumeSampler> RayMarcher<'a, S> {
    pub fn new(sampler: &'a S, info: &VolumeInfo, params: &'a RenderParams, slab: &Slab) -> Self {
        let flags = ProgramKey::for_frame(params, FeatureFlags::empty(), false).flags;
        let step = params.step_size(info.dims());
        Self {
            sampler,
            params,
            lut: lut_vec4(&params.curve),
            flags,
            aspect: info.aspect(),
            dims: info.dims(),
            shape: info.shape(),
            step,
            max_steps: max_steps(step),
            slab: *slab,
            shadows: None,
            mask: None,
        }
    }

    /// Uses shadow maps for lighting.
    #[must_use]
    pub fn with_shadows(mut self, shadows: &'a ShadowMaps) -> Self {
        self.shadows = Some(shadows);
        self
    }

    /// Skips samples hidden by `mask` when the parameters enable masking.
    /// A mask made for other volume dims is ignored.
    #[must_use]
    pub fn with_mask(mut self, mask: &'a ReliefMask) -> Self {
        if mask.fits(self.dims) {
            self.mask = Some(mask);
        } else {
            log::warn!(
                "ignoring {}x{} relief mask for a {} volume",
                mask.width(),
                mask.height(),
                self.dims
            );
        }
        self
    }

    /// Flags of the equivalent GPU program.
    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn aspect(&self) -> Vec3 {
        self.aspect
    }

    pub(crate) fn params(&self) -> &RenderParams {
        self.params
    }

    fn sample(&self, p: Vec3) -> f32 {
        self.sampler.sample(coords::model_to_texture(p, self.aspect))
    }

    fn lookup(&self, v: f32) -> Vec4 {
        self.lut
            .get(curve::lut_index(v))
            .copied()
            .unwrap_or(Vec4::ZERO)
    }

    /// 3-point running average at the walk's position.
    fn smoothed(&self, ray: &Ray, walk: &mut Walk<'_>) -> f32 {
        let ahead = self.sample(ray.at(walk.t + self.step));
        let window = match walk.window {
            Some([_, cur, next]) => [cur, next, ahead],
            None => {
                let cur = self.sample(ray.at(walk.t));
                [cur, cur, ahead]
            }
        };
        walk.window = Some(window);
        (window[0] + window[1] + window[2]) / 3.0
    }

    fn begin(&self, ray: &Ray, t0: f32, t1: f32, jitter: Option<(u32, f32)>) -> Walk<'a> {
        let slab = self.flags.contains(FeatureFlags::SLAB).then(|| {
            self.slab.ray(
                coords::model_to_texture(ray.origin, self.aspect),
                ray.dir / self.aspect,
            )
        });
        let mask = self
            .mask
            .filter(|_| self.flags.contains(FeatureFlags::MASK))
            .map(|mask| MaskRay {
                mask,
                origin: coords::model_to_texture(ray.origin, self.aspect),
                dir: ray.dir / self.aspect,
            });
        Walk {
            t: t0,
            t_end: t1,
            step: self.step,
            iter: 0,
            max_iter: self.max_steps,
            jitter,
            slab,
            entered_slab: false,
            mask,
            window: None,
        }
    }

    fn jitter(&self, pixel: (u32, u32)) -> Option<(u32, f32)> {
        self.flags
            .contains(FeatureFlags::ANTIALIAS)
            .then(|| pixel_jitter(pixel.0, pixel.1))
    }

    /// Integrates one ray. `surfaces` are overlay hits sorted by distance.
    pub fn march(&self, ray: &Ray, pixel: (u32, u32), surfaces: &[Surface]) -> RayResult {
        let range = ray.intersect_box(self.aspect * 0.5);
        match self.params.mode {
            RenderMode::Vr => self.march_vr(ray, range, self.jitter(pixel), surfaces, None),
            RenderMode::Mip | RenderMode::XRay => {
                let surface = surfaces.first();
                let occluder_t = surface.map_or(f32::INFINITY, |s| s.t);
                let scalar = range
                    .map(|(t0, t1)| self.march_scalar(ray, t0, t1, self.jitter(pixel), occluder_t));
                let mut result = scalar.map_or(RayResult::EMPTY, |m| m.result);
                if let Some(s) = surface {
                    // the surface shows through what the volume adds in front of it
                    let in_front = scalar.map_or(0.0, |m| m.in_front);
                    result.overlay = s.color.truncate().extend(s.color.w * (1.0 - in_front));
                }
                result
            }
        }
    }

    /// Locates the voxel that dominates a ray.
    pub fn pick(&self, ray: &Ray) -> PickResult {
        let Some((t0, t1)) = ray.intersect_box(self.aspect * 0.5) else {
            return PickResult { voxel: None };
        };
        let t = match self.params.mode {
            RenderMode::Vr => {
                let mut tracker = DropTracker::new();
                self.march_vr(ray, Some((t0, t1)), None, &[], Some(&mut tracker));
                tracker.best_t()
            }
            RenderMode::Mip | RenderMode::XRay => {
                self.march_scalar(ray, t0, t1, None, f32::INFINITY).best_t
            }
        };
        let voxel = t.map(|t| {
            let tc = coords::model_to_texture(ray.at(t), self.aspect).clamp(Vec3::ZERO, Vec3::ONE);
            (tc * self.dims.as_vec3())
                .floor()
                .as_uvec3()
                .min(self.dims - UVec3::ONE)
        });
        PickResult { voxel }
    }

    /// MIP and x-ray. `occluder_t` is the distance of the nearest overlay
    /// surface, `f32::INFINITY` without one.
    fn march_scalar(
        &self,
        ray: &Ray,
        t0: f32,
        t1: f32,
        jitter: Option<(u32, f32)>,
        occluder_t: f32,
    ) -> ScalarMarch {
        let xray = self.params.mode == RenderMode::XRay;
        let xray_curve = self.flags.contains(FeatureFlags::XRAY_CURVE);
        let mut walk = self.begin(ray, t0, t1, jitter);
        let mut max_v = 0.0f32;
        let mut best = None;
        let mut best_value = 0.0f32;
        let mut sum = 0.0f32;
        let mut in_front = 0.0f32;

        loop {
            match walk.next() {
                WalkStep::Done => break,
                WalkStep::Skipped | WalkStep::Masked => continue,
                WalkStep::Sample => {}
            }
            let v = self.smoothed(ray, &mut walk);
            let value = if xray {
                let atten = if xray_curve { self.lookup(v).w } else { v };
                sum += atten * self.step * XRAY_GAIN;
                atten
            } else {
                max_v = max_v.max(v);
                v
            };
            if value > best_value {
                best_value = value;
                best = Some(walk.t);
            }
            if walk.t < occluder_t {
                in_front = if xray { sum.min(1.0) } else { max_v };
            }
            walk.advance(self.step);
        }

        let intensity = if xray { sum.min(1.0) } else { max_v };
        ScalarMarch {
            result: RayResult {
                intensity,
                steps: walk.iter,
                ..RayResult::EMPTY
            },
            best_t: best,
            in_front,
        }
    }

    /// Front-to-back VR compositing with empty-space skipping.
    ///
    /// With `tracker` set, colour is not shaded and the transmittance drops
    /// are reported to the tracker instead.
    fn march_vr(
        &self,
        ray: &Ray,
        range: Option<(f32, f32)>,
        jitter: Option<(u32, f32)>,
        surfaces: &[Surface],
        mut tracker: Option<&mut DropTracker>,
    ) -> RayResult {
        let mut color = Vec3::ZERO;
        let mut transmittance = 1.0f32;
        let mut pending = surfaces.iter().peekable();
        let mut steps = 0;

        if let Some((t0, t1)) = range {
            let shading = tracker.is_none();
            let mut walk = self.begin(ray, t0, t1, jitter);
            let mut state = SkipState::Normal;
            let mut hit_t = 0.0f32;
            let step_power = self.step * OPACITY_STEP_SCALE;

            loop {
                match walk.next() {
                    WalkStep::Done => break,
                    WalkStep::Skipped => continue,
                    WalkStep::Masked => {
                        if let Some(tracker) = tracker.as_deref_mut() {
                            tracker.update(transmittance, transmittance, walk.t);
                        }
                        continue;
                    }
                    WalkStep::Sample => {}
                }
                while let Some(s) = pending.next_if(|s| s.t <= walk.t) {
                    composite_surface(&mut color, &mut transmittance, s.color);
                }
                if transmittance < TRANSMITTANCE_EPSILON {
                    break;
                }

                let v = self.smoothed(ray, &mut walk);
                let rgba = self.lookup(v);
                let alpha = rgba.w;
                if alpha <= 0.0 {
                    // an empty sample ends the current run, skipped or not
                    if let Some(tracker) = tracker.as_deref_mut() {
                        tracker.update(transmittance, transmittance, walk.t);
                    }
                }

                match state {
                    SkipState::Normal if alpha <= 0.0 => {
                        state = SkipState::Skipping;
                        walk.advance(2.0 * self.step);
                        continue;
                    }
                    SkipState::Skipping if alpha <= 0.0 => {
                        walk.advance(2.0 * self.step);
                        continue;
                    }
                    SkipState::Skipping => {
                        hit_t = walk.t;
                        state = SkipState::Recovering;
                        walk.back_up();
                        continue;
                    }
                    SkipState::Normal | SkipState::Recovering => {}
                }

                if alpha > 0.0 {
                    let step_t = (1.0 - alpha.min(1.0)).powf(step_power);
                    let before = transmittance;
                    if shading {
                        let p = ray.at(walk.t);
                        let lit = self.shade(rgba.truncate(), p, -ray.dir).max(Vec3::ZERO);
                        color += lit * (1.0 - step_t) * transmittance;
                    }
                    transmittance *= step_t;
                    if let Some(tracker) = tracker.as_deref_mut() {
                        tracker.update(before, transmittance, walk.t);
                    }
                }

                walk.advance(self.step);
                if state == SkipState::Recovering && walk.t > hit_t {
                    state = SkipState::Normal;
                }
                if transmittance < TRANSMITTANCE_EPSILON {
                    break;
                }
            }
            steps = walk.iter;
        }

        for s in pending {
            composite_surface(&mut color, &mut transmittance, s.color);
        }

        RayResult {
            color,
            transmittance: transmittance.clamp(0.0, 1.0),
            intensity: 0.0,
            overlay: Vec4::ZERO,
            steps,
        }
    }

    /// Lighting of a VR sample at model position `p`.
    fn shade(&self, rgb: Vec3, p: Vec3, to_eye: Vec3) -> Vec3 {
        if !self.flags.contains(FeatureFlags::LIGHTING) {
            return rgb;
        }
        let tc = coords::model_to_texture(p, self.aspect);
        let mut normal = self.normal(tc);
        if self.flags.contains(FeatureFlags::SEAL_BORDERS) {
            normal = self.seal(normal, tc, p);
        }
        let mut shadow = [1.0f32; MAX_LIGHTS];
        if let (true, Some(maps)) = (self.flags.contains(FeatureFlags::SHADOWS), self.shadows) {
            for (i, light) in self.params.lights.lights.iter().enumerate() {
                if light.casts_shadows() {
                    shadow[i] = maps.factor(i, p, light.shadow_darkness, light.shadow_softness);
                }
            }
        }
        self.params.lights.shade(rgb, normal, to_eye, shadow)
    }

    /// Surface normal from a central-difference gradient, zero in flat
    /// regions.
    fn normal(&self, tc: Vec3) -> Vec3 {
        let h = Vec3::ONE / self.dims.as_vec3();
        let diff = |axis: Vec3| {
            let o = axis * h;
            self.sampler.sample(tc + o) - self.sampler.sample(tc - o)
        };
        let g_tc = Vec3::new(diff(Vec3::X), diff(Vec3::Y), diff(Vec3::Z)) / (2.0 * h);
        let g = g_tc / self.aspect;
        if g.length_squared() < 1e-12 {
            Vec3::ZERO
        } else {
            -g.normalize()
        }
    }

    /// Blends the normal toward the nearest volume or slab face.
    fn seal(&self, normal: Vec3, tc: Vec3, p: Vec3) -> Vec3 {
        let d = self.dims.as_vec3();
        let lo = tc * d;
        let hi = (Vec3::ONE - tc) * d;
        let mut best = (f32::MAX, Vec3::ZERO);
        for (i, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
            if lo[i] < best.0 {
                best = (lo[i], -axis);
            }
            if hi[i] < best.0 {
                best = (hi[i], axis);
            }
        }
        if self.flags.contains(FeatureFlags::SLAB) {
            let slab_ray = self.slab.ray(coords::model_to_texture(p, self.aspect), Vec3::ZERO);
            let (dist, face) = slab_ray.nearest_face(0.0);
            let voxel = self.shape.max_element() / d.max_element();
            if dist / voxel < best.0 {
                best = (dist / voxel, face);
            }
        }
        let weight = self.params.border_seal.clamp(0.0, 1.0) * (1.0 - smoothstep(0.0, SEAL_DISTANCE, best.0));
        let blended = normal * (1.0 - weight) + best.1 * weight;
        if blended.length_squared() < 1e-12 {
            Vec3::ZERO
        } else {
            blended.normalize()
        }
    }

    /// Opacity-only march used by shadow-map generation: distance at the
    /// end of the largest transmittance drop.
    pub(crate) fn occlusion_depth(&self, ray: &Ray) -> Option<f32> {
        let range = ray.intersect_box(self.aspect * 0.5)?;
        let mut tracker = DropTracker::new();
        self.march_vr(ray, Some(range), None, &[], Some(&mut tracker));
        tracker.best_t()
    }
}

fn composite_surface(color: &mut Vec3, transmittance: &mut f32, surface: Vec4) {
    let a = surface.w.clamp(0.0, 1.0);
    *color += surface.truncate() * a * *transmittance;
    *transmittance *= 1.0 - a;
}

/// The curve's lookup table as normalized RGBA.
pub fn lut_vec4(curve: &OpacityCurve) -> Vec<Vec4> {
    curve
        .lut()
        .into_iter()
        .map(|[r, g, b, a]| Vec4::new(f32::from(r), f32::from(g), f32::from(b), f32::from(a)) / 255.0)
        .collect()
}
