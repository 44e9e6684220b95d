//! End-to-end tests of the CPU reference pipeline.

use glam::{UVec3, Vec3};
use proptest::prelude::*;
use volcast_core::{
    render_cpu, CpuBackend, DeviceCaps, Frame, LightSet, OpacityCurve, Ray, RayMarcher, RenderMode,
    RenderParams, Slab, StorageMode, StoreOptions, ViewParams, VolumeHeader, VolumeInfo,
    VolumeSampler, VolumeStore,
};

fn load(
    header: VolumeHeader,
    storage: StorageMode,
    voxel: impl Fn(u32, u32, u32) -> u8,
) -> VolumeStore<CpuBackend> {
    let mut store = VolumeStore::new(
        CpuBackend::new(),
        DeviceCaps::default(),
        StoreOptions {
            storage,
            ..StoreOptions::default()
        },
    );
    store.begin_load(header).unwrap();
    let [w, h, d] = header.dims;
    let slices: Vec<Vec<u8>> = (0..d)
        .map(|z| {
            (0..h)
                .flat_map(|y| (0..w).map(move |x| (x, y)))
                .map(|(x, y)| voxel(x, y, z))
                .collect()
        })
        .collect();
    let batch = store.batch_size().unwrap() as usize;
    for chunk in slices.chunks(batch) {
        let refs: Vec<&[u8]> = chunk.iter().map(Vec::as_slice).collect();
        store.append_slices(&refs).unwrap();
    }
    store.end_load().unwrap();
    store
}

/// Opaque red from index 500 up, transparent below.
fn red_curve() -> OpacityCurve {
    OpacityCurve::parse("[0](255,0,0,0); [400](255,0,0,0); [500](255,0,0,255); [1023](255,0,0,255)")
        .unwrap()
}

fn red_cube_params() -> RenderParams {
    RenderParams {
        mode: RenderMode::Vr,
        curve: red_curve(),
        lights: LightSet::ambient_only(1.0),
        antialias: false,
        ..RenderParams::default()
    }
}

#[test]
fn test_uniform_volume_renders_opaque_red() {
    let store = load(VolumeHeader::new([4, 4, 2], 8), StorageMode::Native3d, |_, _, _| 128);
    let info = store.info().unwrap();
    let sampler = store.backend().sampler().unwrap();
    let params = red_cube_params();
    let view = ViewParams::default();
    let slab = Slab::new(info.shape());

    let image = render_cpu(&sampler, info, &Frame::new(&params, &view, &slab), 12, 12);

    // the box spans pixels 2..=9 of a 1.5-unit wide viewport
    for y in 2..=9 {
        for x in 2..=9 {
            assert_eq!(image.transmittance(x, y), 0.0, "pixel {x},{y}");
            let texel = image.volume(x, y);
            assert!((texel.truncate() - Vec3::X).length() < 1e-5, "pixel {x},{y}: {texel}");
            assert_eq!(texel.w, 1.0);
        }
    }
    for (x, y) in [(0, 0), (1, 6), (10, 6), (6, 1), (6, 10)] {
        assert_eq!(image.transmittance(x, y), 1.0, "pixel {x},{y}");
    }
}

#[test]
fn test_uniform_volume_centre_from_mosaic() {
    // mosaic borders are zeroed, so only the interior voxels are opaque
    let store = load(VolumeHeader::new([4, 4, 2], 8), StorageMode::Mosaic, |_, _, _| 128);
    assert!(store.plan().unwrap().is_mosaic());
    let info = store.info().unwrap();
    let sampler = store.backend().sampler().unwrap();
    let params = RenderParams {
        oversample: 4.0,
        ..red_cube_params()
    };
    let view = ViewParams::default();
    let slab = Slab::new(info.shape());

    let image = render_cpu(&sampler, info, &Frame::new(&params, &view, &slab), 12, 12);
    for (x, y) in [(5, 5), (6, 6), (5, 6), (6, 5)] {
        assert_eq!(image.transmittance(x, y), 0.0, "pixel {x},{y}");
        assert!((image.volume(x, y).truncate() - Vec3::X).length() < 1e-5);
    }
}

#[test]
fn test_mosaic_matches_native_inside_borders() {
    let header = VolumeHeader::new([10, 7, 9], 8);
    let voxel = |x: u32, y: u32, z: u32| ((x * 37 + y * 11 + z * 53) % 251) as u8;
    let native = load(header, StorageMode::Native3d, voxel);
    let mosaic = load(header, StorageMode::Mosaic, voxel);
    let a = native.backend().sampler().unwrap();
    let b = mosaic.backend().sampler().unwrap();
    assert_eq!(a.dims(), b.dims());

    let dims = Vec3::new(10.0, 7.0, 9.0);
    for z in 0..17 {
        for y in 0..9 {
            for x in 0..15 {
                // texel-space positions at least 1.5 texels inside the slice
                let p = Vec3::new(1.5 + x as f32 * 0.5, 1.5 + y as f32 * 0.5, 0.5 + z as f32 * 0.5);
                let tc = p / dims;
                let (va, vb) = (a.sample(tc), b.sample(tc));
                assert!((va - vb).abs() < 1e-4, "{p}: native {va} mosaic {vb}");
            }
        }
    }
}

#[test]
fn test_transparent_curve_skips_to_exit() {
    let store = load(VolumeHeader::new([16, 16, 16], 8), StorageMode::Native3d, |x, _, _| (x * 16) as u8);
    let info = store.info().unwrap();
    let sampler = store.backend().sampler().unwrap();
    let params = RenderParams {
        curve: OpacityCurve::constant([255, 255, 255, 0]),
        antialias: false,
        ..RenderParams::default()
    };
    let slab = Slab::new(info.shape());
    let marcher = RayMarcher::new(&sampler, info, &params, &slab);

    let ray = Ray::new(Vec3::new(0.1, -0.2, 3.0), Vec3::new(0.05, 0.1, -1.0));
    let (t0, t1) = ray.intersect_box(info.aspect() * 0.5).unwrap();
    let result = marcher.march(&ray, (0, 0), &[]);

    assert_eq!(result.transmittance, 1.0);
    assert_eq!(result.color, Vec3::ZERO);
    let skipped = ((t1 - t0) / (2.0 * marcher.step())).floor() as u32;
    assert!(result.steps >= skipped, "{} < {skipped}", result.steps);
    assert!(result.steps < marcher.max_steps());
}

/// Value noise without storage.
struct Noise(u32);

impl VolumeSampler for Noise {
    fn dims(&self) -> UVec3 {
        UVec3::new(24, 24, 24)
    }

    fn sample(&self, tc: Vec3) -> f32 {
        if !(tc.cmpge(Vec3::ZERO).all() && tc.cmple(Vec3::ONE).all()) {
            return 0.0;
        }
        let v = (tc * 24.0).floor().as_uvec3();
        let h = (v.x.wrapping_mul(73_856_093) ^ v.y.wrapping_mul(19_349_663) ^ v.z.wrapping_mul(83_492_791))
            .wrapping_add(self.0)
            .wrapping_mul(2_654_435_761);
        (h >> 8) as f32 / (1u32 << 24) as f32
    }
}

proptest! {
    #[test]
    fn prop_transmittance_bounded(
        seed in any::<u32>(),
        alpha in 0u8..=255,
        mid in 1u16..1023,
        ox in -0.6f32..0.6,
        oy in -0.6f32..0.6,
        dx in -0.5f32..0.5,
        dy in -0.5f32..0.5,
        mode in prop_oneof![Just(RenderMode::Vr), Just(RenderMode::Mip), Just(RenderMode::XRay)],
    ) {
        let curve = OpacityCurve::parse(&format!(
            "[0](10,200,30,0); [{mid}](255,128,0,{alpha}); [1023](0,90,255,255)"
        )).unwrap();
        let params = RenderParams { mode, curve, xray_curve: true, ..RenderParams::default() };
        let info = VolumeInfo::new(VolumeHeader::new([24, 24, 24], 8));
        let slab = Slab::new(info.shape());
        let sampler = Noise(seed);
        let marcher = RayMarcher::new(&sampler, &info, &params, &slab);

        let ray = Ray::new(Vec3::new(ox, oy, 2.0), Vec3::new(dx, dy, -1.0));
        let result = marcher.march(&ray, (seed % 64, seed / 64 % 64), &[]);
        prop_assert!((0.0..=1.0).contains(&result.transmittance));
        prop_assert!(result.color.cmpge(Vec3::ZERO).all());
        prop_assert!((0.0..=1.0).contains(&result.intensity));
        prop_assert!(result.steps <= marcher.max_steps());
    }
}
