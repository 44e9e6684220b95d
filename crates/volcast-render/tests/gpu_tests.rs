//! GPU rendering integration tests.
//!
//! These need a GPU adapter (real or software fallback). Without one each
//! test prints a note and returns early.

use glam::Vec3;
use volcast_core::{
    pick_cpu, render_cpu, CpuBackend, DeviceCaps, DisplaySettings, Frame, LightSet, OpacityCurve,
    OverlayBuffer, ReliefMask, RenderMode, RenderParams, Slab, StorageMode, StoreOptions,
    ViewParams, VolumeBackend, VolumeHeader, VolumeStore,
};
use volcast_render::{DeviceBinding, RenderError, VolumeEngine};

fn engine() -> Option<VolumeEngine> {
    match DeviceBinding::new_headless_blocking() {
        Ok(binding) => Some(VolumeEngine::new(&binding)),
        Err(e) => {
            eprintln!("Skipping GPU test: no GPU adapter available ({e})");
            None
        }
    }
}

fn fill<B: VolumeBackend>(
    store: &mut VolumeStore<B>,
    header: VolumeHeader,
    voxel: impl Fn(u32, u32, u32) -> u8,
) {
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
}

fn options(storage: StorageMode) -> StoreOptions {
    StoreOptions {
        storage,
        ..StoreOptions::default()
    }
}

fn red_cube_params() -> RenderParams {
    RenderParams {
        mode: RenderMode::Vr,
        curve: OpacityCurve::parse(
            "[0](255,0,0,0); [400](255,0,0,0); [500](255,0,0,255); [1023](255,0,0,255)",
        )
        .unwrap(),
        lights: LightSet::ambient_only(1.0),
        antialias: false,
        oversample: 4.0,
        ..RenderParams::default()
    }
}

const TOLERANCE: f32 = 2.0 / 255.0;

#[test]
fn gpu_red_cube_native() {
    let Some(mut engine) = engine() else { return };
    let mut store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut store, VolumeHeader::new([4, 4, 2], 8), |_, _, _| 128);
    assert!(store.backend().is_allocated());

    let params = red_cube_params();
    let view = ViewParams::default();
    let slab = Slab::new(store.info().unwrap().shape());
    let frame = Frame::new(&params, &view, &slab);
    let display = DisplaySettings::for_frame(&params, 255, None);
    engine.render(&store, &frame, &display, 12, 12).unwrap();

    let image = engine.read_intermediate().unwrap();
    for y in 3..=8 {
        for x in 3..=8 {
            let texel = image.volume(x, y);
            assert!((texel.truncate() - Vec3::X).length() < TOLERANCE, "pixel {x},{y}: {texel}");
            assert!((texel.w - 1.0).abs() < TOLERANCE);
        }
    }
    assert_eq!(image.volume(0, 0).w, 0.0);

    let rgba = engine.read_rgba().unwrap();
    assert_eq!(rgba.len(), 12 * 12 * 4);
    let centre = (6 * 12 + 6) * 4;
    assert_eq!(&rgba[centre..centre + 4], &[255, 0, 0, 255]);
    assert_eq!(&rgba[..4], &[0, 0, 0, 255]);
}

#[test]
fn gpu_red_cube_mosaic() {
    let Some(mut engine) = engine() else { return };
    let mut store = engine.create_store(options(StorageMode::Mosaic));
    fill(&mut store, VolumeHeader::new([4, 4, 2], 8), |_, _, _| 128);
    assert!(store.plan().unwrap().is_mosaic());

    let params = red_cube_params();
    let view = ViewParams::default();
    let slab = Slab::new(store.info().unwrap().shape());
    let display = DisplaySettings::for_frame(&params, 255, None);
    engine
        .render(&store, &Frame::new(&params, &view, &slab), &display, 12, 12)
        .unwrap();

    let image = engine.read_intermediate().unwrap();
    for (x, y) in [(5, 5), (6, 6), (5, 6), (6, 5)] {
        let texel = image.volume(x, y);
        assert!((texel.truncate() - Vec3::X).length() < TOLERANCE, "pixel {x},{y}: {texel}");
    }
}

#[test]
fn gpu_mip_matches_cpu() {
    let Some(mut engine) = engine() else { return };
    let header = VolumeHeader::new([8, 8, 8], 8);
    let voxel = |x: u32, y: u32, _z: u32| (x * 24 + y * 8) as u8;
    let mut gpu_store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut gpu_store, header, voxel);
    let mut cpu_store = VolumeStore::new(CpuBackend::new(), DeviceCaps::default(), options(StorageMode::Native3d));
    fill(&mut cpu_store, header, voxel);

    let params = RenderParams {
        mode: RenderMode::Mip,
        antialias: false,
        ..RenderParams::default()
    };
    let view = ViewParams::default();
    let slab = Slab::new(gpu_store.info().unwrap().shape());
    let frame = Frame::new(&params, &view, &slab);
    let display = DisplaySettings::for_frame(&params, 255, None);
    engine.render(&gpu_store, &frame, &display, 16, 16).unwrap();
    let gpu = engine.read_rgba().unwrap();

    let sampler = cpu_store.backend().sampler().unwrap();
    let cpu = render_cpu(&sampler, cpu_store.info().unwrap(), &frame, 16, 16).to_rgba(&display);

    // pixels well inside the box outline
    for y in 4..=11 {
        for x in 4..=11 {
            let i = ((y * 16 + x) * 4) as usize;
            let (g, c) = (i32::from(gpu[i]), i32::from(cpu[i]));
            assert!((g - c).abs() <= 3, "pixel {x},{y}: gpu {g} cpu {c}");
        }
    }
}

#[test]
fn gpu_pick_matches_cpu() {
    let Some(mut engine) = engine() else { return };
    let header = VolumeHeader::new([4, 4, 2], 8);
    let mut gpu_store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut gpu_store, header, |_, _, _| 128);
    let mut cpu_store = VolumeStore::new(CpuBackend::new(), DeviceCaps::default(), options(StorageMode::Native3d));
    fill(&mut cpu_store, header, |_, _, _| 128);

    let params = red_cube_params();
    let view = ViewParams::default();
    let slab = Slab::new(gpu_store.info().unwrap().shape());
    let frame = Frame::new(&params, &view, &slab);

    let gpu = engine.pick(&gpu_store, &frame, (6, 6), (12, 12)).unwrap();
    let sampler = cpu_store.backend().sampler().unwrap();
    let cpu = pick_cpu(&sampler, cpu_store.info().unwrap(), &frame, (6, 6), (12, 12));
    assert!(gpu.voxel.is_some());
    assert_eq!(gpu, cpu);

    let miss = engine.pick(&gpu_store, &frame, (0, 0), (12, 12)).unwrap();
    assert_eq!(miss.voxel, None);
    let outside = engine.pick(&gpu_store, &frame, (12, 3), (12, 12)).unwrap();
    assert_eq!(outside.voxel, None);
}

#[test]
fn gpu_programs_and_curve_are_cached() {
    let Some(mut engine) = engine() else { return };
    let mut store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut store, VolumeHeader::new([4, 4, 4], 8), |x, _, _| (x * 60) as u8);

    let mut params = red_cube_params();
    let view = ViewParams::default();
    let slab = Slab::new(store.info().unwrap().shape());
    let display = DisplaySettings::for_frame(&params, 255, None);
    for _ in 0..2 {
        engine
            .render(&store, &Frame::new(&params, &view, &slab), &display, 8, 8)
            .unwrap();
    }
    assert_eq!(engine.curve_uploads(), 1);
    assert_eq!(engine.programs().len(), 1);

    params.curve = OpacityCurve::constant([0, 255, 0, 128]);
    engine
        .render(&store, &Frame::new(&params, &view, &slab), &display, 8, 8)
        .unwrap();
    assert_eq!(engine.curve_uploads(), 2);
    assert_eq!(engine.programs().len(), 1);

    params.mode = RenderMode::XRay;
    let display = DisplaySettings::for_frame(&params, 255, None);
    engine
        .render(&store, &Frame::new(&params, &view, &slab), &display, 8, 8)
        .unwrap();
    assert_eq!(engine.programs().len(), 2);
}

#[test]
fn gpu_shadow_maps_find_occluder() {
    let Some(mut engine) = engine() else { return };
    let mut store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut store, VolumeHeader::new([8, 8, 8], 8), |_, _, _| 200);

    let mut params = red_cube_params();
    params.lights = LightSet::default();
    params.lights.lights[0].shadow_darkness = 1.0;
    params.lighting = true;
    let view = ViewParams::default();
    let slab = Slab::new(store.info().unwrap().shape());
    let display = DisplaySettings::for_frame(&params, 255, None);
    engine
        .render(&store, &Frame::new(&params, &view, &slab), &display, 16, 16)
        .unwrap();
    assert_eq!(engine.shadow_renders(), 1);

    let maps = engine.read_shadow_maps().unwrap();
    let size = volcast_core::SHADOW_MAP_SIZE as usize;
    assert_eq!(maps.len(), size * size * 2 * 4);
    let centre = ((size / 2) * size + size / 2) * 4;
    let depth = u16::from_be_bytes([maps[centre], maps[centre + 1]]);
    assert!(depth < u16::MAX, "centre texel sees no occluder");
}

#[test]
fn gpu_overlay_is_composited() {
    let Some(mut engine) = engine() else { return };
    let mut store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut store, VolumeHeader::new([4, 4, 4], 8), |_, _, _| 100);

    let params = RenderParams {
        mode: RenderMode::Mip,
        antialias: false,
        ..RenderParams::default()
    };
    let mut overlay = OverlayBuffer::new(8, 8);
    overlay.set(1, 1, 0.1, [0, 0, 255, 255]);
    let view = ViewParams::default();
    let slab = Slab::new(store.info().unwrap().shape());
    let frame = Frame::new(&params, &view, &slab).with_overlay(&overlay);
    let display = DisplaySettings::for_frame(&params, 255, None);
    engine.render(&store, &frame, &display, 8, 8).unwrap();

    let rgba = engine.read_rgba().unwrap();
    let i = (8 + 1) * 4;
    assert_eq!(&rgba[i..i + 4], &[0, 0, 255, 255]);
}

#[test]
fn gpu_relief_mask_thins_xray() {
    let Some(mut engine) = engine() else { return };
    let header = VolumeHeader::new([8, 8, 8], 8);
    let mut gpu_store = engine.create_store(options(StorageMode::Native3d));
    fill(&mut gpu_store, header, |_, _, _| 200);
    let mut cpu_store = VolumeStore::new(CpuBackend::new(), DeviceCaps::default(), options(StorageMode::Native3d));
    fill(&mut cpu_store, header, |_, _, _| 200);

    let params = RenderParams {
        mode: RenderMode::XRay,
        antialias: false,
        use_mask: true,
        ..RenderParams::default()
    };
    let view = ViewParams::default();
    let slab = Slab::new(gpu_store.info().unwrap().shape());
    let display = DisplaySettings::for_frame(&params, 255, None);
    let mut mask = ReliefMask::new(8, 8);
    let xray = |engine: &mut VolumeEngine, mask: &ReliefMask| {
        let frame = Frame::new(&params, &view, &slab).with_mask(mask);
        engine.render(&gpu_store, &frame, &display, 16, 16).unwrap();
        let gpu = engine.read_intermediate().unwrap().volume(8, 8).x;
        let sampler = cpu_store.backend().sampler().unwrap();
        let cpu = render_cpu(&sampler, cpu_store.info().unwrap(), &frame, 16, 16).volume(8, 8).x;
        assert!((gpu - cpu).abs() < 0.01, "gpu {gpu} cpu {cpu}");
        gpu
    };

    let unmasked = xray(&mut engine, &mask);
    mask.fill(0.25, 0.25);
    let masked = xray(&mut engine, &mask);
    assert!(masked < 0.75 * unmasked, "{masked} vs {unmasked}");
    let uploads = engine.mask_uploads();
    xray(&mut engine, &mask);
    assert_eq!(engine.mask_uploads(), uploads, "unchanged mask is not re-uploaded");
}

#[test]
fn gpu_render_errors() {
    let Some(mut engine) = engine() else { return };
    let store = engine.create_store(StoreOptions::default());
    let params = RenderParams::default();
    let view = ViewParams::default();
    let slab = Slab::new(Vec3::ONE);
    let frame = Frame::new(&params, &view, &slab);
    let display = DisplaySettings::for_frame(&params, 255, None);

    let err = engine.render(&store, &frame, &display, 8, 8).unwrap_err();
    assert!(matches!(err, RenderError::Volume(_)), "{err}");
    let err = engine.render(&store, &frame, &display, 0, 8).unwrap_err();
    assert!(matches!(err, RenderError::InvalidViewport(0, 8)));
    assert!(engine.read_rgba().is_err());
}

#[test]
fn gpu_caps_allow_mosaic() {
    let Some(engine) = engine() else { return };
    let caps = engine.caps();
    assert!(caps.max_texture_2d >= 2048);
    assert!(caps.max_mosaic_textures >= 1);
}
