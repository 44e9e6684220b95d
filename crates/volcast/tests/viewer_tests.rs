//! End-to-end tests of the viewer: load, render and pick.

use volcast::*;

fn cpu_viewer() -> Viewer<CpuBackend> {
    Viewer::new(VolumeStore::new(
        CpuBackend::new(),
        DeviceCaps::default(),
        StoreOptions::default(),
    ))
}

/// A 4x4x4 cube of constant value 128.
fn cube_loader() -> RawSliceLoader {
    RawSliceLoader::from_bytes(VolumeHeader::new([4, 4, 4], 8), &[128; 64]).unwrap()
}

fn red_curve() -> OpacityCurve {
    OpacityCurve::parse("[0](255, 0, 0, 0); [400](255, 0, 0, 0); [500](255, 0, 0, 255)").unwrap()
}

#[test]
fn cpu_render_of_mock_volume() {
    init_logging();
    let mut viewer = cpu_viewer();
    viewer.load(MockDataLoader::with_dims([32, 24, 16]));
    assert_eq!(viewer.finish_load(), &LoadState::Done);
    viewer.set_mode(RenderMode::Mip);
    assert!(viewer.tick());

    let rgba = render_cpu_to_image(&mut viewer, 24, 16).unwrap();
    assert_eq!(rgba.len(), 24 * 16 * 4);
    assert!(rgba.chunks_exact(4).all(|p| p[3] == 255));
    // the plates light up the middle, the corners miss the volume
    let centre = ((8 * 24) + 12) * 4;
    assert!(rgba[centre] > 0);
    assert_eq!(&rgba[..3], &[0, 0, 0]);
}

#[test]
fn cpu_red_cube_with_preset_lighting_off() {
    let mut viewer = cpu_viewer();
    viewer.load(cube_loader());
    viewer.finish_load();
    let preset = Preset::builtin("Preset 1").unwrap().unwrap();
    viewer.apply_preset(&preset);
    {
        let params = viewer.params_mut();
        params.curve = red_curve();
        params.lighting = false;
        params.lights = LightSet::ambient_only(1.0);
        params.antialias = false;
        params.perspective = 0.0;
    }
    let rgba = render_cpu_to_image(&mut viewer, 12, 12).unwrap();
    let centre = (6 * 12 + 6) * 4;
    assert_eq!(&rgba[centre..centre + 4], &[255, 0, 0, 255]);
}

#[test]
fn cpu_pick_hits_cube() {
    let mut viewer = cpu_viewer();
    viewer.load(cube_loader());
    viewer.finish_load();
    viewer.params_mut().curve = red_curve();
    viewer.params_mut().antialias = false;

    let hit = pick_cpu_voxel(&viewer, (6, 6), (12, 12)).unwrap();
    let voxel = hit.voxel.unwrap();
    assert_eq!(voxel.z, 3, "front face is the last slice: {voxel}");
    assert_eq!(pick_cpu_voxel(&viewer, (0, 0), (12, 12)).unwrap().voxel, None);
    assert_eq!(pick_cpu_voxel(&viewer, (12, 0), (12, 12)).unwrap().voxel, None);
}

#[test]
fn render_without_volume_fails() {
    let mut viewer = cpu_viewer();
    let err = render_cpu_to_image(&mut viewer, 8, 8).unwrap_err();
    assert!(matches!(err, Error::Volume(VolumeError::NoVolume)), "{err}");
}

#[test]
fn cpu_render_to_png_file() {
    let mut viewer = cpu_viewer();
    viewer.load(cube_loader());
    viewer.finish_load();
    let path = std::env::temp_dir().join(format!("volcast-cpu-{}.png", std::process::id()));
    render_cpu_to_file(&mut viewer, &path, 16, 16).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"\x89PNG");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn preset_file_round_trip() {
    let path = std::env::temp_dir().join(format!("volcast-preset-{}.json", std::process::id()));
    let mut params = RenderParams::default();
    params.curve = red_curve();
    params.lights.ambient = 0.5;
    let preset = Preset::capture("custom", &params);
    preset.save(&path).unwrap();
    let loaded = Preset::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, preset);

    let mut applied = RenderParams::default();
    loaded.apply(&mut applied);
    assert_eq!(applied.curve, params.curve);
    assert_eq!(applied.lights.ambient, 0.5);
}

#[test]
fn gpu_viewer_matches_cpu() {
    let binding = match DeviceBinding::new_headless_blocking() {
        Ok(binding) => binding,
        Err(e) => {
            eprintln!("Skipping GPU test: no GPU adapter available ({e})");
            return;
        }
    };
    let mut engine = VolumeEngine::new(&binding);
    let mut gpu = Viewer::new(engine.create_store(StoreOptions::default()));
    let mut cpu = cpu_viewer();
    for viewer_params in [gpu.params_mut(), cpu.params_mut()] {
        viewer_params.mode = RenderMode::Mip;
        viewer_params.antialias = false;
    }
    gpu.load(cube_loader());
    gpu.finish_load();
    cpu.load(cube_loader());
    cpu.finish_load();

    let a = render_to_image(&mut gpu, &mut engine, 12, 12).unwrap();
    let b = render_cpu_to_image(&mut cpu, 12, 12).unwrap();
    let centre = (6 * 12 + 6) * 4;
    assert!((i32::from(a[centre]) - i32::from(b[centre])).abs() <= 3);

    let gpu_hit = pick(&gpu, &mut engine, (6, 6), (12, 12)).unwrap();
    let cpu_hit = pick_cpu_voxel(&cpu, (6, 6), (12, 12)).unwrap();
    assert_eq!(gpu_hit, cpu_hit);
}
