//! Offscreen rendering to pixel buffers and image files.
//!
//! The GPU path needs a [`VolumeEngine`]; the CPU path runs the reference
//! renderer and works anywhere.

use std::io::Cursor;
use std::path::Path;

use image::{ImageBuffer, Rgba};
use volcast_core::{pick_cpu, render_cpu, CpuBackend, IntermediateImage, PickResult, RenderMode, VolumeError};
use volcast_render::{GpuVolume, VolumeEngine};

use crate::error::{Error, Result};
use crate::viewer::Viewer;

/// Renders the viewer's current frame on the GPU and returns RGBA rows,
/// top row first.
///
/// In x-ray mode the window is checked against the rendered image and the
/// frame is rendered again if it moved.
pub fn render_to_image(
    viewer: &mut Viewer<GpuVolume>,
    engine: &mut VolumeEngine,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    gpu_pass(viewer, engine, width, height)?;
    if viewer.params().mode == RenderMode::XRay {
        let image = engine.read_intermediate()?;
        let intensities = (0..image.height())
            .flat_map(|y| (0..image.width()).map(move |x| (x, y)))
            .map(|(x, y)| image.volume(x, y).x);
        if viewer.check_xray_window(intensities)? {
            gpu_pass(viewer, engine, width, height)?;
        }
    }
    Ok(engine.read_rgba()?)
}

fn gpu_pass(viewer: &mut Viewer<GpuVolume>, engine: &mut VolumeEngine, width: u32, height: u32) -> Result<()> {
    let display = viewer.display_settings()?;
    let (store, frame) = viewer.parts();
    engine.render(store, &frame, &display, width, height)?;
    Ok(())
}

/// Renders the viewer's current frame on the GPU and saves it as PNG or
/// JPEG, chosen by the file extension.
pub fn render_to_file(
    viewer: &mut Viewer<GpuVolume>,
    engine: &mut VolumeEngine,
    filename: impl AsRef<Path>,
    width: u32,
    height: u32,
) -> Result<()> {
    let data = render_to_image(viewer, engine, width, height)?;
    save_image(filename, &data, width, height)
}

/// Picks the voxel under a pixel on the GPU.
pub fn pick(
    viewer: &Viewer<GpuVolume>,
    engine: &mut VolumeEngine,
    pixel: (u32, u32),
    size: (u32, u32),
) -> Result<PickResult> {
    let (store, frame) = viewer.parts();
    Ok(engine.pick(store, &frame, pixel, size)?)
}

/// Runs the CPU reference renderer over the viewer's current frame.
pub fn render_cpu_intermediate(viewer: &Viewer<CpuBackend>, width: u32, height: u32) -> Result<IntermediateImage> {
    let (store, frame) = viewer.parts();
    let info = store.info()?;
    let sampler = store.backend().sampler().ok_or(VolumeError::NoVolume)?;
    Ok(render_cpu(&sampler, info, &frame, width, height))
}

/// CPU counterpart of [`render_to_image`].
pub fn render_cpu_to_image(viewer: &mut Viewer<CpuBackend>, width: u32, height: u32) -> Result<Vec<u8>> {
    let mut image = render_cpu_intermediate(viewer, width, height)?;
    if viewer.check_xray_window(image.xray_pixels().iter().map(|&p| f32::from(p) / u16::MAX as f32))? {
        image = render_cpu_intermediate(viewer, width, height)?;
    }
    let display = viewer.display_settings()?;
    Ok(image.to_rgba(&display))
}

/// CPU counterpart of [`render_to_file`].
pub fn render_cpu_to_file(
    viewer: &mut Viewer<CpuBackend>,
    filename: impl AsRef<Path>,
    width: u32,
    height: u32,
) -> Result<()> {
    let data = render_cpu_to_image(viewer, width, height)?;
    save_image(filename, &data, width, height)
}

/// CPU counterpart of [`pick`].
pub fn pick_cpu_voxel(viewer: &Viewer<CpuBackend>, pixel: (u32, u32), size: (u32, u32)) -> Result<PickResult> {
    let (store, frame) = viewer.parts();
    let info = store.info()?;
    let sampler = store.backend().sampler().ok_or(VolumeError::NoVolume)?;
    if pixel.0 >= size.0 || pixel.1 >= size.1 {
        return Ok(PickResult { voxel: None });
    }
    Ok(pick_cpu(&sampler, info, &frame, pixel, size))
}

fn rgba_image(data: &[u8], width: u32, height: u32) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
    ImageBuffer::from_raw(width, height, data.to_vec())
        .ok_or(Error::InvalidImageData(data.len(), width, height))
}

/// Saves RGBA rows as PNG or JPEG, chosen by the file extension.
pub fn save_image(filename: impl AsRef<Path>, data: &[u8], width: u32, height: u32) -> Result<()> {
    let path = filename.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let img = rgba_image(data, width, height)?;
    match extension.as_str() {
        "png" => img.save_with_format(path, image::ImageFormat::Png)?,
        "jpg" | "jpeg" => {
            // no alpha in JPEG
            let rgb = image::DynamicImage::ImageRgba8(img).to_rgb8();
            rgb.save_with_format(path, image::ImageFormat::Jpeg)?;
        }
        _ => return Err(Error::UnsupportedFormat(extension)),
    }
    log::info!("saved {width}x{height} image to {}", path.display());
    Ok(())
}

/// Encodes RGBA rows as PNG in memory.
pub fn encode_png(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let img = rgba_image(data, width, height)?;
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}
