//! The controlling object: one volume, its slab, render settings and view.

use glam::{Vec2, Vec3};
use volcast_core::window::{sanity_check_xray_window, XRAY_SCALE};
use volcast_core::{
    DisplaySettings, Frame, LoadState, LoadSequence, OverlayBuffer, ReliefMask, RenderMode,
    RenderParams, Slab, ViewParams, VolumeBackend, VolumeError, VolumeInfo, VolumeLoader,
    VolumeStore, WindowLevel,
};

use crate::presets::Preset;

type BoxedLoad = LoadSequence<Box<dyn VolumeLoader>>;

/// Owns a [`VolumeStore`] and everything else needed to render it.
///
/// Every setter requests a render; the host calls [`Viewer::tick`] once
/// per animation frame and renders when it returns `true`, so any number of
/// changes between two frames cost one render.
pub struct Viewer<B> {
    store: VolumeStore<B>,
    params: RenderParams,
    view: ViewParams,
    slab: Slab,
    overlay: Option<OverlayBuffer>,
    mask: ReliefMask,
    scheduler: volcast_core::FrameScheduler,
    load: Option<BoxedLoad>,
    load_state: LoadState,
}

impl<B: VolumeBackend> Viewer<B> {
    pub fn new(store: VolumeStore<B>) -> Self {
        Self {
            store,
            params: RenderParams::default(),
            view: ViewParams::default(),
            slab: Slab::default(),
            overlay: None,
            mask: ReliefMask::new(0, 0),
            scheduler: volcast_core::FrameScheduler::new(),
            load: None,
            load_state: LoadState::Idle,
        }
    }

    // ---- loading ----

    /// Starts loading a volume, cancelling any load still in progress.
    ///
    /// The load advances one batch per [`Viewer::pump_load`].
    pub fn load(&mut self, loader: impl VolumeLoader + 'static) {
        self.cancel_load();
        let loader: Box<dyn VolumeLoader> = Box::new(loader);
        self.load = Some(LoadSequence::new(loader));
        self.load_state = LoadState::Idle;
    }

    /// Uploads the next batch of the current load.
    pub fn pump_load(&mut self) -> &LoadState {
        let Some(load) = self.load.as_mut() else {
            return &self.load_state;
        };
        self.load_state = load.step(&mut self.store).clone();
        if self.load_state.is_finished() {
            self.load = None;
            if self.load_state == LoadState::Done {
                self.on_volume_loaded();
            }
        }
        &self.load_state
    }

    /// Pumps the current load until it finishes.
    pub fn finish_load(&mut self) -> &LoadState {
        while self.load.is_some() {
            self.pump_load();
        }
        &self.load_state
    }

    /// Cancels the current load. The partially loaded volume is discarded.
    pub fn cancel_load(&mut self) {
        if let Some(mut load) = self.load.take() {
            load.cancel();
            self.load_state = load.step(&mut self.store).clone();
        }
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// Slices loaded and expected by the current load.
    pub fn load_progress(&self) -> Option<(u32, u32)> {
        self.load.as_ref().map(|load| load.progress())
    }

    fn on_volume_loaded(&mut self) {
        if let Ok(shape) = self.store.shape() {
            self.slab.reset_to(shape);
        }
        if let Ok(info) = self.store.info() {
            self.mask = ReliefMask::for_dims(info.dims());
        }
        if let Some(marker) = self.params.marker.as_mut() {
            marker.position = Vec3::splat(0.5);
        }
        self.request_render();
    }

    // ---- state ----

    pub fn store(&self) -> &VolumeStore<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VolumeStore<B> {
        &mut self.store
    }

    /// Metadata of the loaded volume.
    pub fn info(&self) -> volcast_core::Result<&VolumeInfo> {
        self.store.info()
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut RenderParams {
        self.request_render();
        &mut self.params
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        self.params.mode = mode;
        self.request_render();
    }

    pub fn apply_preset(&mut self, preset: &Preset) {
        preset.apply(&mut self.params);
        self.request_render();
    }

    pub fn view(&self) -> &ViewParams {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewParams {
        self.request_render();
        &mut self.view
    }

    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        self.view.rotate(delta_x, delta_y);
        self.request_render();
    }

    pub fn zoom_by(&mut self, factor: f32) {
        self.view.zoom_by(factor);
        self.request_render();
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.view.pan_by(delta);
        self.request_render();
    }

    pub fn slab(&self) -> &Slab {
        &self.slab
    }

    pub fn slab_mut(&mut self) -> &mut Slab {
        self.request_render();
        &mut self.slab
    }

    /// Restores the slab to the whole volume.
    pub fn reset_slab(&mut self) {
        self.slab.reset();
        self.request_render();
    }

    /// Replaces the precomputed surface buffer drawn over the volume.
    pub fn set_overlay(&mut self, overlay: Option<OverlayBuffer>) {
        self.overlay = overlay;
        self.request_render();
    }

    pub fn overlay(&self) -> Option<&OverlayBuffer> {
        self.overlay.as_ref()
    }

    /// Relief mask of the loaded volume, void after each load.
    pub fn mask(&self) -> &ReliefMask {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut ReliefMask {
        self.request_render();
        &mut self.mask
    }

    /// Replaces the relief mask; it must match the volume's `x, y` dims.
    pub fn set_mask(&mut self, mask: ReliefMask) -> volcast_core::Result<()> {
        let dims = self.store.info()?.dims();
        if !mask.fits(dims) {
            return Err(VolumeError::InvalidMask(format!(
                "{}x{} mask for a {dims} volume",
                mask.width(),
                mask.height()
            )));
        }
        self.mask = mask;
        self.request_render();
        Ok(())
    }

    pub fn set_use_mask(&mut self, use_mask: bool) {
        self.params.use_mask = use_mask;
        self.request_render();
    }

    // ---- frame scheduling ----

    pub fn request_render(&mut self) {
        self.scheduler.request_render();
    }

    /// Called once per animation frame; `true` means render now.
    pub fn tick(&mut self) -> bool {
        // nothing to show while a load is running
        if self.store.is_loading() {
            return false;
        }
        self.scheduler.tick()
    }

    pub fn scheduler(&self) -> &volcast_core::FrameScheduler {
        &self.scheduler
    }

    // ---- rendering inputs ----

    /// Display settings for the current parameters and volume.
    pub fn display_settings(&mut self) -> volcast_core::Result<DisplaySettings> {
        let max_value = self.store.info()?.max_value();
        let auto = self.store.auto_window_level();
        let masked = self.params.use_mask && !self.mask.is_void();
        Ok(DisplaySettings::for_masked_frame(&self.params, masked, max_value, auto))
    }

    /// The current frame description.
    pub fn frame(&self) -> Frame<'_> {
        let frame = Frame::new(&self.params, &self.view, &self.slab).with_mask(&self.mask);
        match &self.overlay {
            Some(overlay) => frame.with_overlay(overlay),
            None => frame,
        }
    }

    /// Store and frame borrowed together, for the renderers.
    pub(crate) fn parts(&self) -> (&VolumeStore<B>, Frame<'_>) {
        (&self.store, self.frame())
    }

    /// Re-centres the x-ray window when the rendered x-ray values
    /// (normalized `0..=1`) would show a nearly black or white image.
    /// Returns `true` if the window changed.
    pub fn check_xray_window(&mut self, intensities: impl IntoIterator<Item = f32>) -> volcast_core::Result<bool> {
        if self.params.mode != RenderMode::XRay {
            return Ok(false);
        }
        let pixels: Vec<u16> = intensities
            .into_iter()
            .map(|v| (v.clamp(0.0, 1.0) * XRAY_SCALE).round() as u16)
            .collect();
        let current = self.display_settings()?.window;
        let checked: WindowLevel = sanity_check_xray_window(&pixels, current);
        if checked == current {
            return Ok(false);
        }
        log::info!("x-ray window moved from {current:?} to {checked:?}");
        self.params.window = Some(checked);
        self.request_render();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::{MockDataLoader, RawSliceLoader};
    use volcast_core::{CpuBackend, DeviceCaps, StoreOptions, VolumeHeader};

    fn viewer() -> Viewer<CpuBackend> {
        Viewer::new(VolumeStore::new(
            CpuBackend::new(),
            DeviceCaps::default(),
            StoreOptions::default(),
        ))
    }

    #[test]
    fn test_load_resets_slab_and_requests_render() {
        let mut viewer = viewer();
        viewer.slab_mut().set_center(Vec3::splat(9.0));
        assert!(viewer.tick());
        viewer.load(MockDataLoader::with_dims([16, 8, 6]));
        assert_eq!(viewer.pump_load(), &LoadState::Loading(0));
        assert_eq!(viewer.load_progress(), Some((0, 6)));
        assert!(!viewer.tick());

        assert_eq!(viewer.finish_load(), &LoadState::Done);
        assert_eq!(viewer.load_progress(), None);
        assert_eq!(viewer.slab().shape(), Vec3::new(16.0, 8.0, 6.0));
        assert_eq!(viewer.slab().center(), Vec3::new(8.0, 4.0, 3.0));
        assert_eq!(viewer.info().unwrap().attribute("modality"), Some(&serde_json::json!("Synthetic")));
        assert!(viewer.tick());
        assert!(!viewer.tick());
    }

    #[test]
    fn test_new_load_cancels_previous() {
        let mut viewer = viewer();
        viewer.load(MockDataLoader::with_dims([8, 8, 20]));
        viewer.pump_load();
        viewer.pump_load();
        assert!(viewer.store().is_loading());

        let header = VolumeHeader::new([2, 2, 2], 8);
        viewer.load(RawSliceLoader::from_bytes(header, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap());
        assert!(!viewer.store().is_loading());
        assert_eq!(viewer.finish_load(), &LoadState::Done);
        assert_eq!(viewer.info().unwrap().dims(), glam::UVec3::new(2, 2, 2));
    }

    #[test]
    fn test_cancel_discards_volume() {
        let mut viewer = viewer();
        viewer.load(MockDataLoader::with_dims([8, 8, 20]));
        viewer.pump_load();
        viewer.pump_load();
        viewer.cancel_load();
        assert_eq!(viewer.load_state(), &LoadState::Cancelled);
        assert!(viewer.info().is_err());
        assert_eq!(viewer.pump_load(), &LoadState::Cancelled);
    }

    #[test]
    fn test_setters_coalesce() {
        let mut viewer = viewer();
        viewer.set_mode(RenderMode::Mip);
        viewer.rotate(0.1, 0.2);
        viewer.zoom_by(2.0);
        viewer.pan_by(Vec2::new(0.1, 0.0));
        assert!(viewer.tick());
        assert!(!viewer.tick());
        assert_eq!(viewer.scheduler().frames(), 1);
        assert_eq!(viewer.scheduler().coalesced(), 3);
    }

    #[test]
    fn test_check_xray_window() {
        let mut viewer = viewer();
        viewer.load(MockDataLoader::with_dims([8, 8, 4]));
        viewer.finish_load();
        assert!(!viewer.check_xray_window([0.5; 4]).unwrap());

        viewer.set_mode(RenderMode::XRay);
        viewer.tick();
        // uniformly dark image: nothing above the lower window bound
        assert!(viewer.check_xray_window([0.01; 16]).unwrap());
        let window = viewer.params().window.unwrap();
        assert!((window.level - 1.5 * 0.01 * XRAY_SCALE).abs() < 2.0);
        assert!(viewer.tick());
    }

    #[test]
    fn test_mask_reset_on_load_and_validated() {
        let mut viewer = viewer();
        assert!(viewer.set_mask(ReliefMask::new(8, 8)).is_err());
        viewer.load(MockDataLoader::with_dims([8, 6, 4]));
        viewer.finish_load();
        assert!(viewer.mask().fits(glam::UVec3::new(8, 6, 4)));
        assert!(viewer.mask().is_void());

        let err = viewer.set_mask(ReliefMask::new(6, 8)).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidMask(_)), "{err}");

        // a void mask keeps the unmasked x-ray window
        viewer.set_mode(RenderMode::XRay);
        viewer.set_use_mask(true);
        let unmasked = viewer.display_settings().unwrap().window;
        viewer.mask_mut().fill(0.2, 0.2);
        let masked = viewer.display_settings().unwrap().window;
        assert!(masked.level < unmasked.level);

        viewer.load(MockDataLoader::with_dims([4, 4, 4]));
        viewer.finish_load();
        assert!(viewer.mask().is_void());
        assert_eq!(viewer.mask().width(), 4);
    }
}
