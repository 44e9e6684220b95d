//! Camera for volume viewing.
//!
//! The volume is rotated in front of a fixed camera on +Z looking toward
//! −Z (see [`crate::coords`]).

use std::f32::consts::FRAC_PI_3;

use glam::{Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::coords::{self, Ray};

/// Half the visible height at the volume centre at zoom 1.
pub const VIEW_HALF_HEIGHT: f32 = 0.75;

/// Field of view at full perspective.
pub const MAX_FOV: f32 = FRAC_PI_3;

/// Camera distance for orthographic views.
const ORTHO_DISTANCE: f32 = 3.0;

/// Depth margin around the volume (its diagonal is at most √3).
const DEPTH_MARGIN: f32 = 2.0;

/// Interactive view state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewParams {
    /// Rotation applied to the volume.
    pub rotation: Quat,
    pub zoom: f32,
    /// Translation in model units, applied after rotation.
    pub pan: Vec2,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            zoom: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl ViewParams {
    /// Rotates the volume about the screen axes.
    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        let q = Quat::from_rotation_y(delta_x) * Quat::from_rotation_x(delta_y);
        self.rotation = (q * self.rotation).normalize();
    }

    /// Multiplies the zoom factor.
    pub fn zoom_by(&mut self, factor: f32) {
        self.zoom = (self.zoom * factor).clamp(0.05, 50.0);
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    /// Matrices for a viewport. `perspective` in `[0, 1]` blends from
    /// orthographic to a [`MAX_FOV`] perspective.
    pub fn matrices(&self, aspect_ratio: f32, perspective: f32) -> ViewMatrices {
        let half_height = VIEW_HALF_HEIGHT / self.zoom.max(1e-3);
        let aspect_ratio = aspect_ratio.max(1e-3);
        let perspective = perspective.clamp(0.0, 1.0);

        let (distance, proj) = if perspective > 0.0 {
            let fov = (perspective * MAX_FOV).max(1e-3);
            let distance = half_height / (fov * 0.5).tan();
            let near = (distance - DEPTH_MARGIN).max(0.01);
            (
                distance,
                Mat4::perspective_rh(fov, aspect_ratio, near, distance + DEPTH_MARGIN),
            )
        } else {
            let half_width = half_height * aspect_ratio;
            (
                ORTHO_DISTANCE,
                Mat4::orthographic_rh(
                    -half_width,
                    half_width,
                    -half_height,
                    half_height,
                    ORTHO_DISTANCE - DEPTH_MARGIN,
                    ORTHO_DISTANCE + DEPTH_MARGIN,
                ),
            )
        };
        let view = Mat4::from_translation(self.pan.extend(-distance)) * Mat4::from_quat(self.rotation);
        let view_proj = proj * view;
        ViewMatrices {
            view,
            proj,
            view_proj,
            inv_view_proj: view_proj.inverse(),
            eye_distance: distance,
        }
    }
}

/// Matrices derived from [`ViewParams`] for one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewMatrices {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub eye_distance: f32,
}

impl ViewMatrices {
    /// Model-space ray through the centre of pixel `(x, y)`.
    pub fn pixel_ray(&self, x: u32, y: u32, size: (u32, u32)) -> Ray {
        coords::ndc_ray(self.inv_view_proj, coords::pixel_to_ndc(x, y, size))
    }

    /// Model-space position of the eye (orthographic: the eye direction).
    pub fn view_dir(&self) -> Vec3 {
        self.view.inverse().transform_vector3(coords::CAMERA_FORWARD).normalize()
    }
}
