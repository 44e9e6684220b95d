//! Named render presets.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use volcast_core::{DirLight, LightSet, Marker, OpacityCurve, RenderMode, RenderParams};

use crate::error::Result;

const DEFAULT_CURVE: &str = "[0](255, 66, 66, 0); [390](255, 66, 66, 0); [486](219, 195, 77, 105); \
     [505](203, 185, 98, 219); [1023](255, 255, 255, 227)";

const BONE_CURVE: &str = "[0](255, 0, 0, 0); [424](166, 145, 38, 0); [829](203, 185, 98, 65); \
     [841](203, 185, 98, 126); [1023](255, 255, 255, 255)";

/// A reusable bundle of render settings.
///
/// Applying a preset leaves the view, slab and marker position alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preset {
    pub name: String,
    pub mode: RenderMode,
    pub perspective: f32,
    pub antialias: bool,
    pub background: [f32; 3],
    pub curve: OpacityCurve,
    pub marker_size: f32,
    pub marker_color: [u8; 4],
    pub border_seal: f32,
    pub lights: LightSet,
}

impl Default for Preset {
    fn default() -> Self {
        let marker = Marker::default();
        Self {
            name: String::from("Default"),
            mode: RenderMode::Vr,
            perspective: 1.0,
            antialias: true,
            background: [0.0; 3],
            curve: OpacityCurve::default(),
            marker_size: marker.size,
            marker_color: marker.color,
            border_seal: 0.0,
            lights: LightSet::default(),
        }
    }
}

impl Preset {
    /// The three built-in VR presets.
    pub fn builtins() -> Result<Vec<Preset>> {
        Ok(vec![
            Preset {
                name: String::from("Preset 1"),
                curve: OpacityCurve::parse(DEFAULT_CURVE)?,
                lights: lights(0.66, key_light(0.22, 0.22, 2.0, 1.02, Vec3::new(0.483, -0.420, 0.768))),
                ..Preset::default()
            },
            Preset {
                name: String::from("Preset 2"),
                curve: OpacityCurve::parse(DEFAULT_CURVE)?,
                lights: lights(1.118, key_light(0.14, 0.21, 2.0, 1.02, Vec3::new(0.73, -0.43, 0.53))),
                ..Preset::default()
            },
            Preset {
                name: String::from("Preset 3"),
                curve: OpacityCurve::parse(BONE_CURVE)?,
                lights: lights(
                    0.93289,
                    key_light(0.23, 0.0, 1.0, 0.33, Vec3::new(-0.05, -0.075, 0.995_929)),
                ),
                ..Preset::default()
            },
        ])
    }

    /// Looks up a built-in preset by name.
    pub fn builtin(name: &str) -> Result<Option<Preset>> {
        Ok(Self::builtins()?.into_iter().find(|p| p.name == name))
    }

    /// Copies the preset into `params`.
    pub fn apply(&self, params: &mut RenderParams) {
        params.mode = self.mode;
        params.perspective = self.perspective.clamp(0.0, 1.0);
        params.antialias = self.antialias;
        params.background = self.background;
        params.curve = self.curve.clone();
        params.border_seal = self.border_seal;
        params.lights = self.lights;
        if let Some(marker) = params.marker.as_mut() {
            marker.size = self.marker_size;
            marker.color = self.marker_color;
        }
        log::debug!("applied preset '{}'", self.name);
    }

    /// Captures the preset-relevant part of `params`.
    pub fn capture(name: impl Into<String>, params: &RenderParams) -> Self {
        let marker = params.marker.unwrap_or_default();
        Self {
            name: name.into(),
            mode: params.mode,
            perspective: params.perspective,
            antialias: params.antialias,
            background: params.background,
            curve: params.curve.clone(),
            marker_size: marker.size,
            marker_color: marker.color,
            border_seal: params.border_seal,
            lights: params.lights,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        log::info!("saved preset '{}' to {}", self.name, path.as_ref().display());
        Ok(())
    }
}

fn key_light(diffuse: f32, spec_strength: f32, spec_exp: f32, shadow_darkness: f32, dir: Vec3) -> DirLight {
    DirLight {
        diffuse,
        spec_strength,
        spec_exp,
        shadow_darkness,
        shadow_softness: 0.75,
        dir,
    }
}

fn lights(ambient: f32, key: DirLight) -> LightSet {
    LightSet {
        ambient,
        lights: [key, DirLight::default()],
    }
}
