//! Opaque or translucent surfaces embedded in the volume: meshes rendered
//! elsewhere into per-pixel depth/colour buffers, and the marker sphere.

use glam::{Vec3, Vec4};

use crate::coords::{self, Ray};
use crate::params::Marker;

/// A surface hit along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    /// Distance along the ray in model units.
    pub t: f32,
    /// Straight (non-premultiplied) colour and opacity.
    pub color: Vec4,
}

/// Per-pixel mesh depth and colour, as produced by a separate mesh pass.
///
/// Depth is the distance along the pixel's view ray in model units;
/// `f32::INFINITY` marks pixels without a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBuffer {
    width: u32,
    height: u32,
    depth: Vec<f32>,
    color: Vec<[u8; 4]>,
}

impl OverlayBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            depth: vec![f32::INFINITY; n],
            color: vec![[0; 4]; n],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Writes a mesh fragment, keeping the nearer one.
    pub fn set(&mut self, x: u32, y: u32, t: f32, color: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y * self.width + x) as usize;
        if t < self.depth[i] {
            self.depth[i] = t;
            self.color[i] = color;
        }
    }

    /// Mesh surface at a pixel.
    pub fn surface(&self, x: u32, y: u32) -> Option<Surface> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) as usize;
        let t = self.depth[i];
        let [r, g, b, a] = self.color[i];
        (t.is_finite() && a > 0).then(|| Surface {
            t,
            color: Vec4::new(f32::from(r), f32::from(g), f32::from(b), f32::from(a)) / 255.0,
        })
    }

    pub fn depths(&self) -> &[f32] {
        &self.depth
    }

    pub fn colors(&self) -> &[[u8; 4]] {
        &self.color
    }
}

/// Hit of a ray with the marker sphere.
pub fn marker_surface(marker: &Marker, aspect: Vec3, ray: &Ray) -> Option<Surface> {
    let center = coords::texture_to_model(marker.position, aspect);
    let t = ray.intersect_sphere(center, marker.size)?;
    let [r, g, b, a] = marker.color;
    Some(Surface {
        t,
        color: Vec4::new(f32::from(r), f32::from(g), f32::from(b), f32::from(a)) / 255.0,
    })
}

/// Mesh and marker hits for a pixel, nearest first.
pub fn surfaces_at(
    overlay: Option<&OverlayBuffer>,
    marker: Option<&Marker>,
    aspect: Vec3,
    ray: &Ray,
    pixel: (u32, u32),
) -> Vec<Surface> {
    let mut hits: Vec<Surface> = overlay
        .and_then(|o| o.surface(pixel.0, pixel.1))
        .into_iter()
        .chain(marker.and_then(|m| marker_surface(m, aspect, ray)))
        .collect();
    hits.sort_by(|a, b| a.t.total_cmp(&b.t));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_keeps_nearest() {
        let mut buffer = OverlayBuffer::new(2, 2);
        assert!(buffer.surface(1, 1).is_none());
        buffer.set(1, 1, 5.0, [255, 0, 0, 255]);
        buffer.set(1, 1, 7.0, [0, 255, 0, 255]);
        buffer.set(1, 1, 3.0, [0, 0, 255, 255]);
        let s = buffer.surface(1, 1).unwrap();
        assert_eq!(s.t, 3.0);
        assert_eq!(s.color, Vec4::new(0.0, 0.0, 1.0, 1.0));
        buffer.set(9, 9, 1.0, [1; 4]);
        assert!(buffer.surface(9, 9).is_none());
    }

    #[test]
    fn test_surfaces_sorted() {
        let mut buffer = OverlayBuffer::new(1, 1);
        buffer.set(0, 0, 4.0, [255, 255, 255, 255]);
        let marker = Marker {
            position: Vec3::splat(0.5),
            size: 0.1,
            color: [0, 128, 0, 255],
        };
        let ray = Ray::new(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z);
        let hits = surfaces_at(Some(&buffer), Some(&marker), Vec3::ONE, &ray, (0, 0));
        assert_eq!(hits.len(), 2);
        assert!((hits[0].t - 2.9).abs() < 1e-5);
        assert_eq!(hits[1].t, 4.0);
    }
}
