//! Opacity/colour transfer curve.
//!
//! A curve is an ordered list of control points over the index range
//! `0..=1023`. Its text form, one `[index](r, g, b, a)` entry per point
//! separated by `;`, doubles as the signature used to decide whether the
//! GPU lookup texture must be rebuilt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

/// Number of lookup table entries.
pub const CURVE_LUT_SIZE: usize = 1024;

/// Largest control point index.
pub const CURVE_MAX_INDEX: u16 = (CURVE_LUT_SIZE - 1) as u16;

/// One control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub index: u16,
    pub rgba: [u8; 4],
}

/// Piecewise-linear mapping from normalized intensity to RGBA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OpacityCurve {
    points: Vec<CurvePoint>,
}

impl OpacityCurve {
    /// Builds a curve from points, sorting them by index. A later point
    /// replaces an earlier one with the same index.
    pub fn new(points: impl IntoIterator<Item = CurvePoint>) -> Result<Self> {
        let mut sorted: Vec<CurvePoint> = Vec::new();
        for point in points {
            if point.index > CURVE_MAX_INDEX {
                return Err(VolumeError::CurveParse(format!(
                    "index {} out of range 0..={CURVE_MAX_INDEX}",
                    point.index
                )));
            }
            match sorted.binary_search_by_key(&point.index, |p| p.index) {
                Ok(i) => sorted[i] = point,
                Err(i) => sorted.insert(i, point),
            }
        }
        Ok(Self { points: sorted })
    }

    /// A curve with the same colour and opacity everywhere.
    pub fn constant(rgba: [u8; 4]) -> Self {
        Self {
            points: vec![
                CurvePoint { index: 0, rgba },
                CurvePoint {
                    index: CURVE_MAX_INDEX,
                    rgba,
                },
            ],
        }
    }

    /// Parses the text form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut points = Vec::new();
        for entry in text.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            points.push(parse_point(entry)?);
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Interpolated RGBA at an index.
    pub fn value_at(&self, index: usize) -> [u8; 4] {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return [0; 4];
        };
        if index <= usize::from(first.index) {
            return first.rgba;
        }
        if index >= usize::from(last.index) {
            return last.rgba;
        }
        let upper = self.points.partition_point(|p| usize::from(p.index) <= index);
        let (a, b) = (self.points[upper - 1], self.points[upper]);
        let span = f32::from(b.index - a.index);
        let f = (index - usize::from(a.index)) as f32 / span;
        std::array::from_fn(|c| {
            let v = f32::from(a.rgba[c]) + (f32::from(b.rgba[c]) - f32::from(a.rgba[c])) * f;
            v.round() as u8
        })
    }

    /// The dense lookup table uploaded to the GPU.
    pub fn lut(&self) -> Vec<[u8; 4]> {
        (0..CURVE_LUT_SIZE).map(|i| self.value_at(i)).collect()
    }
}

/// LUT index for a normalized intensity.
pub fn lut_index(v: f32) -> usize {
    (v.clamp(0.0, 1.0) * CURVE_MAX_INDEX as f32).round() as usize
}

fn parse_point(entry: &str) -> Result<CurvePoint> {
    let bad = || VolumeError::CurveParse(format!("malformed entry '{entry}'"));

    let rest = entry.strip_prefix('[').ok_or_else(bad)?;
    let (index, rest) = rest.split_once(']').ok_or_else(bad)?;
    let rest = rest.trim().strip_prefix('(').ok_or_else(bad)?;
    let body = rest.trim_end().strip_suffix(')').ok_or_else(bad)?;

    let index: u16 = index.trim().parse().map_err(|_| bad())?;
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(bad());
    }
    let mut rgba = [0u8; 4];
    for (dst, part) in rgba.iter_mut().zip(parts) {
        *dst = part.parse().map_err(|_| bad())?;
    }
    Ok(CurvePoint { index, rgba })
}

impl fmt::Display for OpacityCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            let [r, g, b, a] = p.rgba;
            write!(f, "[{}]({r}, {g}, {b}, {a})", p.index)?;
        }
        Ok(())
    }
}

impl FromStr for OpacityCurve {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OpacityCurve {
    type Error = VolumeError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<OpacityCurve> for String {
    fn from(curve: OpacityCurve) -> Self {
        curve.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BONE: &str = "[0](255, 66, 66, 0); [390](255, 66, 66, 0); [486](219, 195, 77, 105); \
                        [505](203, 185, 98, 219); [1023](255, 255, 255, 227)";

    #[test]
    fn test_parse_and_signature() {
        let curve = OpacityCurve::parse(BONE).unwrap();
        assert_eq!(curve.points().len(), 5);
        assert_eq!(curve.points()[2].rgba, [219, 195, 77, 105]);
        let text = curve.to_string();
        assert_eq!(OpacityCurve::parse(&text).unwrap(), curve);
        assert!(text.starts_with("[0](255, 66, 66, 0); [390]"));
    }

    #[test]
    fn test_parse_sorts_and_dedupes() {
        let curve = OpacityCurve::parse("[10](1,1,1,1);[5](2,2,2,2);[10](3,3,3,3)").unwrap();
        let idx: Vec<u16> = curve.points().iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![5, 10]);
        assert_eq!(curve.points()[1].rgba, [3, 3, 3, 3]);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["[0](1,2,3)", "0](1,2,3,4)", "[2000](1,2,3,4)", "[1](1,2,3,400)", "[x](1,2,3,4)"] {
            assert!(
                matches!(OpacityCurve::parse(bad), Err(VolumeError::CurveParse(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_lut_interpolation() {
        let curve = OpacityCurve::parse("[100](0, 0, 0, 0); [200](200, 100, 0, 255)").unwrap();
        let lut = curve.lut();
        assert_eq!(lut.len(), CURVE_LUT_SIZE);
        assert_eq!(lut[0], [0, 0, 0, 0]);
        assert_eq!(lut[150], [100, 50, 0, 128]);
        assert_eq!(lut[200], [200, 100, 0, 255]);
        assert_eq!(lut[1023], [200, 100, 0, 255]);
    }

    #[test]
    fn test_empty_curve_is_transparent() {
        let curve = OpacityCurve::parse("").unwrap();
        assert!(curve.is_empty());
        assert!(curve.lut().iter().all(|e| *e == [0; 4]));
    }

    #[test]
    fn test_lut_index() {
        assert_eq!(lut_index(0.0), 0);
        assert_eq!(lut_index(1.0), 1023);
        assert_eq!(lut_index(0.5), 512);
        assert_eq!(lut_index(-3.0), 0);
    }

    #[test]
    fn test_serde_uses_text_form() {
        let curve = OpacityCurve::parse("[0](1, 2, 3, 4)").unwrap();
        let json = serde_json::to_string(&curve).unwrap();
        assert_eq!(json, "\"[0](1, 2, 3, 4)\"");
        let back: OpacityCurve = serde_json::from_str(&json).unwrap();
        assert_eq!(back, curve);
    }
}
