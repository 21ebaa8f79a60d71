//! Slope profiles and the engine's slope-file text format.

use crate::error::{Error, IoContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const MAX_PROFILE_POINTS: usize = 99;
const HILLSLOPE_VERSION: &str = "97.3";
const CHANNEL_VERSION: &str = "99.1";

/// A profile along flow: normalized distances in `[0, 1]` with the slope
/// (rise over run) at each point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlopeProfile {
    pub aspect: f64,
    pub width: f64,
    pub length: f64,
    pub distances: Vec<f64>,
    pub slopes: Vec<f64>,
}

impl SlopeProfile {
    /// Builds a profile from raw `(distance, slope)` samples in metres,
    /// resampled to at most [`MAX_PROFILE_POINTS`] equally spaced points.
    pub fn from_samples(
        distances_m: &[f64],
        slopes: &[f64],
        aspect: f64,
        width: f64,
    ) -> Result<Self> {
        if distances_m.len() != slopes.len() || distances_m.is_empty() {
            return Err(Error::validation(format!(
                "slope samples need matching non-empty distance/slope vectors ({} vs {})",
                distances_m.len(),
                slopes.len()
            )));
        }
        let start = distances_m[0];
        let length = distances_m[distances_m.len() - 1] - start;
        let (distances, slopes) = if length > 0.0 {
            let norm: Vec<f64> = distances_m.iter().map(|d| (d - start) / length).collect();
            compress(&norm, slopes, MAX_PROFILE_POINTS)
        } else {
            (vec![0.0, 1.0], vec![slopes[0], slopes[0]])
        };
        Ok(SlopeProfile {
            aspect,
            width,
            length: length.max(0.0),
            distances,
            slopes,
        })
    }

    /// Length-weighted mean slope.
    pub fn slope_scalar(&self) -> f64 {
        let mut rise = 0.0;
        for i in 1..self.distances.len() {
            let dx = self.distances[i] - self.distances[i - 1];
            rise += dx * 0.5 * (self.slopes[i] + self.slopes[i - 1]);
        }
        if self.distances.len() == 1 {
            self.slopes[0]
        } else {
            rise
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.length
    }

    /// Shortens the profile to `max_length`, widening it so the area holds.
    pub fn clipped(&self, max_length: f64) -> SlopeProfile {
        if self.length <= max_length || max_length <= 0.0 {
            return self.clone();
        }
        let mut out = self.clone();
        out.width = self.area() / max_length;
        out.length = max_length;
        out
    }

    /// Splits the profile at the given normalized break points, producing one
    /// profile per overland-flow element.
    pub fn split(&self, breaks: &[f64]) -> Vec<SlopeProfile> {
        let mut edges = vec![0.0];
        edges.extend(breaks.iter().copied().filter(|b| *b > 0.0 && *b < 1.0));
        edges.push(1.0);
        edges.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

        edges
            .windows(2)
            .map(|w| {
                let (lo, hi) = (w[0], w[1]);
                let mut pts: Vec<(f64, f64)> = vec![(lo, interpolate(&self.distances, &self.slopes, lo))];
                for (d, s) in self.distances.iter().zip(&self.slopes) {
                    if *d > lo && *d < hi {
                        pts.push((*d, *s));
                    }
                }
                pts.push((hi, interpolate(&self.distances, &self.slopes, hi)));
                let span = hi - lo;
                SlopeProfile {
                    aspect: self.aspect,
                    width: self.width,
                    length: self.length * span,
                    distances: pts.iter().map(|(d, _)| (d - lo) / span).collect(),
                    slopes: pts.iter().map(|(_, s)| *s).collect(),
                }
            })
            .collect()
    }

    fn write_ofe(&self, out: &mut String) {
        let _ = writeln!(out, "{} {:.4}", self.distances.len(), self.length);
        let pairs: Vec<String> = self
            .distances
            .iter()
            .zip(&self.slopes)
            .map(|(d, s)| format!("{:.6}, {:.6}", d, s))
            .collect();
        let _ = writeln!(out, "{}", pairs.join(" "));
    }

    /// Single or multi-OFE hillslope slope file.
    pub fn render_hillslope(ofes: &[SlopeProfile]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", HILLSLOPE_VERSION);
        let _ = writeln!(out, "{}", ofes.len());
        if let Some(first) = ofes.first() {
            let _ = writeln!(out, "{:.4} {:.4}", first.aspect, first.width);
        }
        for ofe in ofes {
            ofe.write_ofe(&mut out);
        }
        out
    }

    /// Watershed channel slope file, channels in channel-enumeration order.
    pub fn render_channels(channels: &[SlopeProfile]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", CHANNEL_VERSION);
        let _ = writeln!(out, "{}", channels.len());
        for chn in channels {
            let _ = writeln!(out, "{:.4} {:.4}", chn.aspect, chn.width);
            chn.write_ofe(&mut out);
        }
        out
    }

    pub fn write_hillslope(&self, path: &Path) -> Result<()> {
        fs::write(path, Self::render_hillslope(std::slice::from_ref(self))).at(path)
    }

    /// Parses a single-OFE hillslope slope file.
    pub fn parse_hillslope(text: &str) -> Result<SlopeProfile> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        if lines.len() < 5 {
            return Err(Error::validation("slope file is truncated"));
        }
        let nums = |line: &str| -> Result<Vec<f64>> {
            line.replace(',', " ")
                .split_whitespace()
                .map(|t| {
                    t.parse::<f64>()
                        .map_err(|_| Error::validation(format!("bad number `{}` in slope file", t)))
                })
                .collect()
        };
        let aw = nums(lines[2])?;
        let nl = nums(lines[3])?;
        let pairs = nums(lines[4])?;
        if aw.len() < 2 || nl.len() < 2 || pairs.len() % 2 != 0 {
            return Err(Error::validation("malformed slope file"));
        }
        Ok(SlopeProfile {
            aspect: aw[0],
            width: aw[1],
            length: nl[1],
            distances: pairs.iter().step_by(2).copied().collect(),
            slopes: pairs.iter().skip(1).step_by(2).copied().collect(),
        })
    }

    pub fn read_hillslope(path: &Path) -> Result<SlopeProfile> {
        let text = fs::read_to_string(path).at(path)?;
        Self::parse_hillslope(&text)
    }
}

/// Linear interpolation on a sorted abscissa; clamps outside the range.
pub fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    if x <= xs[0] {
        return ys[0];
    }
    for i in 1..xs.len() {
        if x <= xs[i] {
            let span = xs[i] - xs[i - 1];
            if span <= 0.0 {
                return ys[i];
            }
            let t = (x - xs[i - 1]) / span;
            return ys[i - 1] + t * (ys[i] - ys[i - 1]);
        }
    }
    ys[ys.len() - 1]
}

/// Resamples normalized `(distance, slope)` pairs to at most `max_points`
/// equally spaced points. The first distance is 0 and the last is 1.
pub fn compress(distances: &[f64], slopes: &[f64], max_points: usize) -> (Vec<f64>, Vec<f64>) {
    let n = distances.len().clamp(2, max_points.max(2));
    let xs: Vec<f64> = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
    let ys = xs.iter().map(|x| interpolate(distances, slopes, *x)).collect();
    (xs, ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_endpoints_and_cap() {
        let d: Vec<f64> = (0..250).map(|i| i as f64 / 249.0).collect();
        let s: Vec<f64> = d.iter().map(|x| 0.1 + 0.2 * x).collect();
        let (xs, ys) = compress(&d, &s, MAX_PROFILE_POINTS);
        assert_eq!(xs.len(), 99);
        assert_eq!(xs[0], 0.0);
        assert_eq!(xs[98], 1.0);
        assert!((ys[98] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_short_profiles_keep_their_point_count() {
        let p = SlopeProfile::from_samples(&[10.0, 40.0, 70.0], &[0.2, 0.3, 0.4], 90.0, 20.0).unwrap();
        assert_eq!(p.distances, vec![0.0, 0.5, 1.0]);
        assert_eq!(p.length, 60.0);
        assert!((p.slope_scalar() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_clip_preserves_area() {
        let p = SlopeProfile::from_samples(&[0.0, 500.0], &[0.1, 0.1], 0.0, 10.0).unwrap();
        let c = p.clipped(300.0);
        assert_eq!(c.length, 300.0);
        assert!((c.area() - p.area()).abs() < 1e-6);
    }

    #[test]
    fn test_render_parse_hillslope() {
        let p = SlopeProfile::from_samples(&[0.0, 50.0, 100.0], &[0.05, 0.15, 0.25], 180.0, 42.0)
            .unwrap();
        let text = SlopeProfile::render_hillslope(std::slice::from_ref(&p));
        assert!(text.starts_with("97.3\n1\n"));
        let back = SlopeProfile::parse_hillslope(&text).unwrap();
        assert_eq!(back.distances.len(), 3);
        assert!((back.length - 100.0).abs() < 1e-3);
        assert!((back.width - 42.0).abs() < 1e-3);
    }

    #[test]
    fn test_split_into_ofes() {
        let p = SlopeProfile::from_samples(&[0.0, 100.0], &[0.1, 0.3], 0.0, 10.0).unwrap();
        let ofes = p.split(&[0.5]);
        assert_eq!(ofes.len(), 2);
        assert!((ofes[0].length - 50.0).abs() < 1e-9);
        assert!((ofes[1].slopes[0] - 0.2).abs() < 1e-9);
        assert_eq!(ofes[1].distances.last().copied(), Some(1.0));
    }
}
