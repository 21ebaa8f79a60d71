//! Multiple-OFE segmentation of hillslopes along flow distance.

use crate::raster::Grid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MofeSettings {
    pub target_length: f64,
    pub max_segments: usize,
    pub buffer: bool,
    pub buffer_length: f64,
}

/// Segment layout of one hillslope, top of the slope first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    pub n_segments: usize,
    /// Normalized break points strictly inside `(0, 1)`.
    pub breaks: Vec<f64>,
    pub buffered: bool,
}

pub fn segment_count(length: f64, settings: &MofeSettings) -> usize {
    if settings.target_length <= 0.0 {
        return 1;
    }
    ((length / settings.target_length).round() as usize).clamp(1, settings.max_segments.max(1))
}

/// Equal-length segments, plus a down-slope buffer segment when enabled and
/// the hillslope is long enough to carry one.
pub fn segment_hillslope(length: f64, settings: &MofeSettings) -> Segmentation {
    let buffered = settings.buffer
        && settings.buffer_length > 0.0
        && length > 2.0 * settings.buffer_length;
    let upper = if buffered {
        length - settings.buffer_length
    } else {
        length
    };
    let n = segment_count(upper, settings);
    let mut breaks: Vec<f64> = (1..n)
        .map(|i| (upper * i as f64 / n as f64) / length)
        .collect();
    if buffered {
        breaks.push(upper / length);
    }
    Segmentation {
        n_segments: breaks.len() + 1,
        breaks,
        buffered,
    }
}

/// Segment index (1-based) of a cell at `distance` metres above the
/// receiving channel on a hillslope of `length` metres.
pub fn segment_of(distance: f64, length: f64, seg: &Segmentation) -> i32 {
    if length <= 0.0 {
        return 1;
    }
    let from_top = (1.0 - distance / length).clamp(0.0, 1.0);
    let idx = seg.breaks.iter().filter(|b| from_top >= **b).count();
    idx as i32 + 1
}

/// Per-cell segment raster aligned with the subcatchment raster.
pub fn segment_grid(
    subwta: &Grid<i32>,
    flow_distance: &Grid<f64>,
    lengths: &BTreeMap<i32, f64>,
    segmentations: &BTreeMap<i32, Segmentation>,
) -> Grid<i32> {
    let mut out = Grid::new(subwta.ncols, subwta.nrows, subwta.transform, 0);
    for (px, py, topaz) in subwta.cells() {
        let (Some(seg), Some(len)) = (segmentations.get(&topaz), lengths.get(&topaz)) else {
            continue;
        };
        let d = flow_distance
            .get(px, py)
            .filter(|v| *v != flow_distance.nodata)
            .unwrap_or(0.0);
        out.set(px, py, segment_of(d, *len, seg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(buffer: bool) -> MofeSettings {
        MofeSettings {
            target_length: 50.0,
            max_segments: 5,
            buffer,
            buffer_length: 15.0,
        }
    }

    #[test]
    fn test_segment_count_is_clamped() {
        assert_eq!(segment_count(10.0, &settings(false)), 1);
        assert_eq!(segment_count(150.0, &settings(false)), 3);
        assert_eq!(segment_count(10_000.0, &settings(false)), 5);
    }

    #[test]
    fn test_buffer_adds_a_bottom_segment() {
        let s = segment_hillslope(115.0, &settings(true));
        assert!(s.buffered);
        assert_eq!(s.n_segments, 3);
        assert!((s.breaks[1] - 100.0 / 115.0).abs() < 1e-12);
        // a cell 5 m above the channel falls in the buffer
        assert_eq!(segment_of(5.0, 115.0, &s), 3);
        assert_eq!(segment_of(110.0, 115.0, &s), 1);
    }
}
