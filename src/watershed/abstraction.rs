//! Turns delineation products into hillslope and channel summaries, slope
//! profiles and the channel structure table.

use super::network::{ChannelNetwork, MAX_UPSTREAM};
use crate::catalog::{CatalogRow, Column, ColumnarTable, get_bool, get_f64, get_i32, get_str};
use crate::error::{Error, Result};
use crate::providers::{ChannelGeometry, DelineationProducts, FlowPath, GeoTools};
use crate::raster::{self, Grid};
use crate::slope::{self, MAX_PROFILE_POINTS, SlopeProfile};
use crate::translator::{Translator, is_channel_topaz, is_hillslope_topaz};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub px: i32,
    pub py: i32,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HillSummary {
    pub topaz_id: i32,
    pub wepp_id: i32,
    /// m^2
    pub area: f64,
    pub length: f64,
    pub width: f64,
    pub aspect: f64,
    pub direction: f64,
    pub slope_scalar: f64,
    pub elevation: f64,
    pub centroid: Centroid,
    pub fp_longest_length: f64,
    pub slope_fn: String,
    pub is_edge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub topaz_id: i32,
    pub wepp_id: i32,
    pub chn_enum: i32,
    pub area: f64,
    pub length: f64,
    pub width: f64,
    pub order: i32,
    pub aspect: f64,
    pub direction: f64,
    pub slope_scalar: f64,
    pub elevation: f64,
    pub centroid: Centroid,
    pub slope_fn: String,
    pub channel_type: String,
}

/// One line of the watershed structure, all ids WEPP ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureEntry {
    pub chn_wepp: i32,
    pub chn_enum: i32,
    pub right: i32,
    pub left: i32,
    pub center: i32,
    pub upstream: [i32; MAX_UPSTREAM],
    pub impoundments: [i32; 3],
}

impl StructureEntry {
    pub fn line(&self) -> String {
        let ids: Vec<String> = [self.right, self.left, self.center]
            .iter()
            .chain(self.upstream.iter())
            .chain(self.impoundments.iter())
            .map(i32::to_string)
            .collect();
        format!("2 {}", ids.join(" "))
    }
}

/// `pw0.str` contents: `99.1` then one line per channel by channel enumeration.
pub fn render_structure(entries: &[StructureEntry]) -> String {
    let mut sorted: Vec<&StructureEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.chn_enum);
    let mut s = String::from("99.1\n");
    for e in sorted {
        let _ = writeln!(s, "{}", e.line());
    }
    s
}

pub fn build_structure(translator: &Translator, network: &ChannelNetwork) -> Vec<StructureEntry> {
    translator
        .iter_channels()
        .filter_map(|chn| {
            let chn_wepp = translator.wepp(chn)?;
            let chn_enum = translator.chn_enum(chn_wepp)?;
            let [right, left, center] = translator.upland_wepp_ids(chn);
            let mut upstream = [0; MAX_UPSTREAM];
            for (slot, up) in upstream.iter_mut().zip(network.upstream_of(chn)) {
                *slot = translator.wepp(*up).unwrap_or(0);
            }
            Some(StructureEntry {
                chn_wepp,
                chn_enum,
                right,
                left,
                center,
                upstream,
                impoundments: [0; 3],
            })
        })
        .collect()
}

pub struct AbstractionInputs<'a> {
    pub products: &'a DelineationProducts,
    pub geo: &'a dyn GeoTools,
    /// Set when widths come from the bankfull-width regression.
    pub channel_geometry: Option<&'a dyn ChannelGeometry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Abstraction {
    pub translator: Translator,
    pub network: ChannelNetwork,
    pub hills: BTreeMap<i32, HillSummary>,
    pub channels: BTreeMap<i32, ChannelSummary>,
    pub hill_profiles: BTreeMap<i32, SlopeProfile>,
    pub channel_profiles: BTreeMap<i32, SlopeProfile>,
    pub structure: Vec<StructureEntry>,
}

/// Area-weighted mean flow-path length: `sum(L_i * N_i) / sum(N_i)`.
pub fn garbrecht_length(paths: &[FlowPath]) -> Option<f64> {
    let n: usize = paths.iter().map(|p| p.pixel_count).sum();
    if n == 0 {
        return None;
    }
    let weighted: f64 = paths
        .iter()
        .map(|p| p.length() * p.pixel_count as f64)
        .sum();
    Some(weighted / n as f64)
}

/// Pixel-weighted circular mean of aspects, degrees in `[0, 360)`.
pub fn mean_aspect(paths: &[FlowPath]) -> f64 {
    let (mut s, mut c) = (0.0, 0.0);
    for p in paths {
        let w = p.pixel_count as f64;
        s += w * p.aspect.to_radians().sin();
        c += w * p.aspect.to_radians().cos();
    }
    if s == 0.0 && c == 0.0 {
        return 0.0;
    }
    s.atan2(c).to_degrees().rem_euclid(360.0)
}

/// Aspect snapped to the nearest compass octant.
pub fn direction(aspect: f64) -> f64 {
    ((aspect / 45.0).round() * 45.0).rem_euclid(360.0)
}

/// Pixel-weighted average of the normalized slope profiles of `paths`.
fn merged_slopes(paths: &[FlowPath]) -> (Vec<f64>, Vec<f64>) {
    let n_points = paths
        .iter()
        .map(|p| p.distances.len())
        .max()
        .unwrap_or(2)
        .clamp(2, MAX_PROFILE_POINTS);
    let xs: Vec<f64> = (0..n_points)
        .map(|i| i as f64 / (n_points - 1) as f64)
        .collect();
    let total: f64 = paths.iter().map(|p| p.pixel_count as f64).sum();
    let mut ys = vec![0.0; n_points];
    for p in paths {
        let len = p.length();
        if p.distances.is_empty() {
            continue;
        }
        let start = p.distances[0];
        let norm: Vec<f64> = if len > 0.0 {
            p.distances.iter().map(|d| (d - start) / len).collect()
        } else {
            vec![0.0; p.distances.len()]
        };
        let w = p.pixel_count as f64 / total;
        for (y, x) in ys.iter_mut().zip(&xs) {
            *y += w * slope::interpolate(&norm, &p.slopes, *x);
        }
    }
    (xs, ys)
}

fn mean_elevation(paths: &[FlowPath]) -> f64 {
    let total: f64 = paths.iter().map(|p| p.pixel_count as f64).sum();
    if total == 0.0 {
        return 0.0;
    }
    paths
        .iter()
        .filter(|p| !p.elevations.is_empty())
        .map(|p| {
            let mean = p.elevations.iter().sum::<f64>() / p.elevations.len() as f64;
            mean * p.pixel_count as f64 / total
        })
        .sum()
}

fn centroid_of(
    subwta: &Grid<i32>,
    centroids: &BTreeMap<i32, (usize, usize)>,
    topaz_id: i32,
    geo: &dyn GeoTools,
) -> Centroid {
    match centroids.get(&topaz_id) {
        Some(&(px, py)) => {
            let (x, y) = subwta.transform.cell_center(px, py, subwta.nrows);
            let (lon, lat) = geo.utm_to_lonlat(x, y);
            Centroid {
                px: px as i32,
                py: py as i32,
                lon,
                lat,
            }
        }
        None => Centroid::default(),
    }
}

pub fn abstract_watershed(inputs: &AbstractionInputs) -> Result<Abstraction> {
    let products = inputs.products;
    let subwta = &products.subwta;
    let cell_area = subwta.transform.cellsize * subwta.transform.cellsize;
    let counts = raster::pixel_counts(subwta);
    let centroids = raster::centroids_px(subwta);
    let edges = raster::boundary_polygons(subwta);

    let hill_ids: BTreeSet<i32> = counts
        .keys()
        .copied()
        .filter(|id| is_hillslope_topaz(*id))
        .collect();
    let channel_ids: BTreeSet<i32> = counts
        .keys()
        .copied()
        .filter(|id| is_channel_topaz(*id))
        .chain(products.network.keys().copied())
        .chain(products.channel_profiles.keys().copied())
        .collect();
    if hill_ids.is_empty() || channel_ids.is_empty() {
        return Err(Error::WatershedBuildFailed(
            "delineation produced no hillslopes or no channels".to_string(),
        ));
    }

    let translator = Translator::new(hill_ids.iter().copied(), channel_ids.iter().copied())?;
    let mut upstream = products.network.clone();
    for chn in &channel_ids {
        upstream.entry(*chn).or_default();
    }
    let network = ChannelNetwork::new(upstream)?;

    // Channels first: hillslope widths may depend on channel lengths.
    let mut channel_profiles = BTreeMap::new();
    let mut channel_rows = Vec::new();
    for chn in translator.iter_channels() {
        let fp = products.channel_profiles.get(&chn).ok_or_else(|| {
            Error::WatershedBuildFailed(format!("no profile for channel {}", chn))
        })?;
        let pixels = counts.get(&chn).copied().unwrap_or(fp.pixel_count);
        let area = pixels as f64 * cell_area;
        let length = fp.length();
        let profile = SlopeProfile::from_samples(&fp.distances, &fp.slopes, fp.aspect, 0.0)?;
        channel_rows.push((chn, fp, area, length, profile));
    }
    let channel_area: BTreeMap<i32, f64> = channel_rows.iter().map(|r| (r.0, r.2)).collect();
    let channel_length: BTreeMap<i32, f64> = channel_rows.iter().map(|r| (r.0, r.3)).collect();

    let mut hills = BTreeMap::new();
    let mut hill_profiles = BTreeMap::new();
    for topaz in translator.iter_hillslopes() {
        let paths = products.flowpaths.get(&topaz).ok_or_else(|| {
            Error::WatershedBuildFailed(format!("no flow paths for hillslope {}", topaz))
        })?;
        let garbrecht = garbrecht_length(paths).ok_or_else(|| {
            Error::WatershedBuildFailed(format!("hillslope {} has empty flow paths", topaz))
        })?;
        let area = counts.get(&topaz).copied().unwrap_or(0) as f64 * cell_area;
        let downstream_length = translator
            .channel_of_hillslope(topaz)
            .and_then(|c| channel_length.get(&c).copied())
            .filter(|l| *l > 0.0);

        let (length, width) = match (inputs.channel_geometry, downstream_length) {
            (Some(_), Some(chn_len)) => (area / chn_len, chn_len),
            _ if garbrecht > 0.0 => (garbrecht, area / garbrecht),
            _ => (0.0, 0.0),
        };
        let aspect = mean_aspect(paths);
        let (xs, ys) = merged_slopes(paths);
        let profile = SlopeProfile {
            aspect,
            width,
            length,
            distances: xs,
            slopes: ys,
        };
        let wepp_id = translator.wepp(topaz).unwrap_or(0);
        hills.insert(
            topaz,
            HillSummary {
                topaz_id: topaz,
                wepp_id,
                area,
                length,
                width,
                aspect,
                direction: direction(aspect),
                slope_scalar: profile.slope_scalar(),
                elevation: mean_elevation(paths),
                centroid: centroid_of(subwta, &centroids, topaz, inputs.geo),
                fp_longest_length: paths.iter().map(FlowPath::length).fold(0.0, f64::max),
                slope_fn: format!("slope_files/hillslopes/hill_{}.slp", topaz),
                is_edge: edges.contains(&topaz),
            },
        );
        hill_profiles.insert(topaz, profile);
    }

    let mut channels = BTreeMap::new();
    for (chn, fp, area, length, mut profile) in channel_rows {
        let width = match inputs.channel_geometry {
            Some(geometry) => {
                let contributing: f64 = network
                    .upland_hillslopes(chn, &translator)
                    .iter()
                    .filter_map(|h| hills.get(h).map(|s: &HillSummary| s.area))
                    .sum::<f64>()
                    + network
                        .upland_channels(chn)
                        .iter()
                        .filter_map(|c| channel_area.get(c))
                        .sum::<f64>();
                geometry.bankfull_width(contributing / 1.0e6)
            }
            None if length > 0.0 => area / length,
            None => subwta.transform.cellsize,
        };
        profile.width = width;
        let wepp_id = translator.wepp(chn).unwrap_or(0);
        channels.insert(
            chn,
            ChannelSummary {
                topaz_id: chn,
                wepp_id,
                chn_enum: translator.chn_enum(wepp_id).unwrap_or(0),
                area,
                length,
                width,
                order: products.channel_orders.get(&chn).copied().unwrap_or(1),
                aspect: fp.aspect,
                direction: direction(fp.aspect),
                slope_scalar: profile.slope_scalar(),
                elevation: mean_elevation(std::slice::from_ref(fp)),
                centroid: centroid_of(subwta, &centroids, chn, inputs.geo),
                slope_fn: format!("slope_files/channels/chn_{}.slp", chn),
                channel_type: "Default".to_string(),
            },
        );
        channel_profiles.insert(chn, profile);
    }

    let structure = build_structure(&translator, &network);
    tracing::info!(
        hillslopes = hills.len(),
        channels = channels.len(),
        edge_hillslopes = edges.iter().filter(|e| hills.contains_key(e)).count(),
        "abstracted watershed"
    );
    Ok(Abstraction {
        translator,
        network,
        hills,
        channels,
        hill_profiles,
        channel_profiles,
        structure,
    })
}

impl CatalogRow for HillSummary {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("topaz_id", Column::I32(rows.iter().map(|r| r.topaz_id).collect()))
            .with("wepp_id", Column::I32(rows.iter().map(|r| r.wepp_id).collect()))
            .with("area", Column::F64(rows.iter().map(|r| r.area).collect()))
            .with("length", Column::F64(rows.iter().map(|r| r.length).collect()))
            .with("width", Column::F64(rows.iter().map(|r| r.width).collect()))
            .with("slope_scalar", Column::F64(rows.iter().map(|r| r.slope_scalar).collect()))
            .with("aspect", Column::F64(rows.iter().map(|r| r.aspect).collect()))
            .with("direction", Column::F64(rows.iter().map(|r| r.direction).collect()))
            .with("elevation", Column::F64(rows.iter().map(|r| r.elevation).collect()))
            .with("centroid_lon", Column::F64(rows.iter().map(|r| r.centroid.lon).collect()))
            .with("centroid_lat", Column::F64(rows.iter().map(|r| r.centroid.lat).collect()))
            .with("centroid_px", Column::I32(rows.iter().map(|r| r.centroid.px).collect()))
            .with("centroid_py", Column::I32(rows.iter().map(|r| r.centroid.py).collect()))
            .with(
                "fp_longest_length",
                Column::F64(rows.iter().map(|r| r.fp_longest_length).collect()),
            )
            .with("slope_fn", Column::Str(rows.iter().map(|r| r.slope_fn.clone()).collect()))
            .with("is_edge", Column::Bool(rows.iter().map(|r| r.is_edge).collect()))
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        Ok(HillSummary {
            topaz_id: get_i32(batch, "topaz_id", row)?,
            wepp_id: get_i32(batch, "wepp_id", row)?,
            area: get_f64(batch, "area", row)?,
            length: get_f64(batch, "length", row)?,
            width: get_f64(batch, "width", row)?,
            aspect: get_f64(batch, "aspect", row)?,
            direction: get_f64(batch, "direction", row)?,
            slope_scalar: get_f64(batch, "slope_scalar", row)?,
            elevation: get_f64(batch, "elevation", row)?,
            centroid: Centroid {
                px: get_i32(batch, "centroid_px", row)?,
                py: get_i32(batch, "centroid_py", row)?,
                lon: get_f64(batch, "centroid_lon", row)?,
                lat: get_f64(batch, "centroid_lat", row)?,
            },
            fp_longest_length: get_f64(batch, "fp_longest_length", row)?,
            slope_fn: get_str(batch, "slope_fn", row)?,
            is_edge: get_bool(batch, "is_edge", row)?,
        })
    }
}

impl CatalogRow for ChannelSummary {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("topaz_id", Column::I32(rows.iter().map(|r| r.topaz_id).collect()))
            .with("wepp_id", Column::I32(rows.iter().map(|r| r.wepp_id).collect()))
            .with("chn_enum", Column::I32(rows.iter().map(|r| r.chn_enum).collect()))
            .with("area", Column::F64(rows.iter().map(|r| r.area).collect()))
            .with("length", Column::F64(rows.iter().map(|r| r.length).collect()))
            .with("width", Column::F64(rows.iter().map(|r| r.width).collect()))
            .with("order", Column::I32(rows.iter().map(|r| r.order).collect()))
            .with("slope_scalar", Column::F64(rows.iter().map(|r| r.slope_scalar).collect()))
            .with("aspect", Column::F64(rows.iter().map(|r| r.aspect).collect()))
            .with("direction", Column::F64(rows.iter().map(|r| r.direction).collect()))
            .with("elevation", Column::F64(rows.iter().map(|r| r.elevation).collect()))
            .with("centroid_lon", Column::F64(rows.iter().map(|r| r.centroid.lon).collect()))
            .with("centroid_lat", Column::F64(rows.iter().map(|r| r.centroid.lat).collect()))
            .with("centroid_px", Column::I32(rows.iter().map(|r| r.centroid.px).collect()))
            .with("centroid_py", Column::I32(rows.iter().map(|r| r.centroid.py).collect()))
            .with("slope_fn", Column::Str(rows.iter().map(|r| r.slope_fn.clone()).collect()))
            .with(
                "channel_type",
                Column::Str(rows.iter().map(|r| r.channel_type.clone()).collect()),
            )
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        Ok(ChannelSummary {
            topaz_id: get_i32(batch, "topaz_id", row)?,
            wepp_id: get_i32(batch, "wepp_id", row)?,
            chn_enum: get_i32(batch, "chn_enum", row)?,
            area: get_f64(batch, "area", row)?,
            length: get_f64(batch, "length", row)?,
            width: get_f64(batch, "width", row)?,
            order: get_i32(batch, "order", row)?,
            aspect: get_f64(batch, "aspect", row)?,
            direction: get_f64(batch, "direction", row)?,
            slope_scalar: get_f64(batch, "slope_scalar", row)?,
            elevation: get_f64(batch, "elevation", row)?,
            centroid: Centroid {
                px: get_i32(batch, "centroid_px", row)?,
                py: get_i32(batch, "centroid_py", row)?,
                lon: get_f64(batch, "centroid_lon", row)?,
                lat: get_f64(batch, "centroid_lat", row)?,
            },
            slope_fn: get_str(batch, "slope_fn", row)?,
            channel_type: get_str(batch, "channel_type", row)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(len: f64, pixels: usize, aspect: f64) -> FlowPath {
        FlowPath {
            distances: vec![0.0, len / 2.0, len],
            elevations: vec![110.0, 105.0, 100.0],
            slopes: vec![0.1, 0.2, 0.3],
            pixel_count: pixels,
            aspect,
        }
    }

    #[test]
    fn test_garbrecht_length_is_pixel_weighted() {
        let paths = vec![path(100.0, 1, 0.0), path(200.0, 3, 0.0)];
        assert_eq!(garbrecht_length(&paths), Some(175.0));
        assert_eq!(garbrecht_length(&[]), None);
    }

    #[test]
    fn test_mean_aspect_wraps_north() {
        let paths = vec![path(10.0, 1, 350.0), path(10.0, 1, 10.0)];
        let a = mean_aspect(&paths);
        assert!(a < 1e-9 || (360.0 - a) < 1e-9, "aspect {}", a);
        assert_eq!(direction(100.0), 90.0);
        assert_eq!(direction(350.0), 0.0);
    }

    #[test]
    fn test_structure_lines() {
        let t = Translator::new([11, 12, 13, 21, 22, 23], [14, 24]).unwrap();
        let n = ChannelNetwork::new(BTreeMap::from([(24, vec![14]), (14, vec![])])).unwrap();
        let text = render_structure(&build_structure(&t, &n));
        assert_eq!(text, "99.1\n2 5 6 4 8 0 0 0 0 0\n2 2 3 1 0 0 0 0 0 0\n");
    }
}
