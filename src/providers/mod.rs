//! Capability interfaces for the external collaborators: DEM services,
//! delineation engines, landcover and soil databases, climate generation,
//! the simulator binary and assorted geoprocessing helpers.
//!
//! Controllers only ever see these traits; [`local`] holds file-backed
//! implementations used by the CLI.

pub mod geo;
pub mod local;

use crate::climate::{ClimateMode, StormEvent};
use crate::error::Result;
use crate::landuse::LanduseMode;
use crate::landuse::management::Management;
use crate::raster::Grid;
use crate::soils::{SoilDb, SoilsMode};
use crate::soils::soil_file::SoilProfile;
use crate::watershed::{DelineationBackendKind, FillOrBreach, Outlet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, PartialEq)]
pub struct DemRequest {
    /// `[xmin, ymin, xmax, ymax]` in WGS84.
    pub extent: [f64; 4],
    pub cellsize: f64,
    pub dem_db: String,
}

pub trait DemSource: Send + Sync {
    fn fetch_dem(&self, request: &DemRequest, dst: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelineationParams {
    pub csa: f64,
    pub mcl: f64,
    pub fill_or_breach: FillOrBreach,
    pub breach_radius: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProducts {
    pub ncols: usize,
    pub nrows: usize,
    pub channel_cells: usize,
}

/// Flow-path samples for one hillslope or channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPath {
    /// Distance from the top of the path, metres.
    pub distances: Vec<f64>,
    pub elevations: Vec<f64>,
    pub slopes: Vec<f64>,
    pub pixel_count: usize,
    /// Degrees clockwise from north.
    pub aspect: f64,
}

impl FlowPath {
    pub fn length(&self) -> f64 {
        match (self.distances.first(), self.distances.last()) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }
}

/// Everything a backend hands back after subcatchment delineation.
#[derive(Debug, Clone, PartialEq)]
pub struct DelineationProducts {
    pub subwta: Grid<i32>,
    /// Channel topaz id to the topaz ids of channels draining into it.
    pub network: BTreeMap<i32, Vec<i32>>,
    pub flowpaths: BTreeMap<i32, Vec<FlowPath>>,
    pub channel_profiles: BTreeMap<i32, FlowPath>,
    pub channel_orders: BTreeMap<i32, i32>,
    /// Distance to the receiving channel along flow, for OFE segmentation.
    pub flow_distance: Option<Grid<f64>>,
}

pub trait DelineationBackend: Send + Sync {
    fn kind(&self) -> DelineationBackendKind;
    fn build_channels(&self, wd: &Path, params: &DelineationParams) -> Result<ChannelProducts>;
    fn set_outlet(&self, wd: &Path, lng: f64, lat: f64) -> Result<Outlet>;
    fn find_outlet_from_polygon(&self, wd: &Path, polygon: &[(f64, f64)]) -> Result<Outlet>;
    fn build_subcatchments(
        &self,
        wd: &Path,
        params: &DelineationParams,
        outlet: &Outlet,
    ) -> Result<DelineationProducts>;
}

pub struct LandcoverRequest<'a> {
    pub wd: &'a Path,
    pub mode: LanduseMode,
    pub db: &'a str,
    pub locale: &'a str,
    pub subwta: &'a Grid<i32>,
    /// Hillslope centroids (lon, lat) for point-query sources.
    pub centroids: &'a BTreeMap<i32, (f64, f64)>,
}

pub enum LandcoverData {
    Raster(Grid<i32>),
    Points(BTreeMap<i32, String>),
}

pub trait LandcoverSource: Send + Sync {
    fn fetch(&self, request: &LandcoverRequest) -> Result<LandcoverData>;
    fn management(&self, key: &str) -> Result<Management>;
    fn channel_management(&self) -> Result<Management>;
}

pub struct SoilRequest<'a> {
    pub wd: &'a Path,
    pub mode: SoilsMode,
    pub db: SoilDb,
    pub subwta: &'a Grid<i32>,
    pub centroids: &'a BTreeMap<i32, (f64, f64)>,
}

pub enum SoilData {
    Raster(Grid<i32>),
    Points(BTreeMap<i32, String>),
}

pub trait SoilSource: Send + Sync {
    fn fetch(&self, request: &SoilRequest) -> Result<SoilData>;
    /// Raw horizon stack for a mapunit, `None` when the database has no
    /// usable record.
    fn profile(&self, db: SoilDb, mukey: &str) -> Result<Option<SoilProfile>>;
    /// Pedotransfer hook filling attributes the database left empty.
    fn fill_missing(&self, _profile: &mut SoilProfile) -> Result<()> {
        Ok(())
    }
}

pub struct ClimateRequest<'a> {
    pub cli_dir: &'a Path,
    pub mode: ClimateMode,
    pub input_years: u32,
    pub watershed_centroid: (f64, f64),
    pub centroids: &'a BTreeMap<i32, (f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateBuild {
    /// File name under the climate directory used for the watershed run.
    pub watershed_cli: String,
    /// Hillslope topaz id to climate file name.
    pub sub_cli_fns: BTreeMap<i32, String>,
    pub sim_years: u32,
    pub storms: Vec<StormEvent>,
}

pub trait ClimateSource: Send + Sync {
    fn build(&self, request: &ClimateRequest) -> Result<ClimateBuild>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub label: String,
    pub binary: String,
    pub run_file: PathBuf,
    pub cwd: PathBuf,
    /// Receives the engine's console output.
    pub log_file: PathBuf,
}

pub trait WeppEngine: Send + Sync {
    /// Runs to completion. Implementations poll `cancel` and abandon the
    /// process with [`crate::Error::Cancelled`] once it is set.
    fn run(&self, invocation: &EngineInvocation, cancel: &AtomicBool) -> Result<()>;
}

pub trait MapSampler: Send + Sync {
    fn sample(&self, map: &str, lon: f64, lat: f64) -> Result<Option<f64>>;
}

pub trait PetHelper: Send + Sync {
    fn write_pmetpara(
        &self,
        runs_dir: &Path,
        kcb: f64,
        rawp: f64,
        managements: &[String],
    ) -> Result<()>;
}

pub trait GeoTools: Send + Sync {
    fn utm_to_lonlat(&self, x: f64, y: f64) -> (f64, f64);
    fn lonlat_to_utm(&self, lon: f64, lat: f64) -> (f64, f64);
    fn reproject_to_wgs(&self, grid: &Grid<f64>) -> Result<Grid<f64>>;
}

/// Fractional cover (percent) of the remote-sensed vegetation bands.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoverBands {
    pub tree: f64,
    pub shrub: f64,
    pub annual_forb_grass: f64,
    pub perennial_forb_grass: f64,
}

pub trait CanopySource: Send + Sync {
    fn bands(&self, subwta: &Grid<i32>, year: i32) -> Result<BTreeMap<i32, CoverBands>>;
    /// Initial canopy cover (fraction) for a hillslope, from the time series.
    fn initial_canopy(&self, topaz_id: i32, year: i32) -> Option<f64>;
}

pub trait ChannelGeometry: Send + Sync {
    fn bankfull_width(&self, area_km2: f64) -> f64;
}

/// Bieger et al. (2015) US-wide bankfull width regression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bieger2015;

impl ChannelGeometry for Bieger2015 {
    fn bankfull_width(&self, area_km2: f64) -> f64 {
        2.70 * area_km2.max(0.0).powf(0.352)
    }
}

/// The provider set bound to one run.
#[derive(Clone)]
pub struct Providers {
    pub dem: Arc<dyn DemSource>,
    pub delineation: Arc<dyn DelineationBackend>,
    pub landcover: Arc<dyn LandcoverSource>,
    pub soils: Arc<dyn SoilSource>,
    pub climate: Arc<dyn ClimateSource>,
    pub engine: Arc<dyn WeppEngine>,
    pub maps: Arc<dyn MapSampler>,
    pub pet: Arc<dyn PetHelper>,
    pub geo: Arc<dyn GeoTools>,
    pub canopy: Option<Arc<dyn CanopySource>>,
    pub channel_geometry: Arc<dyn ChannelGeometry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bieger_width_grows_with_area() {
        let b = Bieger2015;
        assert!((b.bankfull_width(1.0) - 2.70).abs() < 1e-12);
        assert!(b.bankfull_width(10.0) > b.bankfull_width(1.0));
        assert_eq!(b.bankfull_width(0.0), 0.0);
    }
}
