#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wepprun_rs::climate::Climate;
use wepprun_rs::config::RunConfig;
use wepprun_rs::landuse::Landuse;
use wepprun_rs::landuse::management::Management;
use wepprun_rs::providers::geo::Utm;
use wepprun_rs::providers::local::LocalPet;
use wepprun_rs::providers::{
    Bieger2015, ChannelProducts, ClimateBuild, ClimateRequest, ClimateSource, DelineationBackend,
    DelineationParams, DelineationProducts, DemRequest, DemSource, EngineInvocation, FlowPath,
    GeoTools, LandcoverData, LandcoverRequest, LandcoverSource, MapSampler, Providers, SoilData,
    SoilRequest, SoilSource, WeppEngine,
};
use wepprun_rs::raster::{GeoTransform, Grid};
use wepprun_rs::ron::Ron;
use wepprun_rs::soils::SoilDb;
use wepprun_rs::soils::Soils;
use wepprun_rs::soils::soil_file::{HorizonAttrs, SoilProfile};
use wepprun_rs::watershed::{DelineationBackendKind, Outlet, Watershed};
use wepprun_rs::wepp::executor::COMPLETION_BANNER;
use wepprun_rs::{Error, Result, RunContext};

pub const NCOLS: usize = 10;
pub const NROWS: usize = 7;
pub const CELLSIZE: f64 = 30.0;
pub const HILLSLOPES: [i32; 6] = [11, 12, 13, 21, 22, 23];
pub const SIM_YEARS: u32 = 2;
pub const FOREST: &str = "42";
pub const SHRUB: &str = "52";

pub fn utm() -> Utm {
    Utm::new(11, true)
}

/// Lower-left corner near (-116.5, 46.7), UTM zone 11.
pub fn transform() -> GeoTransform {
    let (x, y) = utm().forward(-116.5, 46.7);
    GeoTransform {
        xllcorner: x.floor(),
        yllcorner: y.floor(),
        cellsize: CELLSIZE,
    }
}

/// Two channels, 14 draining into the outlet channel 24, each with a left,
/// right and top hillslope. The outer ring is outside the watershed.
pub fn subwta() -> Grid<i32> {
    let rows = vec![
        vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        vec![0, 12, 12, 12, 12, 22, 22, 22, 22, 0],
        vec![0, 12, 12, 12, 12, 22, 22, 22, 22, 0],
        vec![0, 11, 14, 14, 14, 21, 24, 24, 24, 0],
        vec![0, 13, 13, 13, 13, 23, 23, 23, 23, 0],
        vec![0, 13, 13, 13, 13, 23, 23, 23, 23, 0],
        vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    ];
    Grid::from_rows(rows, transform(), 0).expect("rectangular rows")
}

pub fn pixel_count(topaz_id: i32) -> usize {
    subwta().cells().filter(|(_, _, v)| *v == topaz_id).count()
}

fn flowpath(pixels: usize, aspect: f64) -> FlowPath {
    FlowPath {
        distances: vec![0.0, 30.0, 60.0],
        elevations: vec![1010.0, 1005.0, 1000.0],
        slopes: vec![0.10, 0.15, 0.20],
        pixel_count: pixels,
        aspect,
    }
}

pub fn products() -> DelineationProducts {
    let flowpaths = HILLSLOPES
        .iter()
        .map(|t| {
            let aspect = if t % 10 == 2 { 180.0 } else { 0.0 };
            (*t, vec![flowpath(pixel_count(*t), aspect)])
        })
        .collect();
    let channel_profiles = [14, 24]
        .into_iter()
        .map(|c| {
            (
                c,
                FlowPath {
                    distances: vec![0.0, 45.0, 90.0],
                    elevations: vec![1000.0, 998.0, 995.0],
                    slopes: vec![0.05, 0.05, 0.05],
                    pixel_count: 3,
                    aspect: 90.0,
                },
            )
        })
        .collect();
    DelineationProducts {
        subwta: subwta(),
        network: BTreeMap::from([(24, vec![14]), (14, vec![])]),
        flowpaths,
        channel_profiles,
        channel_orders: BTreeMap::from([(14, 1), (24, 2)]),
        flow_distance: None,
    }
}

pub struct FakeDem;

impl DemSource for FakeDem {
    fn fetch_dem(&self, _request: &DemRequest, dst: &Path) -> Result<()> {
        let mut dem = Grid::new(NCOLS, NROWS, transform(), -9999.0);
        for py in 0..NROWS {
            for px in 0..NCOLS {
                dem.set(px, py, 1000.0 + py as f64 + px as f64 * 0.5);
            }
        }
        dem.write_ascii(dst)
    }
}

pub struct FakeDelineation {
    pub outlet_px: (i32, i32),
}

impl DelineationBackend for FakeDelineation {
    fn kind(&self) -> DelineationBackendKind {
        DelineationBackendKind::Topaz
    }

    fn build_channels(&self, _wd: &Path, _params: &DelineationParams) -> Result<ChannelProducts> {
        Ok(ChannelProducts {
            ncols: NCOLS,
            nrows: NROWS,
            channel_cells: 6,
        })
    }

    fn set_outlet(&self, _wd: &Path, lng: f64, lat: f64) -> Result<Outlet> {
        let t = transform();
        let (px, py) = self.outlet_px;
        let (x, y) = t.cell_center(px as usize, py as usize, NROWS);
        let (actual_lon, actual_lat) = utm().inverse(x, y);
        Ok(Outlet {
            requested_lon: lng,
            requested_lat: lat,
            actual_lon,
            actual_lat,
            distance: 12.0,
            px,
            py,
            flagged: false,
        })
    }

    fn find_outlet_from_polygon(&self, wd: &Path, polygon: &[(f64, f64)]) -> Result<Outlet> {
        let (lon, lat) = polygon.first().copied().unwrap_or_default();
        self.set_outlet(wd, lon, lat)
    }

    fn build_subcatchments(
        &self,
        _wd: &Path,
        _params: &DelineationParams,
        _outlet: &Outlet,
    ) -> Result<DelineationProducts> {
        Ok(products())
    }
}

/// Forest on the top three rows, shrub below.
pub struct FakeLandcover;

impl FakeLandcover {
    pub fn grid() -> Grid<i32> {
        let mut g = Grid::new(NCOLS, NROWS, transform(), -9999);
        for py in 0..NROWS {
            for px in 0..NCOLS {
                g.set(px, py, if py < 3 { 42 } else { 52 });
            }
        }
        g
    }
}

impl LandcoverSource for FakeLandcover {
    fn fetch(&self, _request: &LandcoverRequest) -> Result<LandcoverData> {
        Ok(LandcoverData::Raster(Self::grid()))
    }

    fn management(&self, key: &str) -> Result<Management> {
        let m = match key {
            "42" => Management::simple(key, "Evergreen Forest", Some("forest"), 0.9),
            "52" => Management::simple(key, "Shrub/Scrub", Some("shrub"), 0.7),
            "106" => Management::simple(key, "Forest Low Severity", Some("forest low sev fire"), 0.7),
            "118" => Management::simple(key, "Forest Moderate Severity", Some("forest moderate sev fire"), 0.4),
            "105" => Management::simple(key, "Forest High Severity", Some("forest high sev fire"), 0.1),
            "121" => Management::simple(key, "Shrub Low Severity", Some("shrub low sev fire"), 0.5),
            "120" => Management::simple(key, "Shrub Moderate Severity", Some("shrub moderate sev fire"), 0.3),
            "119" => Management::simple(key, "Shrub High Severity", Some("shrub high sev fire"), 0.1),
            other => {
                return Err(Error::provider("landcover", format!("no management for {}", other)));
            }
        };
        Ok(m)
    }

    fn channel_management(&self) -> Result<Management> {
        Ok(Management::simple("channel", "Channel", None, 0.0))
    }
}

pub const MUKEY: &str = "100";

pub fn silt_loam(mukey: &str) -> SoilProfile {
    SoilProfile {
        mukey: mukey.to_string(),
        name: "Palouse".to_string(),
        texture: "silt loam".to_string(),
        kind: String::new(),
        albedo: Some(0.23),
        ki: Some(5_000_000.0),
        kr: Some(0.006),
        shcrit: Some(3.5),
        avke: None,
        kslast: None,
        ll: Some(32.0),
        horizons: vec![HorizonAttrs {
            depth: 400.0,
            bd: Some(1.3),
            ksat: Some(30.0),
            fc: Some(0.3),
            wp: Some(0.12),
            sand: Some(15.0),
            clay: Some(20.0),
            om: Some(3.0),
            cec: Some(18.0),
            rfg: Some(0.0),
        }],
    }
}

/// One mapunit everywhere, served from the finest database.
pub struct FakeSoils;

impl SoilSource for FakeSoils {
    fn fetch(&self, request: &SoilRequest) -> Result<SoilData> {
        Ok(SoilData::Points(
            request
                .centroids
                .keys()
                .map(|t| (*t, MUKEY.to_string()))
                .collect(),
        ))
    }

    fn profile(&self, db: SoilDb, mukey: &str) -> Result<Option<SoilProfile>> {
        Ok((db == SoilDb::Ssurgo && mukey == MUKEY).then(|| silt_loam(mukey)))
    }
}

pub struct FakeClimate;

impl ClimateSource for FakeClimate {
    fn build(&self, request: &ClimateRequest) -> Result<ClimateBuild> {
        let text = "5.30\n1 0 0\n   Station:  TEST STATION\n Latitude Longitude Elevation (m) Obs. Years   Beginning year  Years simulated\n    46.70  -116.50   800     30     2001      2\n";
        fs::write(request.cli_dir.join("wepp.cli"), text)?;
        Ok(ClimateBuild {
            watershed_cli: "wepp.cli".to_string(),
            sub_cli_fns: BTreeMap::new(),
            sim_years: SIM_YEARS,
            storms: Vec::new(),
        })
    }
}

/// Water-balance line in the engine's column layout.
pub fn wat_line(julian: u32, year: i32, p: f64, q: f64, latq: f64, area: f64) -> String {
    format!(
        "1 {} {} {} {} {} 0.5 0.2 0.1 1.0 0 0 {} 150 0 0 0 0 0 {}\n",
        julian, year, p, p, q, latq, area
    )
}

fn write_hillslope_outputs(cwd: &Path, wepp_id: i32) -> Result<()> {
    let mut wat = String::from("  Daily water balance\n OFE J Y P RM Q Ep Es Er Dp\n ------\n");
    for year in 2001..2001 + SIM_YEARS as i32 {
        for julian in 1..=5u32 {
            let q = julian as f64 * 0.5 + wepp_id as f64 * 0.1;
            wat.push_str(&wat_line(julian, year, 10.0, q, 0.2, 5000.0));
        }
    }
    fs::write(cwd.join(format!("p{}.wat.out", wepp_id)), wat)?;
    fs::write(cwd.join(format!("p{}.loss.out", wepp_id)), "hillslope loss\n")?;
    fs::write(cwd.join(format!("p{}.pass.dat", wepp_id)), "pass\n")?;
    Ok(())
}

pub fn loss_report_text(n_hillslopes: i32) -> String {
    let mut s = String::from(" ANNUAL AVERAGE SUMMARIES\n\n   Hillslopes\n   ---------\n   Hillslope  Runoff  Subrunoff  Baseflow  Soil  Deposition  Yield\n");
    for w in 1..=n_hillslopes {
        s.push_str(&format!(
            "     {}  {:.1}  5.0  0.0  {:.1}  0.0  {:.1}\n",
            w,
            50.0 + w as f64,
            100.0 * w as f64,
            90.0 * w as f64
        ));
    }
    s.push_str("\n   Channels and Impoundments\n   ---------\n");
    for w in [n_hillslopes + 1, n_hillslopes + 2] {
        s.push_str(&format!("     {}  240.0  1.1  0.0  200.5  42.5\n", w));
    }
    s.push_str(
        "\n   OUTLET\n   ------\n   Avg. Ann. water discharge from outlet = 240.0 m^3/yr\n   Avg. Ann. sediment discharge from outlet = 1.1 tonne/yr\n",
    );
    s
}

fn write_watershed_outputs(cwd: &Path) -> Result<()> {
    let output = cwd.parent().map(|p| p.join("output")).unwrap_or_default();
    fs::create_dir_all(&output)?;
    fs::write(output.join("loss_pw0.txt"), loss_report_text(HILLSLOPES.len() as i32))?;

    let mut ebe = String::from("  EVENT OUTPUT\n day mo year precip runoff peak sed\n");
    for (day, month, year, runoff) in [(3, 2, 1, 40.0), (20, 5, 1, 120.0), (7, 3, 2, 300.0), (9, 11, 2, 15.0)] {
        ebe.push_str(&format!("{} {} {} 25.0 {} 0.4 {}\n", day, month, year, runoff, runoff * 2.0));
    }
    fs::write(output.join("ebe_pw0.txt"), ebe)?;

    let mut chan = String::from(" Year Day Elapsed Chan Discharge Sediment\n");
    for year in 2001..2001 + SIM_YEARS as i32 {
        for julian in 1..=5 {
            for chn in [7, 8] {
                chan.push_str(&format!("{} {} 0 {} {} 0.01\n", year, julian, chn, 0.002 * julian as f64));
            }
        }
    }
    fs::write(cwd.join("pw0.chan.out"), chan)?;
    fs::write(cwd.join("pw0.loss.out"), "watershed loss\n")?;
    Ok(())
}

/// Writes plausible outputs for each invocation and records the labels run.
///
/// Labels in `stall` wait for the cancel flag (up to five seconds) before
/// doing any work, as a long engine run would.
#[derive(Default)]
pub struct FakeEngine {
    pub fail_label: Option<String>,
    pub stall: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn failing(label: &str) -> Self {
        FakeEngine {
            fail_label: Some(label.to_string()),
            ..FakeEngine::default()
        }
    }

    pub fn stalling(mut self, labels: &[&str]) -> Self {
        self.stall = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl WeppEngine for FakeEngine {
    fn run(&self, invocation: &EngineInvocation, cancel: &AtomicBool) -> Result<()> {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        self.calls.lock().push(invocation.label.clone());
        if self.stall.contains(&invocation.label) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if cancel.load(Ordering::SeqCst) {
                    return Err(Error::Cancelled);
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        if self.fail_label.as_deref() == Some(invocation.label.as_str()) {
            fs::write(&invocation.log_file, "*** error: run file is invalid\n")?;
            return Err(Error::Simulator {
                label: invocation.label.clone(),
                run_file: invocation.run_file.clone(),
                status: Some(1),
            });
        }
        if invocation.label == "pw0" {
            write_watershed_outputs(&invocation.cwd)?;
        } else {
            let wepp_id: i32 = invocation
                .label
                .trim_start_matches('p')
                .parse()
                .map_err(|_| Error::validation(format!("bad label {}", invocation.label)))?;
            write_hillslope_outputs(&invocation.cwd, wepp_id)?;
        }
        fs::write(
            &invocation.log_file,
            format!("running {}\n{}\n", invocation.run_file.display(), COMPLETION_BANNER),
        )?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMaps {
    pub values: BTreeMap<String, f64>,
}

impl MapSampler for FakeMaps {
    fn sample(&self, map: &str, _lon: f64, _lat: f64) -> Result<Option<f64>> {
        Ok(self.values.get(map).copied())
    }
}

pub struct Fakes {
    pub engine: Arc<FakeEngine>,
    pub maps: FakeMaps,
    pub outlet_px: (i32, i32),
}

impl Default for Fakes {
    fn default() -> Self {
        Fakes {
            engine: Arc::new(FakeEngine::default()),
            maps: FakeMaps::default(),
            outlet_px: (8, 3),
        }
    }
}

impl Fakes {
    pub fn providers(self) -> Providers {
        let geo: Arc<dyn GeoTools> = Arc::new(utm());
        Providers {
            dem: Arc::new(FakeDem),
            delineation: Arc::new(FakeDelineation {
                outlet_px: self.outlet_px,
            }),
            landcover: Arc::new(FakeLandcover),
            soils: Arc::new(FakeSoils),
            climate: Arc::new(FakeClimate),
            engine: self.engine,
            maps: Arc::new(self.maps),
            pet: Arc::new(LocalPet),
            geo,
            canopy: None,
            channel_geometry: Arc::new(Bieger2015),
        }
    }
}

pub fn test_config() -> RunConfig {
    let mut cfg = RunConfig::default();
    cfg.wepp.max_workers = Some(2);
    cfg.wepp.heartbeat_secs = 1;
    cfg
}

/// Initializes a run in a fresh temporary directory. The directory name is
/// the run id, so runs in one test binary never share prep state.
pub fn init(config: RunConfig, fakes: Fakes) -> (TempDir, RunContext) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ctx = Ron::init_run(tmp.path(), "test", config, fakes.providers()).expect("init run");
    (tmp, ctx)
}

pub fn delineate(ctx: &RunContext) -> Result<()> {
    let mut ron: Ron = ctx.load()?;
    ron.set_map(ctx, [-116.51, 46.69, -116.49, 46.71], 13)?;
    ron.fetch_dem(ctx)?;
    let mut watershed: Watershed = ctx.load()?;
    watershed.build_channels(ctx)?;
    watershed.set_outlet(ctx, -116.497, 46.701)?;
    watershed.build_subcatchments(ctx)?;
    watershed.abstract_watershed(ctx)
}

pub fn build_inputs(ctx: &RunContext) -> Result<()> {
    let mut landuse: Landuse = ctx.load()?;
    landuse.build(ctx)?;
    let mut soils: Soils = ctx.load()?;
    soils.build(ctx)?;
    let mut climate: Climate = ctx.load()?;
    climate.build(ctx)
}

/// A run delineated and with landuse, soils and climate built.
pub fn prepared_run(config: RunConfig, fakes: Fakes) -> (TempDir, RunContext) {
    let (tmp, ctx) = init(config, fakes);
    delineate(&ctx).expect("delineate");
    build_inputs(&ctx).expect("build inputs");
    (tmp, ctx)
}

/// Burn severity raster: high severity over the forested rows.
pub fn write_sbs(path: &Path) {
    let mut g = Grid::new(NCOLS, NROWS, transform(), 255);
    for py in 0..NROWS {
        for px in 0..NCOLS {
            g.set(px, py, if py < 3 { 3 } else { 0 });
        }
    }
    g.write_ascii(path).expect("write sbs");
}
