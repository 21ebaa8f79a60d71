//! File-backed providers for running the pipeline from the command line:
//! precomputed delineation products, ASCII-grid sources, a JSON management
//! library, a SQLite soil database, a single climate station and the
//! simulator as a child process.

use super::geo::Utm;
use super::{
    Bieger2015, ChannelProducts, ClimateBuild, ClimateRequest, ClimateSource, DelineationBackend,
    DelineationParams, DelineationProducts, DemRequest, DemSource, EngineInvocation,
    LandcoverData, LandcoverRequest, LandcoverSource, MapSampler, PetHelper, Providers, SoilData,
    SoilRequest, SoilSource, WeppEngine,
};
use crate::climate::ClimateMode;
use crate::config::{ProvidersConfig, RunConfig, SoilDbColumns};
use crate::error::{Error, IoContext, Result};
use crate::landuse::LanduseMode;
use crate::landuse::management::Management;
use crate::nodb::snapshot::atomic_write;
use crate::raster::Grid;
use crate::soils::sqlite_db::SoilDatabase;
use crate::soils::soil_file::SoilProfile;
use crate::soils::{SoilDb, SoilsMode};
use crate::watershed::{DelineationBackendKind, Outlet, StoredProducts};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn configured<'a>(path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| Error::provider(what, format!("no {} path is configured", what)))
}

/// Copies a configured ASCII-grid DEM into the run.
pub struct LocalDem {
    pub path: Option<PathBuf>,
}

impl DemSource for LocalDem {
    fn fetch_dem(&self, request: &DemRequest, dst: &Path) -> Result<()> {
        let src = configured(&self.path, "dem")?;
        let grid: Grid<f64> = Grid::read_ascii(src)?;
        if (grid.transform.cellsize - request.cellsize).abs() > 1e-6 {
            tracing::warn!(
                dem = grid.transform.cellsize,
                requested = request.cellsize,
                "DEM cell size differs from the run's"
            );
        }
        grid.write_ascii(dst)
    }
}

/// Delineation read from a directory of products computed elsewhere:
/// `netful.asc` (channel mask), `subwta.asc`, `products.json` and an
/// optional `flow_distance.asc`.
pub struct PrecomputedDelineation {
    pub dir: Option<PathBuf>,
    pub kind: DelineationBackendKind,
    pub geo: Utm,
}

impl PrecomputedDelineation {
    fn netful_path(wd: &Path) -> PathBuf {
        wd.join("watershed").join("netful.asc")
    }

    fn snap(&self, netful: &Grid<i32>, lng: f64, lat: f64) -> Result<Outlet> {
        let (x, y) = self.geo.forward(lng, lat);
        let t = netful.transform;
        let (tx, ty) = t.to_pixel(x, y, netful.nrows);
        let nearest = netful
            .cells()
            .filter(|(_, _, v)| *v > 0 && *v != netful.nodata)
            .map(|(px, py, _)| {
                let dx = px as f64 - tx as f64;
                let dy = py as f64 - ty as f64;
                (px, py, (dx * dx + dy * dy).sqrt() * t.cellsize)
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .ok_or_else(|| Error::WatershedBuildFailed("channel raster has no channel cells".to_string()))?;
        let (px, py, distance) = nearest;
        let (cx, cy) = t.cell_center(px, py, netful.nrows);
        let (actual_lon, actual_lat) = self.geo.inverse(cx, cy);
        Ok(Outlet {
            requested_lon: lng,
            requested_lat: lat,
            actual_lon,
            actual_lat,
            distance,
            px: px as i32,
            py: py as i32,
            flagged: false,
        })
    }
}

impl DelineationBackend for PrecomputedDelineation {
    fn kind(&self) -> DelineationBackendKind {
        self.kind
    }

    fn build_channels(&self, wd: &Path, _params: &DelineationParams) -> Result<ChannelProducts> {
        let dir = configured(&self.dir, "delineation")?;
        let netful: Grid<i32> = Grid::read_ascii(&dir.join("netful.asc"))?;
        let channel_cells = netful
            .cells()
            .filter(|(_, _, v)| *v > 0 && *v != netful.nodata)
            .count();
        netful.write_ascii(&Self::netful_path(wd))?;
        Ok(ChannelProducts {
            ncols: netful.ncols,
            nrows: netful.nrows,
            channel_cells,
        })
    }

    fn set_outlet(&self, wd: &Path, lng: f64, lat: f64) -> Result<Outlet> {
        let netful: Grid<i32> = Grid::read_ascii(&Self::netful_path(wd))?;
        self.snap(&netful, lng, lat)
    }

    fn find_outlet_from_polygon(&self, wd: &Path, polygon: &[(f64, f64)]) -> Result<Outlet> {
        if polygon.len() < 3 {
            return Err(Error::validation("outlet polygon needs at least three vertices"));
        }
        let n = polygon.len() as f64;
        let lng = polygon.iter().map(|p| p.0).sum::<f64>() / n;
        let lat = polygon.iter().map(|p| p.1).sum::<f64>() / n;
        self.set_outlet(wd, lng, lat)
    }

    fn build_subcatchments(
        &self,
        _wd: &Path,
        _params: &DelineationParams,
        _outlet: &Outlet,
    ) -> Result<DelineationProducts> {
        let dir = configured(&self.dir, "delineation")?;
        let path = dir.join("products.json");
        let stored: StoredProducts = serde_json::from_str(&fs::read_to_string(&path).at(&path)?)?;
        let fd_path = dir.join("flow_distance.asc");
        let flow_distance = if fd_path.exists() {
            Some(Grid::read_ascii(&fd_path)?)
        } else {
            None
        };
        Ok(stored.products(Grid::read_ascii(&dir.join("subwta.asc"))?, flow_distance))
    }
}

/// Gridded landcover from an ASCII grid plus a JSON management library
/// (`key -> Management`).
pub struct GridLandcover {
    pub grid: Option<PathBuf>,
    library: BTreeMap<String, Management>,
}

impl GridLandcover {
    pub fn open(grid: Option<PathBuf>, library: Option<&Path>) -> Result<Self> {
        let library = match library {
            Some(path) => serde_json::from_str(&fs::read_to_string(path).at(path)?)?,
            None => BTreeMap::new(),
        };
        Ok(GridLandcover { grid, library })
    }
}

impl LandcoverSource for GridLandcover {
    fn fetch(&self, request: &LandcoverRequest) -> Result<LandcoverData> {
        match request.mode {
            LanduseMode::Gridded => {
                let grid = Grid::read_ascii(configured(&self.grid, "landcover")?)?;
                Ok(LandcoverData::Raster(grid))
            }
            mode => Err(Error::provider(
                "landcover",
                format!("{:?} landuse is not available from local files", mode),
            )),
        }
    }

    fn management(&self, key: &str) -> Result<Management> {
        self.library
            .get(key)
            .cloned()
            .ok_or_else(|| Error::provider("landcover", format!("no management for key {}", key)))
    }

    fn channel_management(&self) -> Result<Management> {
        Ok(self
            .library
            .get("channel")
            .cloned()
            .unwrap_or_else(|| Management::simple("channel", "Channel", None, 0.0)))
    }
}

/// Soil mapunits from an ASCII grid and profiles from a SQLite database.
pub struct SqliteSoils {
    pub grid: Option<PathBuf>,
    db: Option<Mutex<SoilDatabase>>,
}

impl SqliteSoils {
    pub fn open(grid: Option<PathBuf>, db: Option<&Path>, columns: SoilDbColumns) -> Result<Self> {
        let db = match db {
            Some(path) => Some(Mutex::new(SoilDatabase::open(path, columns)?)),
            None => None,
        };
        Ok(SqliteSoils { grid, db })
    }
}

impl SoilSource for SqliteSoils {
    fn fetch(&self, request: &SoilRequest) -> Result<SoilData> {
        match request.mode {
            SoilsMode::Gridded => Ok(SoilData::Raster(Grid::read_ascii(configured(&self.grid, "soil grid")?)?)),
            mode => Err(Error::provider(
                "soils",
                format!("{:?} soils are not available from local files", mode),
            )),
        }
    }

    fn profile(&self, db: SoilDb, mukey: &str) -> Result<Option<SoilProfile>> {
        match &self.db {
            Some(conn) => conn.lock().load_profile(db, mukey),
            None => Err(Error::provider("soils", "no soil database is configured")),
        }
    }
}

/// One station file for every hillslope.
pub struct SingleStationClimate {
    pub file: Option<PathBuf>,
}

pub const STATION_CLI: &str = "wepp.cli";

/// Simulated years from the station header (sixth value of the fifth line).
pub fn cli_years(text: &str) -> Option<u32> {
    text.lines()
        .nth(4)?
        .split_whitespace()
        .nth(5)?
        .parse::<f64>()
        .ok()
        .map(|y| y as u32)
        .filter(|y| *y > 0)
}

impl ClimateSource for SingleStationClimate {
    fn build(&self, request: &ClimateRequest) -> Result<ClimateBuild> {
        if request.mode == ClimateMode::SingleStormBatch {
            return Err(Error::provider("climate", "storm batches need a storm generator"));
        }
        let src = configured(&self.file, "climate")?;
        let text = fs::read_to_string(src).at(src)?;
        atomic_write(&request.cli_dir.join(STATION_CLI), text.as_bytes())?;
        let sim_years = cli_years(&text).unwrap_or(request.input_years);
        Ok(ClimateBuild {
            watershed_cli: STATION_CLI.to_string(),
            sub_cli_fns: request
                .centroids
                .keys()
                .map(|t| (*t, STATION_CLI.to_string()))
                .collect(),
            sim_years,
            storms: Vec::new(),
        })
    }
}

/// Runs the simulator as `<binary> < <run file>` in the run directory,
/// console output to the invocation's log file.
pub struct ProcessEngine {
    pub poll: Duration,
}

impl WeppEngine for ProcessEngine {
    fn run(&self, invocation: &EngineInvocation, cancel: &AtomicBool) -> Result<()> {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let stdin = File::open(&invocation.run_file).at(&invocation.run_file)?;
        let log = File::create(&invocation.log_file).at(&invocation.log_file)?;
        let err = log.try_clone().at(&invocation.log_file)?;
        let mut child = Command::new(&invocation.binary)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err))
            .spawn()
            .map_err(|e| Error::provider("engine", format!("cannot start {}: {}", invocation.binary, e)))?;

        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(Error::Simulator {
                    label: invocation.label.clone(),
                    run_file: invocation.run_file.clone(),
                    status: status.code(),
                });
            }
            if cancel.load(Ordering::SeqCst) {
                tracing::debug!(label = %invocation.label, "killing cancelled run");
                child.kill()?;
                child.wait()?;
                return Err(Error::Cancelled);
            }
            thread::sleep(self.poll);
        }
    }
}

/// Constant-valued and ASCII-grid maps. Grids are in the run's UTM zone.
pub struct LocalMaps {
    pub constants: BTreeMap<String, f64>,
    pub grids: BTreeMap<String, PathBuf>,
    pub geo: Utm,
    loaded: Mutex<BTreeMap<String, Arc<Grid<f64>>>>,
}

impl LocalMaps {
    pub fn new(constants: BTreeMap<String, f64>, grids: BTreeMap<String, PathBuf>, geo: Utm) -> Self {
        LocalMaps {
            constants,
            grids,
            geo,
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    fn grid(&self, name: &str, path: &Path) -> Result<Arc<Grid<f64>>> {
        if let Some(g) = self.loaded.lock().get(name) {
            return Ok(g.clone());
        }
        let grid = Arc::new(Grid::read_ascii(path)?);
        self.loaded.lock().insert(name.to_string(), grid.clone());
        Ok(grid)
    }
}

impl MapSampler for LocalMaps {
    fn sample(&self, map: &str, lon: f64, lat: f64) -> Result<Option<f64>> {
        if let Some(v) = self.constants.get(map) {
            return Ok(Some(*v));
        }
        let Some(path) = self.grids.get(map) else {
            tracing::warn!(map, "unknown map");
            return Ok(None);
        };
        let grid = self.grid(map, path)?;
        let (x, y) = self.geo.forward(lon, lat);
        let (px, py) = grid.transform.to_pixel(x, y, grid.nrows);
        if px < 0 || py < 0 {
            return Ok(None);
        }
        Ok(grid
            .get(px as usize, py as usize)
            .filter(|v| *v != grid.nodata && v.is_finite()))
    }
}

/// Writes `pmetpara.txt`: the management count, then one
/// `kcb rawp key` line per management.
pub struct LocalPet;

impl PetHelper for LocalPet {
    fn write_pmetpara(&self, runs_dir: &Path, kcb: f64, rawp: f64, managements: &[String]) -> Result<()> {
        let mut s = format!("{}\n", managements.len());
        for key in managements {
            s.push_str(&format!("{} {} {}\n", kcb, rawp, key));
        }
        atomic_write(&runs_dir.join("pmetpara.txt"), s.as_bytes())
    }
}

impl Providers {
    /// Local providers from the `[providers]` section.
    pub fn local(config: &RunConfig) -> Result<Providers> {
        let p: &ProvidersConfig = &config.providers;
        let geo = Utm::new(p.utm_zone, p.northern);
        Ok(Providers {
            dem: Arc::new(LocalDem { path: p.dem.clone() }),
            delineation: Arc::new(PrecomputedDelineation {
                dir: p.delineation_dir.clone(),
                kind: config.watershed.backend,
                geo,
            }),
            landcover: Arc::new(GridLandcover::open(
                p.landcover_grid.clone(),
                p.management_library.as_deref(),
            )?),
            soils: Arc::new(SqliteSoils::open(
                p.soil_grid.clone(),
                p.soil_db.as_deref(),
                p.soil_db_columns.clone(),
            )?),
            climate: Arc::new(SingleStationClimate {
                file: p.climate_file.clone(),
            }),
            engine: Arc::new(ProcessEngine {
                poll: Duration::from_millis(p.engine_poll_ms.max(1)),
            }),
            maps: Arc::new(LocalMaps::new(p.constant_maps.clone(), p.grid_maps.clone(), geo)),
            pet: Arc::new(LocalPet),
            geo: Arc::new(geo),
            canopy: None,
            channel_geometry: Arc::new(Bieger2015),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    #[test]
    fn test_cli_years_from_header() {
        let text = "5.300000\n   1   0   0\n   Station:  MOSCOW ID\n Latitude Longitude Elevation (m) Obs. Years   Beginning year  Years simulated Command Line:\n    46.73  -116.97         810          40            1           30\n";
        assert_eq!(cli_years(text), Some(30));
        assert_eq!(cli_years("short\n"), None);
    }

    #[test]
    fn test_pmetpara_lists_managements() {
        let tmp = tempfile::tempdir().unwrap();
        LocalPet
            .write_pmetpara(tmp.path(), 0.95, 0.8, &["42".to_string(), "43".to_string()])
            .unwrap();
        let text = fs::read_to_string(tmp.path().join("pmetpara.txt")).unwrap();
        assert_eq!(text, "2\n0.95 0.8 42\n0.95 0.8 43\n");
    }

    #[test]
    fn test_maps_prefer_constants_and_sample_grids() {
        let tmp = tempfile::tempdir().unwrap();
        let geo = Utm::new(11, true);
        let (x, y) = geo.forward(-116.5, 46.7);
        let t = GeoTransform {
            xllcorner: x - 45.0,
            yllcorner: y - 45.0,
            cellsize: 30.0,
        };
        let mut g = Grid::new(3, 3, t, -9999.0);
        g.set(1, 1, 7.5);
        let path = tmp.path().join("kslast.asc");
        g.write_ascii(&path).unwrap();

        let maps = LocalMaps::new(
            BTreeMap::from([("bfcoeff".to_string(), 0.04)]),
            BTreeMap::from([("kslast".to_string(), path)]),
            geo,
        );
        assert_eq!(maps.sample("bfcoeff", 0.0, 0.0).unwrap(), Some(0.04));
        assert_eq!(maps.sample("kslast", -116.5, 46.7).unwrap(), Some(7.5));
        assert_eq!(maps.sample("nothing", -116.5, 46.7).unwrap(), None);
        // far outside the grid
        assert_eq!(maps.sample("kslast", -110.0, 46.7).unwrap(), None);
    }

    #[test]
    fn test_outlet_snaps_to_nearest_channel_cell() {
        let geo = Utm::new(11, true);
        let (x, y) = geo.forward(-116.5, 46.7);
        let t = GeoTransform {
            xllcorner: x - 75.0,
            yllcorner: y - 75.0,
            cellsize: 30.0,
        };
        let mut netful = Grid::new(5, 5, t, 0);
        netful.set(4, 2, 1);
        netful.set(0, 0, 1);
        let backend = PrecomputedDelineation {
            dir: None,
            kind: DelineationBackendKind::Topaz,
            geo,
        };
        let outlet = backend.snap(&netful, -116.5, 46.7).unwrap();
        assert_eq!((outlet.px, outlet.py), (4, 2));
        assert!((outlet.distance - 60.0).abs() < 1e-6);
        assert!(backend.snap(&Grid::new(2, 2, t, 0), -116.5, 46.7).is_err());
    }
}
