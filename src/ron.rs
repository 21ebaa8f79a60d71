//! Run root: project metadata, map geometry and DEM acquisition.

use crate::climate::Climate;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::landuse::Landuse;
use crate::nodb::events::TriggerEvent;
use crate::nodb::prep::TaskEnum;
use crate::nodb::snapshot::atomic_write;
use crate::nodb::{self, NoDb, ControllerKind, READONLY_MARKER, timed};
use crate::observed::Observed;
use crate::providers::{DemRequest, Providers};
use crate::raster::Grid;
use crate::soils::Soils;
use crate::watershed::Watershed;
use crate::wepp::Wepp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub fn dem_path(wd: &Path) -> PathBuf {
    wd.join("dem").join("dem.asc")
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapGeometry {
    /// `[west, south, east, north]` in WGS84 degrees.
    pub extent: [f64; 4],
    /// `[lon, lat]`.
    pub center: [f64; 2],
    pub zoom: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ron {
    #[serde(skip)]
    wd: PathBuf,
    pub name: String,
    pub config_stem: String,
    pub run_id: String,
    pub created: DateTime<Utc>,
    pub map: Option<MapGeometry>,
    pub cellsize: f64,
    pub dem_db: String,
    pub mods: Vec<String>,
    pub locales: Vec<String>,
}

impl NoDb for Ron {
    const KIND: ControllerKind = ControllerKind::Ron;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[("\"_dem_db\"", "\"dem_db\""), ("\"_cellsize\"", "\"cellsize\"")]
    }
}

impl Ron {
    fn new(wd: &Path, stem: &str, run_id: &str, config: &RunConfig) -> Self {
        Ron {
            wd: wd.to_path_buf(),
            name: config.general.name.clone(),
            config_stem: stem.to_string(),
            run_id: run_id.to_string(),
            created: Utc::now(),
            map: None,
            cellsize: config.general.cellsize,
            dem_db: config.general.dem_db.clone(),
            mods: config.general.mods.clone(),
            locales: config.general.locales.clone(),
        }
    }

    /// Creates a run in `wd`: records the configuration, persists every
    /// controller and fires `ON_INIT_FINISH`.
    pub fn init_run(
        wd: &Path,
        stem: &str,
        config: RunConfig,
        providers: Providers,
    ) -> Result<RunContext> {
        timed("ron.init_run", || {
            if Ron::exists(wd) {
                return Err(Error::precondition(format!(
                    "{} already holds a run",
                    wd.display()
                )));
            }
            fs::create_dir_all(wd).at(wd)?;
            atomic_write(
                &wd.join(format!("{}.toml", stem)),
                config.to_toml().as_bytes(),
            )?;

            let ctx = RunContext::new(wd, config, providers)?;
            let cfg = ctx.config();
            let ron = Ron::new(wd, stem, ctx.run_id(), cfg).persist_new()?;
            Watershed::new(wd, &cfg.watershed).persist_new()?;
            Landuse::new(wd, &cfg.landuse).persist_new()?;
            Soils::new(wd, &cfg.soils).persist_new()?;
            Climate::new(wd, &cfg.climate).persist_new()?;
            Wepp::new(wd, cfg).persist_new()?;
            Observed::new(wd).persist_new()?;
            ron.log_status(&format!("initialized run {} from {}", ron.run_id, stem))?;

            ctx.prep().timestamp(TaskEnum::ProjectInit)?;
            ctx.trigger(TriggerEvent::OnInitFinish)?;
            Ok(ctx)
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.wd.join(format!("{}.toml", self.config_stem))
    }

    pub fn dem_path(&self) -> PathBuf {
        dem_path(&self.wd)
    }

    pub fn has_dem(&self) -> bool {
        self.dem_path().exists()
    }

    pub fn has_mod(&self, name: &str) -> bool {
        self.mods.iter().any(|m| m == name)
    }

    pub fn readonly(&self) -> bool {
        nodb::is_readonly(&self.wd)
    }

    fn require_mutable_map(&self, ctx: &RunContext) -> Result<()> {
        if ctx.prep().get_timestamp(TaskEnum::RunWepp).is_some() {
            return Err(Error::precondition(
                "map and DEM are fixed once the simulation has run",
            ));
        }
        Ok(())
    }

    pub fn set_map(&mut self, ctx: &RunContext, extent: [f64; 4], zoom: u32) -> Result<()> {
        self.require_mutable_map(ctx)?;
        let [west, south, east, north] = extent;
        if west >= east || south >= north {
            return Err(Error::validation(format!("degenerate map extent {:?}", extent)));
        }
        self.locked(|ron| {
            ron.map = Some(MapGeometry {
                extent,
                center: [(west + east) / 2.0, (south + north) / 2.0],
                zoom,
            });
            ron.log_status(&format!("map set to {:?}", extent))
        })
    }

    pub fn fetch_dem(&mut self, ctx: &RunContext) -> Result<()> {
        timed("ron.fetch_dem", || {
            self.require_mutable_map(ctx)?;
            let map = self
                .map
                .ok_or_else(|| Error::precondition("the map extent has not been set"))?;
            let dem = ctx.providers().dem.clone();
            self.locked(|ron| {
                let dst = ron.dem_path();
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent).at(parent)?;
                }
                dem.fetch_dem(
                    &DemRequest {
                        extent: map.extent,
                        cellsize: ron.cellsize,
                        dem_db: ron.dem_db.clone(),
                    },
                    &dst,
                )?;
                let grid: Grid<f64> = Grid::read_ascii(&dst)?;
                ron.log_status(&format!("fetched DEM {}x{}", grid.ncols, grid.nrows))
            })?;
            ctx.prep().timestamp(TaskEnum::FetchDem)?;
            ctx.prep().invalidate_downstream(TaskEnum::FetchDem)
        })
    }

    /// Marks the run immutable, or lifts the mark.
    pub fn set_readonly(&self, readonly: bool) -> Result<()> {
        let marker = self.wd.join(READONLY_MARKER);
        if readonly {
            fs::write(&marker, Utc::now().to_rfc3339()).at(&marker)?;
        } else if marker.exists() {
            fs::remove_file(&marker).at(&marker)?;
        }
        tracing::info!(wd = %self.wd.display(), readonly, "readonly marker updated");
        self.log_status(if readonly { "run marked read-only" } else { "run made writable" })
    }
}
