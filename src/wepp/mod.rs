//! The WEPP pipeline: input preparation, the hillslope fan-out, the
//! watershed run and output ingestion.
//!
//! Hillslope runs are independent and go through [`executor::Executor`].
//! The watershed run starts only after every hillslope run succeeded.

pub mod executor;
pub mod interchange;
pub mod loss;
pub mod opts;
pub mod pool;
pub mod prep;
pub mod return_periods;
pub mod totalwatsed;

use crate::climate::Climate;
use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::landuse::Landuse;
use crate::landuse::management::Management;
use crate::nodb::events::TriggerEvent;
use crate::nodb::prep::TaskEnum;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::plugins::disturbed::Disturbed;
use crate::providers::EngineInvocation;
use crate::raster::Grid;
use crate::soils::Soils;
use crate::soils::soil_file::SoilFormat;
use crate::watershed::Watershed;
use chrono::{DateTime, Utc};
use executor::Executor;
use opts::{BaseflowOpts, FrostOpts, PhosphorusOpts, PmetOpts, Resolver, SnowOpts, TcrOpts};
use prep::{ChannelParams, HillslopeSources, PreparedHillslope};
use rayon::prelude::*;
use return_periods::{ReturnPeriodParams, ReturnPeriods};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOSS_NODATA: f64 = -9999.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub finished: DateTime<Utc>,
    pub hillslopes: usize,
    pub sim_years: u32,
    /// Storm directories under `output/` in single-storm batch mode.
    pub storms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wepp {
    #[serde(skip)]
    wd: PathBuf,
    pub run_frost: bool,
    pub run_snow: bool,
    pub run_baseflow: bool,
    pub run_tcr: bool,
    pub run_pmet: bool,
    pub run_wepp_ui: bool,
    phosphorus_opts: PhosphorusOpts,
    baseflow_opts: BaseflowOpts,
    snow_opts: SnowOpts,
    frost_opts: FrostOpts,
    tcr_opts: TcrOpts,
    pmet_opts: PmetOpts,
    /// Baseflow options after map resolution, used by totalwatsed.
    resolved_baseflow: Option<BaseflowOpts>,
    channel_params: Option<ChannelParams>,
    /// Channel routing output interval (s).
    dtchr: Option<u32>,
    /// Restrictive-layer conductivity used per hillslope (topaz id).
    kslast_d: BTreeMap<i32, f64>,
    prepped_hillslopes: usize,
    watershed_prepped: bool,
    last_run: Option<RunSummary>,
}

impl NoDb for Wepp {
    const KIND: ControllerKind = ControllerKind::Wepp;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[
            ("\"_phosphorus_opts\"", "\"phosphorus_opts\""),
            ("\"_baseflow_opts\"", "\"baseflow_opts\""),
        ]
    }
}

impl Wepp {
    pub fn new(wd: &Path, config: &crate::config::RunConfig) -> Self {
        let w = &config.wepp;
        Wepp {
            wd: wd.to_path_buf(),
            run_frost: w.run_frost,
            run_snow: w.run_snow,
            run_baseflow: w.run_baseflow,
            run_tcr: w.run_tcr,
            run_pmet: w.run_pmet,
            run_wepp_ui: w.run_wepp_ui,
            phosphorus_opts: config.phosphorus.opts.clone(),
            baseflow_opts: config.baseflow.clone(),
            snow_opts: config.snow.clone(),
            frost_opts: config.frost.clone(),
            tcr_opts: config.tcr.clone(),
            pmet_opts: config.pmet.clone(),
            resolved_baseflow: None,
            channel_params: None,
            dtchr: None,
            kslast_d: BTreeMap::new(),
            prepped_hillslopes: 0,
            watershed_prepped: false,
            last_run: None,
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("wepp")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.dir().join("runs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir().join("output")
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.dir().join("plots")
    }

    pub fn interchange_dir(&self) -> PathBuf {
        interchange::interchange_dir(&self.output_dir())
    }

    pub fn phosphorus_opts(&self) -> &PhosphorusOpts {
        &self.phosphorus_opts
    }

    pub fn baseflow_opts(&self) -> &BaseflowOpts {
        self.resolved_baseflow.as_ref().unwrap_or(&self.baseflow_opts)
    }

    pub fn channel_params(&self) -> Option<&ChannelParams> {
        self.channel_params.as_ref()
    }

    pub fn dtchr(&self) -> Option<u32> {
        self.dtchr
    }

    pub fn kslast(&self, topaz_id: i32) -> Option<f64> {
        self.kslast_d.get(&topaz_id).copied()
    }

    pub fn last_run(&self) -> Option<&RunSummary> {
        self.last_run.as_ref()
    }

    pub fn has_run(&self) -> bool {
        self.last_run.is_some()
    }

    pub fn require_run(&self) -> Result<()> {
        if self.has_run() {
            Ok(())
        } else {
            Err(Error::precondition("wepp has not been run"))
        }
    }

    /// Replaces the phosphorus options. Rejects negative or non-finite
    /// values; incomplete options are accepted and simply not written.
    pub fn set_phosphorus_opts(&mut self, opts: PhosphorusOpts) -> Result<()> {
        opts.validate()?;
        self.locked(|w| {
            w.phosphorus_opts = opts;
            w.log_status("phosphorus options updated")
        })
    }

    pub fn clean(&mut self) -> Result<()> {
        self.locked(|w| {
            let dir = w.dir();
            if dir.exists() {
                fs::remove_dir_all(&dir).at(&dir)?;
            }
            for d in [w.runs_dir(), w.output_dir()] {
                fs::create_dir_all(&d).at(&d)?;
            }
            w.kslast_d.clear();
            w.prepped_hillslopes = 0;
            w.watershed_prepped = false;
            w.last_run = None;
            Ok(())
        })
    }

    fn resolver_at<'a>(ctx: &'a RunContext, watershed: &Watershed) -> Resolver<'a> {
        let at = watershed
            .outlet()
            .map(|o| (o.actual_lon, o.actual_lat))
            .unwrap_or_else(|| watershed.centroid());
        Resolver {
            maps: ctx.providers().maps.as_ref(),
            at,
        }
    }

    /// Writes the watershed-wide option files into `runs/`.
    fn write_shared_inputs(&mut self, ctx: &RunContext, watershed: &Watershed, landuse: &Landuse) -> Result<()> {
        let runs = self.runs_dir();
        let r = Self::resolver_at(ctx, watershed);
        let write = |name: &str, text: &str| -> Result<()> {
            let path = runs.join(name);
            fs::write(&path, text).at(&path)
        };
        let remove = |name: &str| -> Result<()> {
            let path = runs.join(name);
            if path.exists() {
                fs::remove_file(&path).at(&path)?;
            }
            Ok(())
        };

        match self.phosphorus_opts.contents() {
            Some(text) => write("phosphorus.txt", &text)?,
            None => {
                tracing::info!("phosphorus options incomplete, phosphorus.txt not written");
                remove("phosphorus.txt")?;
            }
        }
        if self.run_snow {
            write("snow.txt", &self.snow_opts.resolve(&r)?.contents())?;
        } else {
            remove("snow.txt")?;
        }
        if self.run_frost {
            write("frost.txt", &self.frost_opts.contents())?;
        } else {
            remove("frost.txt")?;
        }
        if self.run_baseflow {
            let resolved = self.baseflow_opts.resolve(&r)?;
            write("gwcoeff.txt", &resolved.contents())?;
            self.resolved_baseflow = Some(resolved);
        } else {
            remove("gwcoeff.txt")?;
            self.resolved_baseflow = None;
        }
        if self.run_tcr {
            self.tcr_opts.validate()?;
        }
        write("tcr.txt", &self.tcr_opts.contents(self.run_tcr))?;
        if self.run_pmet {
            let (kcb, rawp) = self.pmet_opts.resolve(&r, None)?;
            let keys: Vec<String> = landuse.managements().map(|m| m.key.clone()).collect();
            ctx.providers().pet.write_pmetpara(&runs, kcb, rawp, &keys)?;
        } else {
            remove("pmetpara.txt")?;
        }
        Ok(())
    }

    /// Writes shared option files and every hillslope's inputs.
    pub fn prep_hillslopes(&mut self, ctx: &RunContext) -> Result<()> {
        timed("wepp.prep_hillslopes", || {
            let watershed: Watershed = ctx.load()?;
            watershed.require_abstracted()?;
            let landuse: Landuse = ctx.load()?;
            landuse.require_built()?;
            let soils: Soils = ctx.load()?;
            soils.require_built()?;
            let climate: Climate = ctx.load()?;
            climate.require_built()?;
            let disturbed: Option<Disturbed> = ctx.try_load()?;

            // plugins may fill the phosphorus options; they take the lock themselves
            ctx.trigger(TriggerEvent::PreppingPhosphorus)?;
            self.reload()?;

            let translator = watershed.translator()?;
            let providers = ctx.providers();
            self.locked(|w| {
                let runs = w.runs_dir();
                if runs.exists() {
                    fs::remove_dir_all(&runs).at(&runs)?;
                }
                fs::create_dir_all(&runs).at(&runs)?;
                w.write_shared_inputs(ctx, &watershed, &landuse)?;

                let sources = HillslopeSources {
                    runs_dir: &runs,
                    config: ctx.config(),
                    watershed: &watershed,
                    soils: &soils,
                    landuse: &landuse,
                    climate: &climate,
                    disturbed: disturbed.as_ref(),
                    maps: providers.maps.as_ref(),
                    canopy: providers.canopy.as_deref(),
                };
                let hillslopes: Vec<(i32, i32)> = translator
                    .iter_hillslopes()
                    .filter_map(|t| translator.wepp(t).map(|w| (t, w)))
                    .collect();
                let prepared = hillslopes
                    .par_iter()
                    .map(|(topaz, wepp)| sources.prepare(*topaz, *wepp))
                    .collect::<Result<Vec<PreparedHillslope>>>()?;

                w.kslast_d = prepared
                    .iter()
                    .filter_map(|p| p.kslast.map(|k| (p.topaz_id, k)))
                    .collect();
                let uses_2006 = prepared.iter().any(|p| p.soil_format == SoilFormat::V2006_2);
                let ui = runs.join("wepp_ui.txt");
                if w.run_wepp_ui && !uses_2006 {
                    fs::write(&ui, "").at(&ui)?;
                } else if w.run_wepp_ui {
                    tracing::warn!("2006.2 soils in use, wepp_ui.txt not written");
                }
                w.prepped_hillslopes = prepared.len();
                w.watershed_prepped = false;
                w.log_status(&format!("prepped {} hillslopes", prepared.len()))
            })
        })
    }

    fn resolve_channel_params(ctx: &RunContext, watershed: &Watershed) -> Result<ChannelParams> {
        let cfg = &ctx.config().wepp;
        let r = Resolver {
            maps: ctx.providers().maps.as_ref(),
            at: watershed.centroid(),
        };
        let erodibility = r
            .value(
                "channel_erodibility",
                None,
                cfg.channel_erodibility,
                cfg.channel_erodibility_map.as_deref(),
                Some(ChannelParams::DEFAULT_ERODIBILITY),
            )?
            .unwrap_or(ChannelParams::DEFAULT_ERODIBILITY);
        let critical_shear = r
            .value(
                "channel_critical_shear",
                None,
                cfg.channel_critical_shear,
                cfg.channel_critical_shear_map.as_deref(),
                Some(ChannelParams::DEFAULT_CRITICAL_SHEAR),
            )?
            .unwrap_or(ChannelParams::DEFAULT_CRITICAL_SHEAR);
        let manning_n = cfg.channel_manning_n.unwrap_or(ChannelParams::DEFAULT_MANNING_N);
        for (label, v) in [
            ("channel_erodibility", erodibility),
            ("channel_critical_shear", critical_shear),
            ("channel_manning_n", manning_n),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::validation(format!("{} must be positive, got {}", label, v)));
            }
        }
        Ok(ChannelParams {
            erodibility,
            critical_shear,
            manning_n,
        })
    }

    /// Writes the `pw0.*` watershed inputs, `chan.inp` and `pw0.run`.
    pub fn prep_watershed(&mut self, ctx: &RunContext) -> Result<()> {
        timed("wepp.prep_watershed", || {
            let watershed: Watershed = ctx.load()?;
            watershed.require_abstracted()?;
            let climate: Climate = ctx.load()?;
            climate.require_built()?;
            if self.prepped_hillslopes == 0 {
                return Err(Error::precondition("hillslopes have not been prepped"));
            }
            let params = Self::resolve_channel_params(ctx, &watershed)?;
            let channel_management = ctx.providers().landcover.channel_management()?;
            let translator = watershed.translator()?;
            self.locked(|w| {
                let runs = w.runs_dir();
                let write = |name: &str, text: &str| -> Result<()> {
                    let path = runs.join(name);
                    fs::write(&path, text).at(&path)
                };
                let channels: Vec<_> = watershed.chn_summaries().collect();
                let n_channels = channels.len();
                if n_channels == 0 {
                    return Err(Error::precondition("watershed has no channels"));
                }

                write("pw0.str", &watershed.structure_text())?;
                fs::copy(watershed.channels_slope_path(), runs.join("pw0.slp"))
                    .at(watershed.channels_slope_path())?;
                write("pw0.chn", &prep::render_channel_params(&channels, &params))?;
                write("pw0.imp", "")?;
                prep::channel_soil(n_channels, params.critical_shear).write(&runs.join("pw0.sol"))?;
                let stacked = Management::stack_ofes(
                    "channels",
                    &vec![channel_management.clone(); n_channels],
                )?;
                let stacked = if climate.sim_years > 1 {
                    stacked.build_multiple_year(climate.sim_years)
                } else {
                    stacked
                };
                stacked.write(&runs.join("pw0.man"))?;
                let cli = climate
                    .watershed_cli()
                    .ok_or_else(|| Error::precondition("climate has not been built"))?;
                fs::copy(climate.cli_path(cli), runs.join("pw0.cli")).at(climate.cli_path(cli))?;

                let (ichout, dtchr) = prep::channel_output_control(
                    climate.is_single_storm(),
                    ctx.config().wepp.dtchr_override,
                );
                let interest: Vec<i32> = ctx
                    .config()
                    .wepp
                    .chn_topaz_ids_of_interest
                    .iter()
                    .filter_map(|t| translator.wepp(*t))
                    .collect();
                write("chan.inp", &prep::render_chan_inp(ichout, dtchr, &interest))?;
                write(
                    "pw0.run",
                    &prep::render_watershed_run(
                        translator.hillslope_count(),
                        climate.sim_years,
                        climate.is_single_storm(),
                    ),
                )?;
                w.channel_params = Some(params);
                w.dtchr = Some(dtchr);
                w.watershed_prepped = true;
                w.log_status(&format!("prepped watershed with {} channels", n_channels))
            })?;
            ctx.trigger(TriggerEvent::WeppPrepWatershedComplete)?;
            ctx.prep().timestamp(TaskEnum::PrepWepp)
        })
    }

    fn executor<'a>(&self, ctx: &'a RunContext) -> Executor<'a> {
        let cfg = &ctx.config().wepp;
        Executor {
            engine: ctx.providers().engine.as_ref(),
            workers: pool::worker_count(cfg.max_workers),
            heartbeat: Duration::from_secs(cfg.heartbeat_secs.max(1)),
            require_banner: cfg.require_completion_banner,
            progress: std::io::stderr().is_terminal(),
        }
    }

    fn invocation(&self, ctx: &RunContext, stem: &str) -> EngineInvocation {
        let runs = self.runs_dir();
        EngineInvocation {
            label: stem.to_string(),
            binary: ctx.config().wepp.bin.clone(),
            run_file: runs.join(format!("{}.run", stem)),
            cwd: runs.clone(),
            log_file: runs.join(format!("{}.err", stem)),
        }
    }

    fn hillslope_invocations(&self, ctx: &RunContext) -> Vec<EngineInvocation> {
        (1..=self.prepped_hillslopes as i32)
            .map(|w| self.invocation(ctx, &prep::hill_stem(w)))
            .collect()
    }

    /// Fans out every hillslope run. The first failure cancels the rest.
    pub fn run_hillslopes(&mut self, ctx: &RunContext) -> Result<()> {
        timed("wepp.run_hillslopes", || {
            if self.prepped_hillslopes == 0 {
                return Err(Error::precondition("hillslopes have not been prepped"));
            }
            let invocations = self.hillslope_invocations(ctx);
            let executor = self.executor(ctx);
            self.locked(|w| {
                executor.run_all("hillslopes", &invocations)?;
                w.log_status(&format!("ran {} hillslopes", invocations.len()))
            })
        })
    }

    /// Runs the watershed simulation and moves every `.out` from `runs/`
    /// into `dest` (the output directory unless a storm subdirectory).
    pub fn run_watershed(&mut self, ctx: &RunContext) -> Result<()> {
        let dest = self.output_dir();
        self.run_watershed_into(ctx, &dest)
    }

    fn run_watershed_into(&mut self, ctx: &RunContext, dest: &Path) -> Result<()> {
        timed("wepp.run_watershed", || {
            if !self.watershed_prepped {
                return Err(Error::precondition("watershed inputs have not been prepped"));
            }
            let invocation = self.invocation(ctx, "pw0");
            let executor = self.executor(ctx);
            self.locked(|w| {
                fs::create_dir_all(w.output_dir()).at(w.output_dir())?;
                executor.run_single(&invocation)?;
                let moved = move_outputs(&w.runs_dir(), dest)?;
                if dest != w.output_dir().as_path() {
                    for name in ["loss_pw0.txt", "ebe_pw0.txt", "chnwb_pw0.txt"] {
                        let src = w.output_dir().join(name);
                        if src.exists() {
                            fs::rename(&src, dest.join(name)).at(&src)?;
                        }
                    }
                }
                w.log_status(&format!("watershed run complete, {} outputs moved", moved))
            })
        })
    }

    /// Parses the outputs into interchange tables, the daily water balance
    /// and the soil-loss rasters.
    pub fn ingest(&self, ctx: &RunContext) -> Result<()> {
        timed("wepp.ingest", || {
            let watershed: Watershed = ctx.load()?;
            let translator = watershed.translator()?;
            let out = self.output_dir();
            let ix = self.interchange_dir();
            fs::create_dir_all(&ix).at(&ix)?;

            let report = loss::read(&out.join("loss_pw0.txt"))?;
            interchange::write_loss(&ix, &report)?;

            let wepp_ids: Vec<i32> = (1..=translator.hillslope_count() as i32).collect();
            let total_area: f64 = watershed.sub_summaries().map(|s| s.area).sum();
            let daily = totalwatsed::build(&out, &wepp_ids, total_area, self.baseflow_opts())?;
            interchange::write_totalwatsed(&ix, &daily)?;
            interchange::write_readme(&ix)?;

            // kg/ha per hillslope
            let mut loss_by_topaz = BTreeMap::new();
            for row in &report.hillslopes {
                let Some(topaz) = translator.top(row.wepp_id) else { continue };
                if let Some(s) = watershed.sub_summary(topaz) {
                    if s.area > 0.0 {
                        loss_by_topaz.insert(topaz, row.soil_loss / (s.area / 10_000.0));
                    }
                }
            }
            let subwta = watershed.subwta()?;
            let raster = loss_raster(&subwta, &loss_by_topaz);
            let plots = self.plots_dir();
            fs::create_dir_all(&plots).at(&plots)?;
            raster.write_ascii(&plots.join("loss.asc"))?;
            ctx.providers()
                .geo
                .reproject_to_wgs(&raster)?
                .write_ascii(&plots.join("loss.WGS.asc"))?;
            tracing::info!(days = daily.len(), hillslopes = report.hillslopes.len(), "ingested outputs");
            Ok(())
        })
    }

    fn ingest_storm(&self, dest: &Path) -> Result<()> {
        let report = loss::read(&dest.join("loss_pw0.txt"))?;
        let ix = interchange::interchange_dir(dest);
        interchange::write_loss(&ix, &report)?;
        interchange::write_readme(&ix)
    }

    /// Full pipeline: prep, hillslope fan-out, watershed run, ingestion.
    /// In single-storm batch mode the runs repeat once per storm.
    pub fn run(&mut self, ctx: &RunContext) -> Result<()> {
        timed("wepp.run", || {
            self.prep_hillslopes(ctx)?;
            self.prep_watershed(ctx)?;
            let climate: Climate = ctx.load()?;
            let mut storms = Vec::new();

            if climate.mode == crate::climate::ClimateMode::SingleStormBatch {
                for storm in climate.storms() {
                    tracing::info!(storm = %storm.name, "running design storm");
                    let cli = climate.cli_path(&storm.cli_fn);
                    let runs = self.runs_dir();
                    for w in 1..=self.prepped_hillslopes as i32 {
                        let dst = runs.join(format!("{}.cli", prep::hill_stem(w)));
                        fs::copy(&cli, &dst).at(&cli)?;
                    }
                    fs::copy(&cli, runs.join("pw0.cli")).at(&cli)?;
                    let dest = self.output_dir().join(&storm.name);
                    fs::create_dir_all(&dest).at(&dest)?;
                    self.run_hillslopes(ctx)?;
                    self.run_watershed_into(ctx, &dest)?;
                    self.ingest_storm(&dest)?;
                    storms.push(storm.name.clone());
                }
            } else {
                self.run_hillslopes(ctx)?;
                self.run_watershed(ctx)?;
                self.ingest(ctx)?;
            }

            let hillslopes = self.prepped_hillslopes;
            self.locked(|w| {
                w.last_run = Some(RunSummary {
                    finished: Utc::now(),
                    hillslopes,
                    sim_years: climate.sim_years,
                    storms,
                });
                w.log_status("run complete")
            })?;
            ctx.prep().timestamp(TaskEnum::RunWepp)?;
            ctx.prep().invalidate_downstream(TaskEnum::RunWepp)
        })
    }

    pub fn loss_report(&self) -> Result<loss::LossReport> {
        self.require_run()?;
        loss::read(&self.output_dir().join("loss_pw0.txt"))
    }

    /// Return periods from the outlet event file, memoized per parameter set.
    pub fn return_periods(&self, ctx: &RunContext, params: &ReturnPeriodParams) -> Result<ReturnPeriods> {
        self.require_run()?;
        let ix = self.interchange_dir();
        fs::create_dir_all(&ix).at(&ix)?;
        let result = return_periods::cached(
            &self.output_dir().join("ebe_pw0.txt"),
            &ix.join(return_periods::CACHE_FILE),
            params,
        )?;
        ctx.prep().timestamp(TaskEnum::ReturnPeriods)?;
        Ok(result)
    }
}

/// Moves every `*.out` file in `src` into `dest`; returns how many moved.
pub fn move_outputs(src: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).at(dest)?;
    let mut moved = 0;
    for entry in fs::read_dir(src).at(src)? {
        let path = entry.at(src)?.path();
        if path.extension().is_some_and(|e| e == "out") {
            if let Some(name) = path.file_name() {
                fs::rename(&path, dest.join(name)).at(&path)?;
                moved += 1;
            }
        }
    }
    Ok(moved)
}

/// Paints per-hillslope values onto the subcatchment grid.
pub fn loss_raster(subwta: &Grid<i32>, values: &BTreeMap<i32, f64>) -> Grid<f64> {
    subwta.map(LOSS_NODATA, |topaz| values.get(&topaz).copied().unwrap_or(LOSS_NODATA))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    #[test]
    fn test_move_outputs_only_takes_out_files() {
        let tmp = tempfile::tempdir().unwrap();
        let runs = tmp.path().join("runs");
        let out = tmp.path().join("output");
        fs::create_dir_all(&runs).unwrap();
        for f in ["p1.loss.out", "p1.wat.out", "p1.run", "pw0.chan.out", "p1.err"] {
            fs::write(runs.join(f), "x").unwrap();
        }
        assert_eq!(move_outputs(&runs, &out).unwrap(), 3);
        assert!(out.join("pw0.chan.out").exists());
        assert!(runs.join("p1.run").exists());
        assert!(!runs.join("p1.wat.out").exists());
    }

    #[test]
    fn test_loss_raster_marks_channels_nodata() {
        let t = GeoTransform {
            xllcorner: 0.0,
            yllcorner: 0.0,
            cellsize: 30.0,
        };
        let subwta = Grid::from_rows(vec![vec![22, 24], vec![23, 0]], t, 0).unwrap();
        let values = BTreeMap::from([(22, 5.0), (23, 7.5)]);
        let r = loss_raster(&subwta, &values);
        assert_eq!(r.get(0, 0), Some(5.0));
        assert_eq!(r.get(1, 0), Some(LOSS_NODATA));
        assert_eq!(r.get(0, 1), Some(7.5));
    }

    #[test]
    fn test_new_copies_configured_options() {
        let mut cfg = crate::config::RunConfig::default();
        cfg.phosphorus.opts.surf_runoff = Some(0.1);
        cfg.wepp.run_tcr = true;
        let w = Wepp::new(Path::new("/run"), &cfg);
        assert_eq!(w.phosphorus_opts().surf_runoff, Some(0.1));
        assert!(w.run_tcr);
        assert!(!w.has_run());
        assert_eq!(w.output_dir(), PathBuf::from("/run/wepp/output"));
    }
}
