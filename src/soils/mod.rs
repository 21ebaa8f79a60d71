//! Soils controller: one mapunit per hillslope and one engine soil file per
//! unique mapunit.

pub mod soil_file;
pub mod sqlite_db;

use crate::catalog::{self, CatalogRow, Column, ColumnarTable, get_f64, get_i32, get_opt_f64, get_str};
use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::landuse::{coverage, most_common_key};
use crate::nodb::events::TriggerEvent;
use crate::nodb::prep::TaskEnum;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::providers::{SoilData, SoilRequest, SoilSource};
use crate::raster::{self, Grid};
use crate::translator::is_channel_topaz;
use crate::watershed::Watershed;
use crate::wepp::pool::{self, PoolKind};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use soil_file::{SoilFile, SoilProfile, SoilReplacements};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const CATALOG_NAME: &str = "soils.parquet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilDb {
    Ssurgo,
    Statsgo,
    Isric,
    Esdac,
    Asris,
}

impl SoilDb {
    pub fn name(&self) -> &'static str {
        match self {
            SoilDb::Ssurgo => "ssurgo",
            SoilDb::Statsgo => "statsgo",
            SoilDb::Isric => "isric",
            SoilDb::Esdac => "esdac",
            SoilDb::Asris => "asris",
        }
    }

    /// Databases tried for a locale, finest first.
    pub fn chain_for_locale(locale: &str) -> &'static [SoilDb] {
        match locale.to_ascii_lowercase().as_str() {
            "us" => &[SoilDb::Ssurgo, SoilDb::Statsgo],
            "eu" => &[SoilDb::Esdac, SoilDb::Isric],
            "au" => &[SoilDb::Asris, SoilDb::Isric],
            _ => &[SoilDb::Isric],
        }
    }
}

impl fmt::Display for SoilDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoilsMode {
    #[default]
    Gridded,
    Single,
    SingleDb,
    RredUnburned,
    RredBurned,
    SpatialApi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilSummary {
    pub mukey: String,
    /// File name under `soils/`.
    pub soil_fn: String,
    pub build_date: String,
    pub desc: String,
    /// Total hillslope area (m^2) assigned this mapunit.
    pub area: f64,
    pub pct_coverage: f64,
    pub clay: Option<f64>,
    pub sand: Option<f64>,
    pub bd: Option<f64>,
    pub ll: Option<f64>,
    pub texture: Option<String>,
}

impl SoilSummary {
    fn from_file(mukey: &str, file: &SoilFile, ll: Option<f64>) -> Self {
        SoilSummary {
            mukey: mukey.to_string(),
            soil_fn: format!("{}.sol", mukey),
            build_date: Utc::now().to_rfc3339(),
            desc: file.ofes.first().map(|o| o.name.clone()).unwrap_or_default(),
            area: 0.0,
            pct_coverage: 0.0,
            clay: file.clay(),
            sand: file.sand(),
            bd: file.bd(),
            ll,
            texture: file.simple_texture().map(str::to_string),
        }
    }
}

/// One `soils.parquet` row.
#[derive(Debug, Clone, PartialEq)]
pub struct SoilRow {
    pub topaz_id: i32,
    pub wepp_id: i32,
    pub mukey: String,
    pub desc: String,
    pub area: f64,
    pub pct_coverage: f64,
    pub clay: Option<f64>,
    pub sand: Option<f64>,
    pub bd: Option<f64>,
    pub ll: Option<f64>,
    pub texture: String,
}

impl CatalogRow for SoilRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("topaz_id", Column::I32(rows.iter().map(|r| r.topaz_id).collect()))
            .with("wepp_id", Column::I32(rows.iter().map(|r| r.wepp_id).collect()))
            .with("mukey", Column::Str(rows.iter().map(|r| r.mukey.clone()).collect()))
            .with("desc", Column::Str(rows.iter().map(|r| r.desc.clone()).collect()))
            .with("area", Column::F64(rows.iter().map(|r| r.area).collect()))
            .with("pct_coverage", Column::F64(rows.iter().map(|r| r.pct_coverage).collect()))
            .with("clay", Column::OptF64(rows.iter().map(|r| r.clay).collect()))
            .with("sand", Column::OptF64(rows.iter().map(|r| r.sand).collect()))
            .with("bd", Column::OptF64(rows.iter().map(|r| r.bd).collect()))
            .with("ll", Column::OptF64(rows.iter().map(|r| r.ll).collect()))
            .with("texture", Column::Str(rows.iter().map(|r| r.texture.clone()).collect()))
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        Ok(SoilRow {
            topaz_id: get_i32(batch, "topaz_id", row)?,
            wepp_id: get_i32(batch, "wepp_id", row)?,
            mukey: get_str(batch, "mukey", row)?,
            desc: get_str(batch, "desc", row)?,
            area: get_f64(batch, "area", row)?,
            pct_coverage: get_f64(batch, "pct_coverage", row)?,
            clay: get_opt_f64(batch, "clay", row)?,
            sand: get_opt_f64(batch, "sand", row)?,
            bd: get_opt_f64(batch, "bd", row)?,
            ll: get_opt_f64(batch, "ll", row)?,
            texture: get_str(batch, "texture", row)?,
        })
    }
}

/// Settings the soil-file workers need, copied out of the controller.
#[derive(Debug, Clone)]
struct FileSettings {
    dir: PathBuf,
    initial_sat: f64,
    ksflag: bool,
    max_soil_depth: Option<f64>,
}

impl FileSettings {
    fn materialize(&self, profile: &SoilProfile) -> Result<SoilSummary> {
        let mut file = SoilFile::from_profile(profile, self.initial_sat, self.ksflag)?;
        if let (Some(depth), false) = (self.max_soil_depth, file.is_short_form()) {
            file.clip_soil_depth(depth);
        }
        file.write(&self.dir.join(format!("{}.sol", profile.mukey)))?;
        Ok(SoilSummary::from_file(&profile.mukey, &file, profile.ll))
    }
}

/// Fetches, completes and writes one mapunit; `None` when it is unusable.
fn prepare_mapunit(
    source: &dyn SoilSource,
    settings: &FileSettings,
    db: SoilDb,
    mukey: &str,
) -> Result<Option<SoilSummary>> {
    let Some(mut profile) = source.profile(db, mukey)? else {
        return Ok(None);
    };
    if !profile.is_water() && !profile.is_urban() {
        source.fill_missing(&mut profile)?;
    }
    if !profile.is_complete() {
        tracing::debug!(mukey, db = db.name(), "mapunit is incomplete");
        return Ok(None);
    }
    settings.materialize(&profile).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Soils {
    #[serde(skip)]
    wd: PathBuf,
    pub mode: SoilsMode,
    pub single_mukey: Option<String>,
    pub single_dbselection: Option<String>,
    pub soils_library: Option<PathBuf>,
    pub initial_sat: f64,
    pub ksflag: bool,
    pub max_soil_depth: Option<f64>,
    pub db_used: Option<SoilDb>,
    domsoil_d: BTreeMap<i32, String>,
    /// Assignment as built, before any specialization.
    ssurgo_domsoil_d: BTreeMap<i32, String>,
    ssurgo_soils: BTreeMap<String, SoilSummary>,
    soils: BTreeMap<String, SoilSummary>,
    /// Area-weighted clay content (%) of the watershed.
    pub clay_pct: Option<f64>,
    /// Area-weighted liquid limit (%) of the watershed.
    pub liquid_limit: Option<f64>,
}

impl NoDb for Soils {
    const KIND: ControllerKind = ControllerKind::Soils;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[
            ("\"_domsoil_d\"", "\"domsoil_d\""),
            ("\"_ssurgo_domsoil_d\"", "\"ssurgo_domsoil_d\""),
        ]
    }
}

impl Soils {
    pub fn new(wd: &Path, cfg: &crate::config::SoilsConfig) -> Self {
        Soils {
            wd: wd.to_path_buf(),
            mode: cfg.mode,
            single_mukey: cfg.single_mukey.clone(),
            single_dbselection: cfg.single_dbselection.clone(),
            soils_library: cfg.soils_library.clone(),
            initial_sat: cfg.initial_sat,
            ksflag: cfg.ksflag,
            max_soil_depth: cfg.max_soil_depth,
            db_used: None,
            domsoil_d: BTreeMap::new(),
            ssurgo_domsoil_d: BTreeMap::new(),
            ssurgo_soils: BTreeMap::new(),
            soils: BTreeMap::new(),
            clay_pct: None,
            liquid_limit: None,
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("soils")
    }

    pub fn parquet_path(wd: &Path) -> PathBuf {
        wd.join("soils").join(CATALOG_NAME)
    }

    pub fn soil_path(&self, mukey: &str) -> PathBuf {
        self.dir().join(format!("{}.sol", mukey))
    }

    pub fn domsoil_d(&self) -> &BTreeMap<i32, String> {
        &self.domsoil_d
    }

    pub fn ssurgo_domsoil_d(&self) -> &BTreeMap<i32, String> {
        &self.ssurgo_domsoil_d
    }

    pub fn mukey(&self, topaz_id: i32) -> Option<&str> {
        self.domsoil_d.get(&topaz_id).map(String::as_str)
    }

    pub fn summaries(&self) -> impl Iterator<Item = &SoilSummary> {
        self.soils.values()
    }

    pub fn summary(&self, mukey: &str) -> Option<&SoilSummary> {
        self.soils.get(mukey)
    }

    /// Pre-specialization summary of a mapunit.
    pub fn base_summary(&self, mukey: &str) -> Option<&SoilSummary> {
        self.ssurgo_soils.get(mukey)
    }

    pub fn is_built(&self) -> bool {
        !self.domsoil_d.is_empty() && !self.soils.is_empty()
    }

    pub fn require_built(&self) -> Result<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(Error::precondition("soils have not been built"))
        }
    }

    /// Soil file for a hillslope's current mapunit.
    pub fn hillslope_soil(&self, topaz_id: i32) -> Result<SoilFile> {
        let mukey = self
            .mukey(topaz_id)
            .ok_or_else(|| Error::precondition(format!("hillslope {} has no soil", topaz_id)))?;
        SoilFile::read(&self.soil_path(mukey))
    }

    pub fn clean(&mut self) -> Result<()> {
        let dir = self.dir();
        self.locked(|soils| {
            if dir.exists() {
                fs::remove_dir_all(&dir).at(&dir)?;
            }
            fs::create_dir_all(&dir).at(&dir)?;
            soils.domsoil_d.clear();
            soils.ssurgo_domsoil_d.clear();
            soils.ssurgo_soils.clear();
            soils.soils.clear();
            soils.clay_pct = None;
            soils.liquid_limit = None;
            soils.log_status("cleaned soils")
        })
    }

    /// Assigns mapunits, writes soil files and fires `SOILS_BUILD_COMPLETE`.
    ///
    /// Files are built in a staging directory that replaces `soils/` only
    /// once every mapunit has been prepared; a failed build leaves the
    /// previous soils untouched.
    pub fn build(&mut self, ctx: &RunContext) -> Result<()> {
        timed("soils.build", || {
            let watershed: Watershed = ctx.load()?;
            watershed.require_abstracted()?;
            let hillslopes: Vec<i32> = watershed.sub_summaries().map(|s| s.topaz_id).collect();
            let locale = ctx
                .config()
                .general
                .locales
                .first()
                .cloned()
                .unwrap_or_else(|| "us".to_string());
            let workers = pool::worker_count(ctx.config().wepp.max_workers);
            let heartbeat = Duration::from_secs(ctx.config().wepp.soil_prep_heartbeat_secs.max(1));
            let source = ctx.providers().soils.clone();

            let staging = self.staging_dir();
            if staging.exists() {
                fs::remove_dir_all(&staging).at(&staging)?;
            }
            fs::create_dir_all(&staging).at(&staging)?;
            let settings = FileSettings {
                dir: staging.clone(),
                initial_sat: self.initial_sat,
                ksflag: self.ksflag,
                max_soil_depth: self.max_soil_depth,
            };

            let built = match self.mode {
                SoilsMode::Single => self.build_single(&*source, &settings, &locale, &hillslopes),
                SoilsMode::SingleDb => self.build_single_db(&settings, &hillslopes),
                mode => {
                    let request = Gridded {
                        source: source.clone(),
                        settings: &settings,
                        watershed: &watershed,
                        hillslopes: &hillslopes,
                        workers,
                        heartbeat,
                    };
                    request.run(mode, &locale)
                }
            };
            let committed = built.and_then(|(db, domsoil, summaries)| {
                self.locked(|soils| {
                    soils.db_used = db;
                    soils.ssurgo_domsoil_d = domsoil.clone();
                    soils.ssurgo_soils = summaries.clone();
                    soils.domsoil_d = domsoil;
                    soils.soils = summaries;
                    soils.update_coverage(&watershed);
                    catalog::write_rows(&staging.join(CATALOG_NAME), &soils.rows(&watershed)?)?;

                    let dir = soils.dir();
                    if dir.exists() {
                        fs::remove_dir_all(&dir).at(&dir)?;
                    }
                    fs::rename(&staging, &dir).at(&staging)?;
                    soils.log_status(&format!(
                        "assigned {} hillslopes to {} mapunits",
                        soils.domsoil_d.len(),
                        soils.soils.len()
                    ))
                })
            });
            if let Err(e) = committed {
                if staging.exists() {
                    fs::remove_dir_all(&staging).at(&staging)?;
                }
                self.reload()?;
                return Err(e);
            }

            ctx.prep().timestamp(TaskEnum::BuildSoils)?;
            ctx.trigger(TriggerEvent::SoilsBuildComplete)?;
            self.reload()?;
            ctx.prep().invalidate_downstream(TaskEnum::BuildSoils)
        })
    }

    fn staging_dir(&self) -> PathBuf {
        self.wd.join("soils.tmp")
    }

    #[allow(clippy::type_complexity)]
    fn build_single(
        &self,
        source: &dyn SoilSource,
        settings: &FileSettings,
        locale: &str,
        hillslopes: &[i32],
    ) -> Result<(Option<SoilDb>, BTreeMap<i32, String>, BTreeMap<String, SoilSummary>)> {
        let mukey = self
            .single_mukey
            .clone()
            .ok_or_else(|| Error::validation("single soils mode needs a mapunit key"))?;
        for db in SoilDb::chain_for_locale(locale) {
            if let Some(summary) = prepare_mapunit(source, settings, *db, &mukey)? {
                let domsoil = hillslopes.iter().map(|t| (*t, mukey.clone())).collect();
                return Ok((Some(*db), domsoil, BTreeMap::from([(mukey, summary)])));
            }
        }
        Err(Error::provider(
            "soils",
            format!("mapunit {} is not usable in any {} database", mukey, locale),
        ))
    }

    #[allow(clippy::type_complexity)]
    fn build_single_db(
        &self,
        settings: &FileSettings,
        hillslopes: &[i32],
    ) -> Result<(Option<SoilDb>, BTreeMap<i32, String>, BTreeMap<String, SoilSummary>)> {
        let (Some(library), Some(selection)) = (&self.soils_library, &self.single_dbselection) else {
            return Err(Error::validation(
                "single_db soils mode needs a soils library and a selection",
            ));
        };
        let src = library.join(selection);
        let mut file = SoilFile::read(&src)?;
        let mukey = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::validation(format!("bad soil selection {}", selection)))?;
        file.set_initial_sat(settings.initial_sat);
        if let (Some(depth), false) = (settings.max_soil_depth, file.is_short_form()) {
            file.clip_soil_depth(depth);
        }
        file.write(&settings.dir.join(format!("{}.sol", mukey)))?;
        let summary = SoilSummary::from_file(&mukey, &file, None);
        let domsoil = hillslopes.iter().map(|t| (*t, mukey.clone())).collect();
        Ok((None, domsoil, BTreeMap::from([(mukey, summary)])))
    }

    fn update_coverage(&mut self, watershed: &Watershed) {
        let areas: BTreeMap<i32, f64> = watershed
            .sub_summaries()
            .map(|s| (s.topaz_id, s.area))
            .collect();
        let cover = coverage(&self.domsoil_d, &areas);
        for (mukey, summary) in self.soils.iter_mut() {
            let (area, pct) = cover.get(mukey).copied().unwrap_or((0.0, 0.0));
            summary.area = area;
            summary.pct_coverage = pct;
        }

        let weighted = |f: &dyn Fn(&SoilSummary) -> Option<f64>| -> Option<f64> {
            let (mut sum, mut weight) = (0.0, 0.0);
            for (topaz, mukey) in &self.domsoil_d {
                let (Some(v), Some(a)) = (self.soils.get(mukey).and_then(f), areas.get(topaz)) else {
                    continue;
                };
                sum += v * a;
                weight += a;
            }
            (weight > 0.0).then(|| sum / weight)
        };
        self.clay_pct = weighted(&|s| s.clay);
        self.liquid_limit = weighted(&|s| s.ll);
    }

    pub fn rows(&self, watershed: &Watershed) -> Result<Vec<SoilRow>> {
        let translator = watershed.translator()?;
        Ok(self
            .domsoil_d
            .iter()
            .map(|(topaz, mukey)| {
                let summary = self.soils.get(mukey);
                SoilRow {
                    topaz_id: *topaz,
                    wepp_id: translator.wepp(*topaz).unwrap_or(0),
                    mukey: mukey.clone(),
                    desc: summary.map(|s| s.desc.clone()).unwrap_or_default(),
                    area: watershed.sub_summary(*topaz).map(|s| s.area).unwrap_or(0.0),
                    pct_coverage: summary.map(|s| s.pct_coverage).unwrap_or(0.0),
                    clay: summary.and_then(|s| s.clay),
                    sand: summary.and_then(|s| s.sand),
                    bd: summary.and_then(|s| s.bd),
                    ll: summary.and_then(|s| s.ll),
                    texture: summary.and_then(|s| s.texture.clone()).unwrap_or_default(),
                }
            })
            .collect())
    }

    fn write_catalog(&self, watershed: &Watershed) -> Result<()> {
        catalog::write_rows(&Self::parquet_path(&self.wd), &self.rows(watershed)?)
    }

    /// Replaces each hillslope's mapunit with a specialized one.
    ///
    /// `plan` maps a hillslope to its specialized key and the replacements to
    /// apply. Specialized files are always derived from the as-built
    /// assignment and files, so applying the same plan twice yields the same
    /// assignment and the same files. Hillslopes missing from `plan` keep
    /// their as-built mapunit.
    pub fn apply_specialization(
        &mut self,
        ctx: &RunContext,
        plan: &BTreeMap<i32, (String, SoilReplacements)>,
    ) -> Result<usize> {
        let watershed: Watershed = ctx.load()?;
        self.locked(|soils| {
            let mut domsoil = BTreeMap::new();
            let mut summaries: BTreeMap<String, SoilSummary> = BTreeMap::new();
            let mut written: BTreeSet<String> = BTreeSet::new();
            for (topaz, base) in &soils.ssurgo_domsoil_d {
                let base_summary = soils.ssurgo_soils.get(base).ok_or_else(|| {
                    Error::precondition(format!("no as-built summary for mapunit {}", base))
                })?;
                let Some((key, replacements)) = plan.get(topaz).filter(|(k, _)| k != base) else {
                    domsoil.insert(*topaz, base.clone());
                    summaries.entry(base.clone()).or_insert_with(|| base_summary.clone());
                    continue;
                };
                if written.insert(key.clone()) {
                    let mut file = SoilFile::read(&soils.soil_path(base))?;
                    file.apply_replacements(replacements);
                    file.comments.push(format!("specialized from {}", base));
                    file.write(&soils.soil_path(key))?;
                    let mut summary = base_summary.clone();
                    summary.mukey = key.clone();
                    summary.soil_fn = format!("{}.sol", key);
                    summaries.insert(key.clone(), summary);
                }
                domsoil.insert(*topaz, key.clone());
            }
            let changed = domsoil
                .iter()
                .filter(|(t, k)| soils.domsoil_d.get(t) != Some(k))
                .count();
            soils.domsoil_d = domsoil;
            soils.soils = summaries;
            soils.update_coverage(&watershed);
            soils.write_catalog(&watershed)?;
            soils.log_status(&format!(
                "specialized {} mapunits ({} hillslopes changed)",
                written.len(),
                changed
            ))?;
            Ok(changed)
        })
    }
}

struct Gridded<'a> {
    source: Arc<dyn SoilSource>,
    settings: &'a FileSettings,
    watershed: &'a Watershed,
    hillslopes: &'a [i32],
    workers: usize,
    heartbeat: Duration,
}

impl Gridded<'_> {
    #[allow(clippy::type_complexity)]
    fn run(
        &self,
        mode: SoilsMode,
        locale: &str,
    ) -> Result<(Option<SoilDb>, BTreeMap<i32, String>, BTreeMap<String, SoilSummary>)> {
        let subwta = self.watershed.subwta()?;
        let centroids = self.watershed.centroids();
        for db in SoilDb::chain_for_locale(locale) {
            let data = self.source.fetch(&SoilRequest {
                wd: self.watershed.wd(),
                mode,
                db: *db,
                subwta: &subwta,
                centroids: &centroids,
            })?;
            let assigned = self.assigned_keys(data, &subwta, *db)?;
            let unique: Vec<String> = assigned.values().cloned().collect::<BTreeSet<_>>().into_iter().collect();

            let source = self.source.clone();
            let settings = self.settings;
            let db_ = *db;
            let prepared = pool::map_degrading(
                "soils.prep",
                &unique,
                self.workers,
                self.heartbeat,
                PoolKind::Dedicated,
                |mukey| prepare_mapunit(&*source, settings, db_, mukey),
            )?;
            let usable: BTreeMap<String, SoilSummary> = unique
                .into_iter()
                .zip(prepared)
                .filter_map(|(k, s)| s.map(|s| (k, s)))
                .collect();
            if usable.is_empty() {
                tracing::warn!(db = db.name(), "no usable mapunits, trying the next database");
                continue;
            }

            let usable_keys = assigned.values().filter(|k| usable.contains_key(*k));
            let fallback = most_common_key(usable_keys)
                .ok_or_else(|| Error::provider("soils", "no usable mapunit assignment"))?;
            let mut domsoil = BTreeMap::new();
            for topaz in self.hillslopes {
                let key = match assigned.get(topaz).filter(|k| usable.contains_key(*k)) {
                    Some(k) => k.clone(),
                    None => {
                        tracing::warn!(topaz_id = topaz, "no usable mapunit, using {}", fallback);
                        fallback.clone()
                    }
                };
                domsoil.insert(*topaz, key);
            }
            let used: BTreeSet<&String> = domsoil.values().collect();
            let summaries = usable
                .iter()
                .filter(|(k, _)| used.contains(k))
                .map(|(k, s)| (k.clone(), s.clone()))
                .collect();
            return Ok((Some(*db), domsoil, summaries));
        }
        Err(Error::provider(
            "soils",
            format!("no usable mapunits in any {} soil database", locale),
        ))
    }

    fn assigned_keys(&self, data: SoilData, subwta: &Grid<i32>, db: SoilDb) -> Result<BTreeMap<i32, String>> {
        Ok(match data {
            SoilData::Points(keys) => keys,
            SoilData::Raster(grid) => {
                grid.write_ascii(&self.settings.dir.join(format!("{}.asc", db.name())))?;
                raster::polygon_mode(subwta, &grid, &[], is_channel_topaz)?
                    .into_iter()
                    .filter_map(|(t, v)| v.map(|v| (t, v.to_string())))
                    .collect()
            }
        })
    }
}

/// Soil row for a hillslope, from `soils.parquet` or the controller.
pub fn soil_summary(wd: &Path, topaz_id: i32) -> Result<Option<SoilRow>> {
    if let Some(row) = catalog::lookup(&Soils::parquet_path(wd), topaz_id)? {
        return Ok(Some(row));
    }
    let soils = Soils::get_instance(wd)?;
    let watershed = Watershed::get_instance(wd)?;
    Ok(soils
        .rows(&watershed)?
        .into_iter()
        .find(|r| r.topaz_id == topaz_id))
}
