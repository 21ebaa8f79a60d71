//! Landuse controller: one landcover key per hillslope (or per OFE), and a
//! management record per unique key with its area and coverage.

pub mod management;
pub mod rap;

use crate::catalog::{self, CatalogRow, Column, ColumnarTable, get_f64, get_i32, get_opt_f64, get_str};
use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::nodb::events::TriggerEvent;
use crate::nodb::prep::TaskEnum;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::providers::{LandcoverData, LandcoverRequest, LandcoverSource};
use crate::raster::{self, Grid};
use crate::translator::is_channel_topaz;
use crate::watershed::Watershed;
use arrow::record_batch::RecordBatch;
use management::{CoverKind, Management};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanduseMode {
    Undefined,
    #[default]
    Gridded,
    Single,
    RredUnburned,
    RredBurned,
    UserDefined,
    SpatialApi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementSummary {
    pub key: String,
    /// File name under `landuse/`.
    pub man_fn: String,
    pub management: Management,
    /// Total hillslope area (m^2) assigned this key.
    pub area: f64,
    pub pct_coverage: f64,
    #[serde(default)]
    pub cancov_override: Option<f64>,
    #[serde(default)]
    pub inrcov_override: Option<f64>,
    #[serde(default)]
    pub rilcov_override: Option<f64>,
}

impl ManagementSummary {
    pub fn disturbed_class(&self) -> Option<&str> {
        self.management.disturbed_class.as_deref()
    }

    fn override_mut(&mut self, kind: CoverKind) -> &mut Option<f64> {
        match kind {
            CoverKind::Cancov => &mut self.cancov_override,
            CoverKind::Inrcov => &mut self.inrcov_override,
            CoverKind::Rilcov => &mut self.rilcov_override,
        }
    }

    fn apply_overrides(&mut self) {
        for (kind, value) in [
            (CoverKind::Cancov, self.cancov_override),
            (CoverKind::Inrcov, self.inrcov_override),
            (CoverKind::Rilcov, self.rilcov_override),
        ] {
            if let Some(v) = value {
                self.management.set_cover(kind, v);
            }
        }
    }
}

/// One `landuse.parquet` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LanduseRow {
    pub topaz_id: i32,
    pub wepp_id: i32,
    pub key: String,
    pub disturbed_class: String,
    pub area: f64,
    pub pct_coverage: f64,
    pub cancov: Option<f64>,
    pub inrcov: Option<f64>,
    pub rilcov: Option<f64>,
}

impl CatalogRow for LanduseRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("topaz_id", Column::I32(rows.iter().map(|r| r.topaz_id).collect()))
            .with("wepp_id", Column::I32(rows.iter().map(|r| r.wepp_id).collect()))
            .with("key", Column::Str(rows.iter().map(|r| r.key.clone()).collect()))
            .with(
                "disturbed_class",
                Column::Str(rows.iter().map(|r| r.disturbed_class.clone()).collect()),
            )
            .with("area", Column::F64(rows.iter().map(|r| r.area).collect()))
            .with("pct_coverage", Column::F64(rows.iter().map(|r| r.pct_coverage).collect()))
            .with("cancov", Column::OptF64(rows.iter().map(|r| r.cancov).collect()))
            .with("inrcov", Column::OptF64(rows.iter().map(|r| r.inrcov).collect()))
            .with("rilcov", Column::OptF64(rows.iter().map(|r| r.rilcov).collect()))
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        Ok(LanduseRow {
            topaz_id: get_i32(batch, "topaz_id", row)?,
            wepp_id: get_i32(batch, "wepp_id", row)?,
            key: get_str(batch, "key", row)?,
            disturbed_class: get_str(batch, "disturbed_class", row)?,
            area: get_f64(batch, "area", row)?,
            pct_coverage: get_f64(batch, "pct_coverage", row)?,
            cancov: get_opt_f64(batch, "cancov", row)?,
            inrcov: get_opt_f64(batch, "inrcov", row)?,
            rilcov: get_opt_f64(batch, "rilcov", row)?,
        })
    }
}

/// Area and percent coverage of every key in `domlc`.
pub fn coverage(
    domlc: &BTreeMap<i32, String>,
    areas: &BTreeMap<i32, f64>,
) -> BTreeMap<String, (f64, f64)> {
    let mut by_key: BTreeMap<String, f64> = BTreeMap::new();
    for (topaz, key) in domlc {
        *by_key.entry(key.clone()).or_insert(0.0) += areas.get(topaz).copied().unwrap_or(0.0);
    }
    let total: f64 = by_key.values().sum();
    by_key
        .into_iter()
        .map(|(k, a)| {
            let pct = if total > 0.0 { a * 100.0 / total } else { 0.0 };
            (k, (a, pct))
        })
        .collect()
}

/// Most common key over all hillslopes; ties go to the smaller key.
pub fn most_common_key<'a>(keys: impl Iterator<Item = &'a String>) -> Option<String> {
    let mut counts: BTreeMap<&String, usize> = BTreeMap::new();
    for k in keys {
        *counts.entry(k).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(k, _)| k.clone())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landuse {
    #[serde(skip)]
    wd: PathBuf,
    pub mode: LanduseMode,
    pub single_selection: Option<String>,
    pub landcover_db: String,
    pub mapping: String,
    pub ignore_keys: Vec<i32>,
    pub use_rap: bool,
    pub rap_year: i32,
    domlc_d: BTreeMap<i32, String>,
    /// Per-hillslope OFE keys, top of the slope first.
    domlc_mofe: BTreeMap<i32, Vec<String>>,
    managements: BTreeMap<String, ManagementSummary>,
}

impl NoDb for Landuse {
    const KIND: ControllerKind = ControllerKind::Landuse;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[
            ("\"domlc_mofe_d\"", "\"domlc_mofe\""),
            ("\"_single_selection\"", "\"single_selection\""),
        ]
    }
}

impl Landuse {
    pub fn new(wd: &Path, cfg: &crate::config::LanduseConfig) -> Self {
        Landuse {
            wd: wd.to_path_buf(),
            mode: cfg.mode,
            single_selection: cfg.single_selection.clone(),
            landcover_db: cfg.landcover_db.clone(),
            mapping: cfg.mapping.clone(),
            ignore_keys: cfg.ignore_keys.clone(),
            use_rap: cfg.use_rap,
            rap_year: cfg.rap_year,
            domlc_d: BTreeMap::new(),
            domlc_mofe: BTreeMap::new(),
            managements: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("landuse")
    }

    pub fn parquet_path(wd: &Path) -> PathBuf {
        wd.join("landuse").join("landuse.parquet")
    }

    pub fn man_path(&self, key: &str) -> PathBuf {
        self.dir().join(format!("{}.man", key))
    }

    pub fn domlc_d(&self) -> &BTreeMap<i32, String> {
        &self.domlc_d
    }

    pub fn dominant(&self, topaz_id: i32) -> Option<&str> {
        self.domlc_d.get(&topaz_id).map(String::as_str)
    }

    pub fn mofe_keys(&self, topaz_id: i32) -> Option<&[String]> {
        self.domlc_mofe.get(&topaz_id).map(Vec::as_slice)
    }

    pub fn managements(&self) -> impl Iterator<Item = &ManagementSummary> {
        self.managements.values()
    }

    pub fn management(&self, key: &str) -> Option<&ManagementSummary> {
        self.managements.get(key)
    }

    pub fn is_built(&self) -> bool {
        !self.domlc_d.is_empty() && !self.managements.is_empty()
    }

    pub fn require_built(&self) -> Result<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(Error::precondition("landuse has not been built"))
        }
    }

    /// Assigns keys, fires `LANDUSE_DOMLC_COMPLETE`, rebuilds managements and
    /// fires `LANDUSE_BUILD_COMPLETE`.
    ///
    /// The assignment and every management it names are resolved before
    /// anything is written. A build that fails after that puts the previous
    /// assignment, managements and files back.
    pub fn build(&mut self, ctx: &RunContext) -> Result<()> {
        timed("landuse.build", || {
            let watershed: Watershed = ctx.load()?;
            watershed.require_abstracted()?;
            let source = ctx.providers().landcover.clone();
            let locale = ctx
                .config()
                .general
                .locales
                .first()
                .cloned()
                .unwrap_or_else(|| "us".to_string());

            let (domlc, mofe, raster) = self.assign(&*source, &locale, &watershed)?;
            let managements = self.resolve_managements(&*source, &domlc, &mofe, &watershed)?;

            let previous = self.clone();
            let backup = self.backup_dir();
            let built = self
                .locked(|lu| {
                    lu.stash_dir(&backup)?;
                    let dir = lu.dir();
                    fs::create_dir_all(&dir).at(&dir)?;
                    if let Some(grid) = &raster {
                        grid.write_ascii(&dir.join("landcover.asc"))?;
                    }
                    lu.domlc_d = domlc;
                    lu.domlc_mofe = mofe;
                    lu.write_managements(managements, &watershed)?;
                    lu.log_status(&format!("assigned {} hillslopes", lu.domlc_d.len()))
                })
                .and_then(|()| self.finish_build(ctx));
            if let Err(e) = built {
                return Err(self.roll_back(previous, &backup, e));
            }
            if backup.exists() {
                fs::remove_dir_all(&backup).at(&backup)?;
            }

            ctx.prep().timestamp(TaskEnum::BuildLanduse)?;
            ctx.prep().invalidate_downstream(TaskEnum::BuildLanduse)
        })
    }

    fn finish_build(&mut self, ctx: &RunContext) -> Result<()> {
        ctx.trigger(TriggerEvent::LanduseDomlcComplete)?;
        self.reload()?;

        self.build_managements(ctx)?;
        ctx.trigger(TriggerEvent::LanduseBuildComplete)?;
        self.reload()?;

        if self.use_rap {
            self.refine_canopy(ctx)?;
        }
        Ok(())
    }

    fn backup_dir(&self) -> PathBuf {
        self.wd.join("landuse.prev")
    }

    /// Moves the current landuse directory aside as `backup`.
    fn stash_dir(&self, backup: &Path) -> Result<()> {
        if backup.exists() {
            fs::remove_dir_all(backup).at(backup)?;
        }
        let dir = self.dir();
        if dir.exists() {
            fs::rename(&dir, backup).at(&dir)?;
        }
        Ok(())
    }

    /// Restores `previous` and the stashed directory, returning `err`.
    fn roll_back(&mut self, previous: Landuse, backup: &Path, err: Error) -> Error {
        tracing::warn!("landuse build failed, restoring the previous assignment: {}", err);
        let restored = self.locked(|lu| {
            let dir = lu.dir();
            if dir.exists() {
                fs::remove_dir_all(&dir).at(&dir)?;
            }
            if backup.exists() {
                fs::rename(backup, &dir).at(backup)?;
            }
            *lu = previous;
            lu.log_status("restored the previous landuse after a failed build")
        });
        if let Err(e) = restored {
            tracing::error!("could not restore the previous landuse: {}", e);
        }
        err
    }

    #[allow(clippy::type_complexity)]
    fn assign(
        &self,
        source: &dyn LandcoverSource,
        locale: &str,
        watershed: &Watershed,
    ) -> Result<(BTreeMap<i32, String>, BTreeMap<i32, Vec<String>>, Option<Grid<i32>>)> {
        let subwta = watershed.subwta()?;
        let hillslopes: Vec<i32> = watershed.sub_summaries().map(|s| s.topaz_id).collect();
        match self.mode {
            LanduseMode::Undefined => Err(Error::precondition("landuse mode is undefined")),
            LanduseMode::Single => {
                let key = self
                    .single_selection
                    .clone()
                    .ok_or_else(|| Error::validation("single landuse mode needs a selection"))?;
                let domlc = hillslopes.iter().map(|t| (*t, key.clone())).collect();
                Ok((domlc, BTreeMap::new(), None))
            }
            mode => {
                let data = source.fetch(&LandcoverRequest {
                    wd: &self.wd,
                    mode,
                    db: &self.landcover_db,
                    locale,
                    subwta: &subwta,
                    centroids: &watershed.centroids(),
                })?;
                self.assign_from(data, &hillslopes, &subwta, watershed)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn assign_from(
        &self,
        data: LandcoverData,
        hillslopes: &[i32],
        subwta: &Grid<i32>,
        watershed: &Watershed,
    ) -> Result<(BTreeMap<i32, String>, BTreeMap<i32, Vec<String>>, Option<Grid<i32>>)> {
        let (assigned, raster): (BTreeMap<i32, String>, Option<Grid<i32>>) = match data {
            LandcoverData::Points(keys) => (keys, None),
            LandcoverData::Raster(grid) => {
                let modes =
                    raster::polygon_mode(subwta, &grid, &self.ignore_keys, is_channel_topaz)?;
                let keys = modes
                    .into_iter()
                    .filter_map(|(t, v)| v.map(|v| (t, v.to_string())))
                    .collect();
                (keys, Some(grid))
            }
        };

        let fallback = most_common_key(assigned.values()).ok_or_else(|| {
            Error::provider("landcover", "no usable landcover keys inside the watershed")
        })?;
        let mut domlc = BTreeMap::new();
        for topaz in hillslopes {
            let key = match assigned.get(topaz) {
                Some(k) => k.clone(),
                None => {
                    tracing::warn!(topaz_id = topaz, "no landcover key, using {}", fallback);
                    fallback.clone()
                }
            };
            domlc.insert(*topaz, key);
        }

        let mut mofe = BTreeMap::new();
        if let (Some(grid), false) = (&raster, watershed.mofe_segments().is_empty()) {
            let segments: Grid<i32> = Grid::read_ascii(&watershed.mofe_grid_path())?;
            let seg_modes = raster::polygon_segment_mode(
                subwta,
                &segments,
                grid,
                &self.ignore_keys,
                is_channel_topaz,
            )?;
            for (topaz, seg) in watershed.mofe_segments() {
                let dom = domlc.get(topaz).cloned().unwrap_or_else(|| fallback.clone());
                let keys = (1..=seg.n_segments as i32)
                    .map(|s| {
                        seg_modes
                            .get(&(*topaz, s))
                            .copied()
                            .flatten()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| dom.clone())
                    })
                    .collect();
                mofe.insert(*topaz, keys);
            }
        }
        Ok((domlc, mofe, raster))
    }

    /// One validated management per key of `domlc` and `mofe`, keeping the
    /// cover overrides of keys already built. Nothing is written.
    fn resolve_managements(
        &self,
        source: &dyn LandcoverSource,
        domlc: &BTreeMap<i32, String>,
        mofe: &BTreeMap<i32, Vec<String>>,
        watershed: &Watershed,
    ) -> Result<BTreeMap<String, ManagementSummary>> {
        let areas: BTreeMap<i32, f64> = watershed
            .sub_summaries()
            .map(|s| (s.topaz_id, s.area))
            .collect();
        let cover = coverage(domlc, &areas);
        let keys: BTreeSet<&String> = domlc.values().chain(mofe.values().flatten()).collect();
        let mut resolved = BTreeMap::new();
        for key in keys {
            let management = source.management(key)?;
            management.validate()?;
            let (area, pct) = cover.get(key).copied().unwrap_or((0.0, 0.0));
            let mut summary = ManagementSummary {
                key: key.clone(),
                man_fn: format!("{}.man", key),
                management,
                area,
                pct_coverage: pct,
                cancov_override: None,
                inrcov_override: None,
                rilcov_override: None,
            };
            if let Some(old) = self.managements.get(key) {
                summary.cancov_override = old.cancov_override;
                summary.inrcov_override = old.inrcov_override;
                summary.rilcov_override = old.rilcov_override;
            }
            summary.apply_overrides();
            resolved.insert(key.clone(), summary);
        }
        Ok(resolved)
    }

    /// Writes `managements` and the catalog, dropping files of keys no
    /// longer used.
    fn write_managements(
        &mut self,
        managements: BTreeMap<String, ManagementSummary>,
        watershed: &Watershed,
    ) -> Result<()> {
        let dir = self.dir();
        fs::create_dir_all(&dir).at(&dir)?;
        for (key, summary) in &managements {
            summary.management.write(&self.man_path(key))?;
        }
        for stale in self.managements.keys().filter(|k| !managements.contains_key(*k)) {
            let path = self.man_path(stale);
            if path.exists() {
                fs::remove_file(&path).at(&path)?;
            }
        }
        self.managements = managements;
        self.write_catalog(watershed)
    }

    /// Rebuilds one management per unique key from the current assignment,
    /// keeping cover overrides of keys that survive.
    pub fn build_managements(&mut self, ctx: &RunContext) -> Result<()> {
        let watershed: Watershed = ctx.load()?;
        let source = ctx.providers().landcover.clone();
        let managements =
            self.resolve_managements(&*source, &self.domlc_d, &self.domlc_mofe, &watershed)?;
        self.locked(|lu| {
            lu.write_managements(managements, &watershed)?;
            lu.log_status(&format!("built {} managements", lu.managements.len()))
        })
    }

    /// Reassigns `topaz_ids` to `key` and rebuilds managements. Nothing
    /// changes unless `key` resolves to a valid management.
    pub fn modify(&mut self, ctx: &RunContext, topaz_ids: &[i32], key: &str) -> Result<()> {
        timed("landuse.modify", || {
            self.require_built()?;
            if let Some(bad) = topaz_ids.iter().find(|t| !self.domlc_d.contains_key(t)) {
                return Err(Error::validation(format!("{} is not a hillslope of this run", bad)));
            }
            let mut domlc = self.domlc_d.clone();
            let mut mofe = self.domlc_mofe.clone();
            for t in topaz_ids {
                domlc.insert(*t, key.to_string());
                if let Some(keys) = mofe.get_mut(t) {
                    keys.iter_mut().for_each(|k| *k = key.to_string());
                }
            }
            let watershed: Watershed = ctx.load()?;
            let source = ctx.providers().landcover.clone();
            let managements = self.resolve_managements(&*source, &domlc, &mofe, &watershed)?;

            self.locked(|lu| {
                lu.domlc_d = domlc;
                lu.domlc_mofe = mofe;
                lu.write_managements(managements, &watershed)?;
                lu.log_status(&format!("reassigned {} hillslopes to {}", topaz_ids.len(), key))
            })?;
            ctx.prep().timestamp(TaskEnum::BuildLanduse)?;
            ctx.prep().invalidate_downstream(TaskEnum::BuildLanduse)
        })
    }

    /// Overrides canopy, interrill or rill cover of management `dom`.
    pub fn modify_coverage(
        &mut self,
        ctx: &RunContext,
        dom: &str,
        kind: CoverKind,
        value: f64,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::validation(format!(
                "cover value {} is outside [0, 1]",
                value
            )));
        }
        if !self.managements.contains_key(dom) {
            return Err(Error::validation(format!("no management with key {}", dom)));
        }
        let watershed: Watershed = ctx.load()?;
        self.locked(|lu| {
            let path = lu.man_path(dom);
            if let Some(summary) = lu.managements.get_mut(dom) {
                *summary.override_mut(kind) = Some(value);
                summary.apply_overrides();
                summary.management.write(&path)?;
            }
            lu.write_catalog(&watershed)?;
            lu.log_status(&format!("set {:?} of {} to {}", kind, dom, value))
        })?;
        ctx.prep().invalidate_downstream(TaskEnum::BuildLanduse)
    }

    fn refine_canopy(&mut self, ctx: &RunContext) -> Result<()> {
        let Some(canopy) = ctx.providers().canopy.clone() else {
            tracing::info!("no canopy source configured, skipping cover refinement");
            return Ok(());
        };
        let watershed: Watershed = ctx.load()?;
        let bands = canopy.bands(&watershed.subwta()?, self.rap_year)?;
        let areas: BTreeMap<i32, f64> = watershed
            .sub_summaries()
            .map(|s| (s.topaz_id, s.area))
            .collect();
        let classes: BTreeMap<String, Option<String>> = self
            .managements
            .iter()
            .map(|(k, m)| (k.clone(), m.management.disturbed_class.clone()))
            .collect();
        let covers = rap::management_covers(&self.domlc_d, &areas, &bands, &classes);
        self.locked(|lu| {
            for (key, cover) in &covers {
                let path = lu.man_path(key);
                if let Some(summary) = lu.managements.get_mut(key) {
                    summary.cancov_override = Some(*cover);
                    summary.apply_overrides();
                    summary.management.write(&path)?;
                }
            }
            lu.write_catalog(&watershed)?;
            lu.log_status(&format!("refined canopy cover of {} managements", covers.len()))
        })
    }

    /// Rewrites assignments through `f(topaz, segment, key)`; segment is `None`
    /// for the dominant key. Returns the number of keys changed.
    pub fn remap(
        &mut self,
        f: impl Fn(i32, Option<usize>, &str) -> Option<String>,
    ) -> Result<usize> {
        self.locked(|lu| {
            let mut changed = 0;
            for (topaz, key) in lu.domlc_d.iter_mut() {
                if let Some(new) = f(*topaz, None, key) {
                    if new != *key {
                        *key = new;
                        changed += 1;
                    }
                }
            }
            for (topaz, keys) in lu.domlc_mofe.iter_mut() {
                for (i, key) in keys.iter_mut().enumerate() {
                    if let Some(new) = f(*topaz, Some(i + 1), key) {
                        if new != *key {
                            *key = new;
                            changed += 1;
                        }
                    }
                }
            }
            lu.log_status(&format!("remapped {} landcover keys", changed))?;
            Ok(changed)
        })
    }

    pub fn rows(&self, watershed: &Watershed) -> Result<Vec<LanduseRow>> {
        let translator = watershed.translator()?;
        let mut rows = Vec::with_capacity(self.domlc_d.len());
        for (topaz, key) in &self.domlc_d {
            let summary = self.managements.get(key);
            rows.push(LanduseRow {
                topaz_id: *topaz,
                wepp_id: translator.wepp(*topaz).unwrap_or(0),
                key: key.clone(),
                disturbed_class: summary
                    .and_then(|s| s.disturbed_class())
                    .unwrap_or_default()
                    .to_string(),
                area: watershed.sub_summary(*topaz).map(|s| s.area).unwrap_or(0.0),
                pct_coverage: summary.map(|s| s.pct_coverage).unwrap_or(0.0),
                cancov: summary.and_then(|s| s.management.cover(CoverKind::Cancov)),
                inrcov: summary.and_then(|s| s.management.cover(CoverKind::Inrcov)),
                rilcov: summary.and_then(|s| s.management.cover(CoverKind::Rilcov)),
            });
        }
        Ok(rows)
    }

    fn write_catalog(&self, watershed: &Watershed) -> Result<()> {
        catalog::write_rows(&Self::parquet_path(&self.wd), &self.rows(watershed)?)
    }

    /// Management for a hillslope, stacked per OFE when multi-OFE keys exist.
    pub fn hillslope_management(&self, topaz_id: i32) -> Result<Management> {
        let missing = |k: &str| Error::precondition(format!("no management for key {}", k));
        if let Some(keys) = self.domlc_mofe.get(&topaz_id) {
            let ofes = keys
                .iter()
                .map(|k| {
                    self.managements
                        .get(k)
                        .map(|s| s.management.clone())
                        .ok_or_else(|| missing(k))
                })
                .collect::<Result<Vec<_>>>()?;
            return Management::stack_ofes(&format!("hill_{}", topaz_id), &ofes);
        }
        let key = self
            .domlc_d
            .get(&topaz_id)
            .ok_or_else(|| Error::precondition(format!("hillslope {} has no landuse", topaz_id)))?;
        self.managements
            .get(key)
            .map(|s| s.management.clone())
            .ok_or_else(|| missing(key))
    }
}

/// Landuse row for a hillslope, from `landuse.parquet` or the controller.
pub fn landuse_summary(wd: &Path, topaz_id: i32) -> Result<Option<LanduseRow>> {
    if let Some(row) = catalog::lookup(&Landuse::parquet_path(wd), topaz_id)? {
        return Ok(Some(row));
    }
    let landuse = Landuse::get_instance(wd)?;
    let watershed = Watershed::get_instance(wd)?;
    Ok(landuse
        .rows(&watershed)?
        .into_iter()
        .find(|r| r.topaz_id == topaz_id))
}
