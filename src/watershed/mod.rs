//! Watershed controller: delineation state machine, abstraction into
//! hillslopes and channels, slope files and the watershed catalogs.
//!
//! ```text
//! Empty -> HasDem -> build_channels -> HasChannels -> set_outlet -> HasOutlet
//!   -> build_subcatchments -> HasSubcatchments -> abstract -> Abstracted
//! ```
//!
//! `build_channels` always clears the outlet and everything after it;
//! `remove_outlet` returns to `HasChannels`.

pub mod abstraction;
pub mod mofe;
pub mod network;

use crate::catalog;
use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::nodb::events::TriggerEvent;
use crate::nodb::prep::TaskEnum;
use crate::nodb::snapshot::atomic_write;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::providers::{DelineationBackend, DelineationParams, DelineationProducts, FlowPath};
use crate::raster::Grid;
use crate::ron;
use crate::slope::SlopeProfile;
use crate::translator::Translator;
use abstraction::{
    AbstractionInputs, ChannelSummary, HillSummary, StructureEntry, abstract_watershed,
    render_structure,
};
use mofe::{MofeSettings, Segmentation};
use network::ChannelNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelineationBackendKind {
    /// Legacy grid-flow engine.
    #[default]
    Topaz,
    /// Flow-accumulation engine.
    Peridot,
    /// Terrain-tools wrapper.
    Whitebox,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillOrBreach {
    #[default]
    Fill,
    Breach,
    BreachLeastCost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlet {
    pub requested_lon: f64,
    pub requested_lat: f64,
    pub actual_lon: f64,
    pub actual_lat: f64,
    /// Snap distance (m).
    pub distance: f64,
    pub px: i32,
    pub py: i32,
    /// Set when the snap distance exceeded the configured threshold.
    #[serde(default)]
    pub flagged: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WatershedStatus {
    #[default]
    Empty,
    HasDem,
    HasChannels,
    HasOutlet,
    HasSubcatchments,
    Abstracted,
}

/// On-disk form of the delineation products between build_subcatchments and
/// abstraction; the rasters live next to it as ASCII grids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredProducts {
    pub network: BTreeMap<i32, Vec<i32>>,
    pub flowpaths: BTreeMap<i32, Vec<FlowPath>>,
    pub channel_profiles: BTreeMap<i32, FlowPath>,
    pub channel_orders: BTreeMap<i32, i32>,
}

impl StoredProducts {
    pub fn products(self, subwta: Grid<i32>, flow_distance: Option<Grid<f64>>) -> DelineationProducts {
        DelineationProducts {
            subwta,
            network: self.network,
            flowpaths: self.flowpaths,
            channel_profiles: self.channel_profiles,
            channel_orders: self.channel_orders,
            flow_distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watershed {
    #[serde(skip)]
    wd: PathBuf,
    pub backend: DelineationBackendKind,
    pub csa: f64,
    pub mcl: f64,
    pub fill_or_breach: FillOrBreach,
    pub breach_radius: u32,
    pub bieger2015_widths: bool,
    pub outlet_snap_threshold: f64,
    pub mofe: Option<MofeSettings>,
    status: WatershedStatus,
    outlet: Option<Outlet>,
    channel_grid: Option<(usize, usize)>,
    sub_summaries: BTreeMap<i32, HillSummary>,
    chn_summaries: BTreeMap<i32, ChannelSummary>,
    network: ChannelNetwork,
    structure: Vec<StructureEntry>,
    mofe_segments: BTreeMap<i32, Segmentation>,
}

impl NoDb for Watershed {
    const KIND: ControllerKind = ControllerKind::Watershed;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[
            ("\"_subs_summary\"", "\"sub_summaries\""),
            ("\"_chns_summary\"", "\"chn_summaries\""),
            ("\"delineation_backend\"", "\"backend\""),
        ]
    }
}

impl Watershed {
    pub fn new(wd: &Path, cfg: &crate::config::WatershedConfig) -> Self {
        Watershed {
            wd: wd.to_path_buf(),
            backend: cfg.backend,
            csa: cfg.csa,
            mcl: cfg.mcl,
            fill_or_breach: cfg.fill_or_breach,
            breach_radius: cfg.breach_radius,
            bieger2015_widths: cfg.bieger2015_widths,
            outlet_snap_threshold: cfg.outlet_snap_threshold,
            mofe: cfg.multi_ofe.then_some(MofeSettings {
                target_length: cfg.mofe_target_length,
                max_segments: cfg.mofe_max_segments,
                buffer: cfg.mofe_buffer,
                buffer_length: cfg.mofe_buffer_length,
            }),
            status: WatershedStatus::Empty,
            outlet: None,
            channel_grid: None,
            sub_summaries: BTreeMap::new(),
            chn_summaries: BTreeMap::new(),
            network: ChannelNetwork::default(),
            structure: Vec::new(),
            mofe_segments: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("watershed")
    }

    pub fn subwta_path(&self) -> PathBuf {
        self.dir().join("subwta.asc")
    }

    pub fn flow_distance_path(&self) -> PathBuf {
        self.dir().join("flow_distance.asc")
    }

    pub fn mofe_grid_path(&self) -> PathBuf {
        self.dir().join("mofe.asc")
    }

    pub fn hillslopes_parquet(wd: &Path) -> PathBuf {
        wd.join("watershed").join("hillslopes.parquet")
    }

    pub fn channels_parquet(wd: &Path) -> PathBuf {
        wd.join("watershed").join("channels.parquet")
    }

    /// Channel routing structure written at abstraction, as JSON. The
    /// snapshot carries the same entries.
    pub fn structure_path(&self) -> PathBuf {
        self.dir().join("structure.json")
    }

    fn products_path(&self) -> PathBuf {
        self.dir().join("delineation.json")
    }

    pub fn hill_slope_path(&self, topaz_id: i32) -> PathBuf {
        self.dir()
            .join("slope_files")
            .join("hillslopes")
            .join(format!("hill_{}.slp", topaz_id))
    }

    pub fn hill_mofe_slope_path(&self, topaz_id: i32) -> PathBuf {
        self.dir()
            .join("slope_files")
            .join("hillslopes")
            .join(format!("hill_{}.mofe.slp", topaz_id))
    }

    /// Every channel profile in channel-enumeration order.
    pub fn channels_slope_path(&self) -> PathBuf {
        self.dir().join("slope_files").join("channels.slp")
    }

    pub fn chn_slope_path(&self, topaz_id: i32) -> PathBuf {
        self.dir()
            .join("slope_files")
            .join("channels")
            .join(format!("chn_{}.slp", topaz_id))
    }

    pub fn status(&self) -> WatershedStatus {
        if self.status == WatershedStatus::Empty && ron::dem_path(&self.wd).exists() {
            WatershedStatus::HasDem
        } else {
            self.status
        }
    }

    pub fn is_abstracted(&self) -> bool {
        self.status == WatershedStatus::Abstracted
    }

    pub fn require_abstracted(&self) -> Result<()> {
        if self.is_abstracted() {
            Ok(())
        } else {
            Err(Error::precondition(format!(
                "watershed is {:?}, it must be abstracted first",
                self.status()
            )))
        }
    }

    fn require_at_least(&self, status: WatershedStatus, action: &str) -> Result<()> {
        if self.status() >= status {
            Ok(())
        } else {
            Err(Error::precondition(format!(
                "cannot {} while watershed is {:?}",
                action,
                self.status()
            )))
        }
    }

    fn params(&self) -> DelineationParams {
        DelineationParams {
            csa: self.csa,
            mcl: self.mcl,
            fill_or_breach: self.fill_or_breach,
            breach_radius: self.breach_radius,
        }
    }

    fn clear_subcatchments(&mut self) {
        self.sub_summaries.clear();
        self.chn_summaries.clear();
        self.network = ChannelNetwork::default();
        self.structure.clear();
        self.mofe_segments.clear();
    }

    pub fn outlet(&self) -> Option<&Outlet> {
        self.outlet.as_ref()
    }

    /// The run's delineation backend; it must be the kind this watershed
    /// was created with.
    fn delineation(&self, ctx: &RunContext) -> Result<Arc<dyn DelineationBackend>> {
        let backend = ctx.providers().delineation.clone();
        if backend.kind() != self.backend {
            return Err(Error::precondition(format!(
                "watershed uses the {:?} backend but the run provides {:?}",
                self.backend,
                backend.kind()
            )));
        }
        Ok(backend)
    }

    pub fn build_channels(&mut self, ctx: &RunContext) -> Result<()> {
        timed("watershed.build_channels", || {
            if !ron::dem_path(&self.wd).exists() {
                return Err(Error::precondition("no DEM has been fetched for this run"));
            }
            let backend = self.delineation(ctx)?;
            self.locked(|ws| {
                let products = backend
                    .build_channels(&ws.wd, &ws.params())
                    .map_err(|e| Error::WatershedBuildFailed(e.to_string()))?;
                ws.channel_grid = Some((products.ncols, products.nrows));
                ws.outlet = None;
                ws.clear_subcatchments();
                ws.status = WatershedStatus::HasChannels;
                ws.log_status(&format!(
                    "built channels ({} channel cells)",
                    products.channel_cells
                ))
            })?;
            ctx.prep().timestamp(TaskEnum::BuildChannels)?;
            ctx.prep().invalidate_downstream(TaskEnum::BuildChannels)
        })
    }

    fn accept_outlet(&mut self, outlet: Outlet) -> Result<()> {
        let mut outlet = outlet;
        if outlet.distance > self.outlet_snap_threshold {
            tracing::warn!(
                distance = outlet.distance,
                threshold = self.outlet_snap_threshold,
                "outlet snapped further than the threshold"
            );
            outlet.flagged = true;
        }
        self.outlet = Some(outlet);
        self.clear_subcatchments();
        self.status = WatershedStatus::HasOutlet;
        Ok(())
    }

    pub fn set_outlet(&mut self, ctx: &RunContext, lng: f64, lat: f64) -> Result<()> {
        timed("watershed.set_outlet", || {
            self.require_at_least(WatershedStatus::HasChannels, "set the outlet")?;
            let backend = self.delineation(ctx)?;
            self.locked(|ws| {
                let outlet = backend.set_outlet(&ws.wd, lng, lat)?;
                ws.accept_outlet(outlet)?;
                ws.log_status(&format!("outlet set at ({:.6}, {:.6})", lng, lat))
            })?;
            ctx.prep().timestamp(TaskEnum::SetOutlet)
        })
    }

    pub fn find_outlet(&mut self, ctx: &RunContext, polygon: &[(f64, f64)]) -> Result<()> {
        timed("watershed.find_outlet", || {
            self.require_at_least(WatershedStatus::HasChannels, "find the outlet")?;
            let backend = self.delineation(ctx)?;
            self.locked(|ws| {
                let outlet = backend.find_outlet_from_polygon(&ws.wd, polygon)?;
                ws.accept_outlet(outlet)?;
                ws.log_status("outlet found from watershed polygon")
            })?;
            ctx.prep().timestamp(TaskEnum::SetOutlet)
        })
    }

    pub fn remove_outlet(&mut self, ctx: &RunContext) -> Result<()> {
        self.require_at_least(WatershedStatus::HasOutlet, "remove the outlet")?;
        self.locked(|ws| {
            ws.outlet = None;
            ws.clear_subcatchments();
            ws.status = WatershedStatus::HasChannels;
            ws.log_status("outlet removed")
        })?;
        ctx.prep().remove_timestamp(TaskEnum::SetOutlet)
    }

    fn outlet_on_edge(&self, outlet: &Outlet) -> bool {
        match self.channel_grid {
            Some((ncols, nrows)) => {
                outlet.px <= 0
                    || outlet.py <= 0
                    || outlet.px as usize + 1 >= ncols
                    || outlet.py as usize + 1 >= nrows
            }
            None => false,
        }
    }

    pub fn build_subcatchments(&mut self, ctx: &RunContext) -> Result<()> {
        timed("watershed.build_subcatchments", || {
            self.require_at_least(WatershedStatus::HasOutlet, "build subcatchments")?;
            let outlet = self
                .outlet
                .clone()
                .ok_or_else(|| Error::precondition("no outlet has been set"))?;
            if self.outlet_on_edge(&outlet) {
                return Err(Error::validation(format!(
                    "outlet pixel ({}, {}) lies on the raster edge",
                    outlet.px, outlet.py
                )));
            }
            let backend = self.delineation(ctx)?;
            self.locked(|ws| {
                let products = backend
                    .build_subcatchments(&ws.wd, &ws.params(), &outlet)
                    .map_err(|e| Error::WatershedBuildFailed(e.to_string()))?;
                ws.store_products(&products)?;
                ws.clear_subcatchments();
                ws.status = WatershedStatus::HasSubcatchments;
                ws.log_status("built subcatchments")
            })?;
            ctx.prep().timestamp(TaskEnum::BuildSubcatchments)?;
            ctx.prep().invalidate_downstream(TaskEnum::BuildSubcatchments)
        })
    }

    fn store_products(&self, products: &DelineationProducts) -> Result<()> {
        fs::create_dir_all(self.dir()).at(self.dir())?;
        products.subwta.write_ascii(&self.subwta_path())?;
        if let Some(fd) = &products.flow_distance {
            fd.write_ascii(&self.flow_distance_path())?;
        }
        let stored = StoredProducts {
            network: products.network.clone(),
            flowpaths: products.flowpaths.clone(),
            channel_profiles: products.channel_profiles.clone(),
            channel_orders: products.channel_orders.clone(),
        };
        atomic_write(&self.products_path(), serde_json::to_string(&stored)?.as_bytes())
    }

    fn load_products(&self) -> Result<DelineationProducts> {
        let path = self.products_path();
        let stored: StoredProducts =
            serde_json::from_str(&fs::read_to_string(&path).at(&path)?)?;
        let fd_path = self.flow_distance_path();
        let flow_distance = if fd_path.exists() {
            Some(Grid::read_ascii(&fd_path)?)
        } else {
            None
        };
        Ok(stored.products(Grid::read_ascii(&self.subwta_path())?, flow_distance))
    }

    pub fn abstract_watershed(&mut self, ctx: &RunContext) -> Result<()> {
        timed("watershed.abstract", || {
            self.require_at_least(WatershedStatus::HasSubcatchments, "abstract the watershed")?;
            let providers = ctx.providers().clone();
            self.locked(|ws| {
                let products = ws.load_products()?;
                let abstraction = abstract_watershed(&AbstractionInputs {
                    products: &products,
                    geo: providers.geo.as_ref(),
                    channel_geometry: if ws.bieger2015_widths {
                        Some(providers.channel_geometry.as_ref())
                    } else {
                        None
                    },
                })?;

                let slope_dir = ws.dir().join("slope_files");
                if slope_dir.exists() {
                    fs::remove_dir_all(&slope_dir).at(&slope_dir)?;
                }
                for sub in ["hillslopes", "channels"] {
                    let d = slope_dir.join(sub);
                    fs::create_dir_all(&d).at(&d)?;
                }
                for (topaz, profile) in &abstraction.hill_profiles {
                    profile.write_hillslope(&ws.hill_slope_path(*topaz))?;
                }
                let mut ordered_channels = Vec::new();
                for chn in abstraction.translator.iter_channels() {
                    if let Some(profile) = abstraction.channel_profiles.get(&chn) {
                        profile.write_hillslope(&ws.chn_slope_path(chn))?;
                        ordered_channels.push(profile.clone());
                    }
                }
                let channels_slp = ws.channels_slope_path();
                fs::write(&channels_slp, SlopeProfile::render_channels(&ordered_channels))
                    .at(&channels_slp)?;

                atomic_write(
                    &ws.structure_path(),
                    serde_json::to_string_pretty(&abstraction.structure)?.as_bytes(),
                )?;

                ws.mofe_segments.clear();
                if let Some(settings) = ws.mofe {
                    ws.segment_hillslopes(&settings, &products, &abstraction.hill_profiles)?;
                }

                ws.sub_summaries = abstraction.hills;
                ws.chn_summaries = abstraction.channels;
                ws.network = abstraction.network;
                ws.structure = abstraction.structure;
                ws.status = WatershedStatus::Abstracted;

                let hills: Vec<HillSummary> = ws.sub_summaries.values().cloned().collect();
                let chns: Vec<ChannelSummary> = ws.chn_summaries.values().cloned().collect();
                catalog::write_rows(&Self::hillslopes_parquet(&ws.wd), &hills)?;
                catalog::write_rows(&Self::channels_parquet(&ws.wd), &chns)?;
                ws.log_status(&format!(
                    "abstracted {} hillslopes and {} channels",
                    hills.len(),
                    chns.len()
                ))
            })?;
            ctx.prep().timestamp(TaskEnum::AbstractWatershed)?;
            ctx.trigger(TriggerEvent::WatershedAbstractionComplete)?;
            self.reload()
        })
    }

    fn segment_hillslopes(
        &mut self,
        settings: &MofeSettings,
        products: &DelineationProducts,
        profiles: &BTreeMap<i32, SlopeProfile>,
    ) -> Result<()> {
        let flow_distance = products.flow_distance.as_ref().ok_or_else(|| {
            Error::precondition("multi-OFE segmentation needs a flow-distance raster")
        })?;
        let mut lengths = BTreeMap::new();
        for (topaz, profile) in profiles {
            let seg = mofe::segment_hillslope(profile.length, settings);
            let ofes = profile.split(&seg.breaks);
            fs::write(
                self.hill_mofe_slope_path(*topaz),
                SlopeProfile::render_hillslope(&ofes),
            )
            .at(self.hill_mofe_slope_path(*topaz))?;
            lengths.insert(*topaz, profile.length);
            self.mofe_segments.insert(*topaz, seg);
        }
        let grid = mofe::segment_grid(&products.subwta, flow_distance, &lengths, &self.mofe_segments);
        grid.write_ascii(&self.mofe_grid_path())
    }

    /// Removes the delineation directory before a rebuild.
    pub fn clean(&mut self) -> Result<()> {
        let dir = self.dir();
        self.locked(|ws| {
            if dir.exists() {
                fs::remove_dir_all(&dir).at(&dir)?;
            }
            fs::create_dir_all(&dir).at(&dir)?;
            ws.outlet = None;
            ws.channel_grid = None;
            ws.clear_subcatchments();
            ws.status = WatershedStatus::Empty;
            Ok(())
        })
    }

    pub fn translator(&self) -> Result<Translator> {
        Translator::new(
            self.sub_summaries.keys().copied(),
            self.chn_summaries.keys().copied(),
        )
    }

    pub fn sub_summary(&self, topaz_id: i32) -> Option<&HillSummary> {
        self.sub_summaries.get(&topaz_id)
    }

    pub fn chn_summary(&self, topaz_id: i32) -> Option<&ChannelSummary> {
        self.chn_summaries.get(&topaz_id)
    }

    pub fn sub_summaries(&self) -> impl Iterator<Item = &HillSummary> {
        self.sub_summaries.values()
    }

    pub fn chn_summaries(&self) -> impl Iterator<Item = &ChannelSummary> {
        self.chn_summaries.values()
    }

    pub fn hillslope_count(&self) -> usize {
        self.sub_summaries.len()
    }

    pub fn network(&self) -> &ChannelNetwork {
        &self.network
    }

    pub fn structure(&self) -> &[StructureEntry] {
        &self.structure
    }

    pub fn structure_text(&self) -> String {
        render_structure(&self.structure)
    }

    pub fn mofe_segments(&self) -> &BTreeMap<i32, Segmentation> {
        &self.mofe_segments
    }

    pub fn is_edge(&self, topaz_id: i32) -> bool {
        self.sub_summaries
            .get(&topaz_id)
            .is_some_and(|s| s.is_edge)
    }

    /// Total hillslope area (m^2).
    pub fn total_area(&self) -> f64 {
        self.sub_summaries.values().map(|s| s.area).sum()
    }

    /// Area-weighted centroid (lon, lat) of the hillslopes.
    pub fn centroid(&self) -> (f64, f64) {
        let total = self.total_area();
        if total <= 0.0 {
            return self
                .outlet
                .as_ref()
                .map(|o| (o.actual_lon, o.actual_lat))
                .unwrap_or((0.0, 0.0));
        }
        self.sub_summaries.values().fold((0.0, 0.0), |acc, s| {
            (
                acc.0 + s.centroid.lon * s.area / total,
                acc.1 + s.centroid.lat * s.area / total,
            )
        })
    }

    pub fn centroids(&self) -> BTreeMap<i32, (f64, f64)> {
        self.sub_summaries
            .iter()
            .map(|(id, s)| (*id, (s.centroid.lon, s.centroid.lat)))
            .collect()
    }

    /// Hillslopes draining to `chn_topaz`, directly or through upstream channels.
    pub fn upland_hillslopes(&self, chn_topaz: i32) -> Result<Vec<i32>> {
        Ok(self.network.upland_hillslopes(chn_topaz, &self.translator()?))
    }

    pub fn subwta(&self) -> Result<Grid<i32>> {
        Grid::read_ascii(&self.subwta_path())
    }
}

/// Hillslope summary served from `hillslopes.parquet`, or from the controller
/// when the catalog is absent.
pub fn hillslope_summary(wd: &Path, topaz_id: i32) -> Result<Option<HillSummary>> {
    if let Some(row) = catalog::lookup(&Watershed::hillslopes_parquet(wd), topaz_id)? {
        return Ok(Some(row));
    }
    Ok(Watershed::get_instance(wd)?.sub_summary(topaz_id).cloned())
}

pub fn channel_summary(wd: &Path, topaz_id: i32) -> Result<Option<ChannelSummary>> {
    if let Some(row) = catalog::lookup(&Watershed::channels_parquet(wd), topaz_id)? {
        return Ok(Some(row));
    }
    Ok(Watershed::get_instance(wd)?.chn_summary(topaz_id).cloned())
}
