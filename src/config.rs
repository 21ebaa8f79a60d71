use crate::climate::ClimateMode;
use crate::error::{IoContext, Result};
use crate::landuse::LanduseMode;
use crate::soils::SoilsMode;
use crate::watershed::{DelineationBackendKind, FillOrBreach};
use crate::wepp::opts::{BaseflowOpts, FrostOpts, PhosphorusOpts, PmetOpts, SnowOpts, TcrOpts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// Run configuration, read from `<stem>.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub general: GeneralConfig,
    pub watershed: WatershedConfig,
    pub landuse: LanduseConfig,
    pub soils: SoilsConfig,
    pub climate: ClimateConfig,
    pub wepp: WeppConfig,
    pub phosphorus: PhosphorusConfig,
    pub baseflow: BaseflowOpts,
    pub snow: SnowOpts,
    pub frost: FrostOpts,
    pub tcr: TcrOpts,
    pub pmet: PmetOpts,
    pub disturbed: DisturbedConfig,
    pub providers: ProvidersConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).at(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn has_mod(&self, name: &str) -> bool {
        self.general.mods.iter().any(|m| m == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub name: String,
    pub dem_db: String,
    pub cellsize: f64,
    pub locales: Vec<String>,
    pub mods: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            name: "default".to_string(),
            dem_db: "ned1/2016".to_string(),
            cellsize: 30.0,
            locales: vec!["us".to_string()],
            mods: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatershedConfig {
    pub backend: DelineationBackendKind,
    /// Critical source area (ha).
    pub csa: f64,
    /// Minimum channel length (m).
    pub mcl: f64,
    pub fill_or_breach: FillOrBreach,
    pub breach_radius: u32,
    pub bieger2015_widths: bool,
    /// Outlets snapped further than this (m) are recorded but flagged.
    pub outlet_snap_threshold: f64,
    pub multi_ofe: bool,
    pub mofe_target_length: f64,
    pub mofe_max_segments: usize,
    pub mofe_buffer: bool,
    pub mofe_buffer_length: f64,
}

impl Default for WatershedConfig {
    fn default() -> Self {
        WatershedConfig {
            backend: DelineationBackendKind::Topaz,
            csa: 5.0,
            mcl: 60.0,
            fill_or_breach: FillOrBreach::Fill,
            breach_radius: 5,
            bieger2015_widths: false,
            outlet_snap_threshold: 150.0,
            multi_ofe: false,
            mofe_target_length: 50.0,
            mofe_max_segments: 5,
            mofe_buffer: false,
            mofe_buffer_length: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanduseConfig {
    pub mode: LanduseMode,
    pub single_selection: Option<String>,
    pub landcover_db: String,
    pub mapping: String,
    /// Raster values that never win the polygon mode (nodata sentinels).
    pub ignore_keys: Vec<i32>,
    pub use_rap: bool,
    pub rap_year: i32,
}

impl Default for LanduseConfig {
    fn default() -> Self {
        LanduseConfig {
            mode: LanduseMode::Gridded,
            single_selection: None,
            landcover_db: "nlcd/2019".to_string(),
            mapping: "default".to_string(),
            ignore_keys: vec![0, 127, 255],
            use_rap: false,
            rap_year: 2020,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilsConfig {
    pub mode: SoilsMode,
    pub single_mukey: Option<String>,
    pub single_dbselection: Option<String>,
    pub soils_library: Option<PathBuf>,
    pub initial_sat: f64,
    pub ksflag: bool,
    /// Clip total soil depth (mm) when set.
    pub max_soil_depth: Option<f64>,
}

impl Default for SoilsConfig {
    fn default() -> Self {
        SoilsConfig {
            mode: SoilsMode::Gridded,
            single_mukey: None,
            single_dbselection: None,
            soils_library: None,
            initial_sat: 0.75,
            ksflag: true,
            max_soil_depth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    pub mode: ClimateMode,
    pub input_years: u32,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        ClimateConfig {
            mode: ClimateMode::Single,
            input_years: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeppConfig {
    pub bin: String,
    pub max_workers: Option<usize>,
    pub heartbeat_secs: u64,
    pub soil_prep_heartbeat_secs: u64,
    pub require_completion_banner: bool,
    pub kslast: Option<f64>,
    pub kslast_map: Option<String>,
    pub clip_hillslopes: bool,
    pub clip_hillslope_length: f64,
    pub dtchr_override: Option<u32>,
    pub chn_topaz_ids_of_interest: Vec<i32>,
    pub channel_erodibility: Option<f64>,
    pub channel_critical_shear: Option<f64>,
    pub channel_manning_n: Option<f64>,
    pub channel_erodibility_map: Option<String>,
    pub channel_critical_shear_map: Option<String>,
    pub run_wepp_ui: bool,
    pub run_frost: bool,
    pub run_snow: bool,
    pub run_baseflow: bool,
    pub run_tcr: bool,
    pub run_pmet: bool,
    pub multi_year_managements: bool,
}

impl Default for WeppConfig {
    fn default() -> Self {
        WeppConfig {
            bin: "wepp".to_string(),
            max_workers: None,
            heartbeat_secs: 30,
            soil_prep_heartbeat_secs: 5,
            require_completion_banner: true,
            kslast: None,
            kslast_map: None,
            clip_hillslopes: false,
            clip_hillslope_length: 300.0,
            dtchr_override: None,
            chn_topaz_ids_of_interest: Vec::new(),
            channel_erodibility: None,
            channel_critical_shear: None,
            channel_manning_n: None,
            channel_erodibility_map: None,
            channel_critical_shear_map: None,
            run_wepp_ui: false,
            run_frost: false,
            run_snow: true,
            run_baseflow: true,
            run_tcr: false,
            run_pmet: true,
            multi_year_managements: true,
        }
    }
}

// Phosphorus options plus the maps consulted when they are incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhosphorusConfig {
    #[serde(flatten)]
    pub opts: PhosphorusOpts,
    pub surf_runoff_map: Option<String>,
    pub lateral_flow_map: Option<String>,
    pub baseflow_map: Option<String>,
    pub sediment_map: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisturbedConfig {
    /// CSV with columns luse, stext and replacement values.
    pub lookup: Option<PathBuf>,
    /// Override table `"<disturbed class>:<burn class>" -> landcover key`.
    pub landuse_remaps: BTreeMap<String, String>,
}

// Paths and settings for the local provider implementations used by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub dem: Option<PathBuf>,
    pub delineation_dir: Option<PathBuf>,
    pub landcover_grid: Option<PathBuf>,
    pub management_library: Option<PathBuf>,
    pub soil_db: Option<PathBuf>,
    pub soil_grid: Option<PathBuf>,
    pub climate_file: Option<PathBuf>,
    pub utm_zone: u32,
    pub northern: bool,
    /// Constant-valued maps for overrides, `name -> value`.
    pub constant_maps: BTreeMap<String, f64>,
    /// ASCII-grid maps for overrides, `name -> path`.
    pub grid_maps: BTreeMap<String, PathBuf>,
    pub soil_db_columns: SoilDbColumns,
    /// Engine poll interval while waiting on a simulator process (ms).
    pub engine_poll_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            dem: None,
            delineation_dir: None,
            landcover_grid: None,
            management_library: None,
            soil_db: None,
            soil_grid: None,
            climate_file: None,
            utm_zone: 11,
            northern: true,
            constant_maps: BTreeMap::new(),
            grid_maps: BTreeMap::new(),
            soil_db_columns: SoilDbColumns::default(),
            engine_poll_ms: 100,
        }
    }
}

// Column names of the SQLite soil database, so databases exported with
// different naming can be read without rewriting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilDbColumns {
    pub mapunit_table: String,
    pub horizon_table: String,
    pub key: String,
    pub name: String,
    pub kind: String,
    pub texture: String,
    pub albedo: String,
    pub ki: String,
    pub kr: String,
    pub shcrit: String,
    pub avke: String,
    pub kslast: String,
    pub ll: String,
    pub depth: String,
    pub bd: String,
    pub ksat: String,
    pub fc: String,
    pub wp: String,
    pub sand: String,
    pub clay: String,
    pub om: String,
    pub cec: String,
    pub rfg: String,
}

impl Default for SoilDbColumns {
    fn default() -> Self {
        SoilDbColumns {
            mapunit_table: "mapunit".to_string(),
            horizon_table: "chorizon".to_string(),
            key: "mukey".to_string(),
            name: "muname".to_string(),
            kind: "kind".to_string(),
            texture: "texture".to_string(),
            albedo: "albedo".to_string(),
            ki: "ki".to_string(),
            kr: "kr".to_string(),
            shcrit: "shcrit".to_string(),
            avke: "avke".to_string(),
            kslast: "kslast".to_string(),
            ll: "ll_r".to_string(),
            depth: "hzdepb_r".to_string(),
            bd: "dbthirdbar_r".to_string(),
            ksat: "ksat_r".to_string(),
            fc: "wthirdbar_r".to_string(),
            wp: "wfifteenbar_r".to_string(),
            sand: "sandtotal_r".to_string(),
            clay: "claytotal_r".to_string(),
            om: "om_r".to_string(),
            cec: "cec7_r".to_string(),
            rfg: "fragvol_r".to_string(),
        }
    }
}
