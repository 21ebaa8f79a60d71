//! Burn-severity plugin.
//!
//! Holds the soil burn severity raster (`disturbed/sbs.asc`), remaps
//! landcover keys by burn class once the landuse assignment is known and
//! specializes soils by texture and disturbed class after the soils build.

use crate::config::DisturbedConfig;
use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::landuse::Landuse;
use crate::landuse::rap::VegClass;
use crate::nodb::prep::PrepAttr;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::raster::{self, Grid};
use crate::soils::Soils;
use crate::soils::soil_file::SoilReplacements;
use crate::translator::is_channel_topaz;
use crate::watershed::Watershed;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnClass {
    #[default]
    Unburned,
    Low,
    Moderate,
    High,
}

impl BurnClass {
    /// Classifies a raster value. Both the 1-3 and the 131-133 encodings are
    /// accepted; anything else is unburned.
    pub fn from_sbs(value: i32) -> BurnClass {
        match value {
            1 | 131 => BurnClass::Low,
            2 | 132 => BurnClass::Moderate,
            3 | 133 => BurnClass::High,
            _ => BurnClass::Unburned,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BurnClass::Unburned => "unburned",
            BurnClass::Low => "low",
            BurnClass::Moderate => "moderate",
            BurnClass::High => "high",
        }
    }
}

impl fmt::Display for BurnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the replacement lookup, keyed by (disturbed class, texture).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisturbedReplacement {
    pub luse: String,
    pub stext: String,
    pub ki: Option<f64>,
    pub kr: Option<f64>,
    pub shcrit: Option<f64>,
    pub avke: Option<f64>,
    pub ksat_factor: Option<f64>,
    pub rdmax: Option<f64>,
    pub xmxlai: Option<f64>,
    pub cancov: Option<f64>,
}

impl DisturbedReplacement {
    pub fn soil(&self) -> SoilReplacements {
        SoilReplacements {
            ki: self.ki,
            kr: self.kr,
            shcrit: self.shcrit,
            avke: self.avke,
            ksat_factor: self.ksat_factor,
        }
    }
}

pub fn load_lookup(path: &Path) -> Result<Vec<DisturbedReplacement>> {
    let file = File::open(path).at(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        let row: DisturbedReplacement = record?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(Error::validation(format!("{} has no lookup rows", path.display())));
    }
    Ok(rows)
}

const TEXTURES: [(&str, f64); 4] = [
    // texture, effective hydraulic conductivity (mm/h)
    ("clay loam", 10.0),
    ("loam", 20.0),
    ("sand loam", 30.0),
    ("silt loam", 15.0),
];

const SEVERITIES: [(&str, f64); 4] = [
    // suffix, erodibility multiplier
    ("", 1.0),
    (" low sev fire", 2.0),
    (" moderate sev fire", 5.0),
    (" high sev fire", 10.0),
];

/// Built-in lookup used when no CSV is configured.
pub fn default_lookup() -> Vec<DisturbedReplacement> {
    let veg: [(&str, f64, f64, [f64; 4]); 3] = [
        // class, rdmax (m), xmxlai, cancov by severity
        ("forest", 0.6, 14.0, [0.9, 0.7, 0.4, 0.1]),
        ("shrub", 0.4, 6.0, [0.7, 0.5, 0.3, 0.1]),
        ("tall grass", 0.3, 4.0, [0.6, 0.4, 0.2, 0.1]),
    ];
    let mut rows = Vec::new();
    for (class, rdmax, xmxlai, cancov) in veg {
        for (i, (suffix, factor)) in SEVERITIES.iter().enumerate() {
            for (texture, avke) in TEXTURES {
                rows.push(DisturbedReplacement {
                    luse: format!("{}{}", class, suffix),
                    stext: texture.to_string(),
                    ki: Some(400_000.0 * factor),
                    kr: Some(1e-4 * factor),
                    shcrit: Some(3.0 / factor.sqrt()),
                    avke: Some(avke / factor.sqrt()),
                    ksat_factor: None,
                    rdmax: Some(rdmax),
                    xmxlai: Some(xmxlai / factor.sqrt()),
                    cancov: Some(cancov[i]),
                });
            }
        }
    }
    rows
}

/// Built-in landcover key for a vegetation class burned at `burn`.
pub fn default_remap(veg: VegClass, burn: BurnClass) -> Option<&'static str> {
    let keys = match veg {
        VegClass::Forest => ["106", "118", "105"],
        VegClass::Shrub => ["121", "120", "119"],
        VegClass::TallGrass => ["131", "130", "129"],
    };
    match burn {
        BurnClass::Unburned => None,
        BurnClass::Low => Some(keys[0]),
        BurnClass::Moderate => Some(keys[1]),
        BurnClass::High => Some(keys[2]),
    }
}

fn veg_name(veg: VegClass) -> &'static str {
    match veg {
        VegClass::Forest => "forest",
        VegClass::Shrub => "shrub",
        VegClass::TallGrass => "tall grass",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disturbed {
    #[serde(skip)]
    wd: PathBuf,
    pub has_sbs: bool,
    lookup: Vec<DisturbedReplacement>,
    /// `"<vegetation class>:<burn class>" -> landcover key`, over the defaults.
    landuse_remaps: BTreeMap<String, String>,
    burn_d: BTreeMap<i32, BurnClass>,
    /// Burn class per OFE, top of the slope first.
    burn_mofe: BTreeMap<i32, Vec<BurnClass>>,
    specialized: usize,
}

impl NoDb for Disturbed {
    const KIND: ControllerKind = ControllerKind::Disturbed;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[("\"_lookup\"", "\"lookup\""), ("\"sbs_d\"", "\"burn_d\"")]
    }
}

impl Disturbed {
    pub fn new(wd: &Path, cfg: &DisturbedConfig) -> Result<Self> {
        let lookup = match &cfg.lookup {
            Some(path) => load_lookup(path)?,
            None => default_lookup(),
        };
        Ok(Disturbed {
            wd: wd.to_path_buf(),
            has_sbs: false,
            lookup,
            landuse_remaps: cfg.landuse_remaps.clone(),
            burn_d: BTreeMap::new(),
            burn_mofe: BTreeMap::new(),
            specialized: 0,
        })
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("disturbed")
    }

    pub fn sbs_path(&self) -> PathBuf {
        self.dir().join("sbs.asc")
    }

    pub fn lookup(&self) -> &[DisturbedReplacement] {
        &self.lookup
    }

    pub fn replacement(&self, texture: &str, class: &str) -> Option<&DisturbedReplacement> {
        self.lookup
            .iter()
            .find(|r| r.stext == texture && r.luse.eq_ignore_ascii_case(class.trim()))
    }

    pub fn burn_class(&self, topaz_id: i32) -> BurnClass {
        self.burn_d.get(&topaz_id).copied().unwrap_or_default()
    }

    pub fn burn_classes(&self) -> &BTreeMap<i32, BurnClass> {
        &self.burn_d
    }

    /// Hillslopes whose soils were specialized by the last soils build.
    pub fn specialized(&self) -> usize {
        self.specialized
    }

    /// Landcover key a class burned at `burn` is remapped to, `None` to keep.
    pub fn remap_key(&self, disturbed_class: &str, burn: BurnClass) -> Option<String> {
        let veg = VegClass::of(disturbed_class)?;
        if burn == BurnClass::Unburned {
            return None;
        }
        let name = format!("{}:{}", veg_name(veg), burn.name());
        self.landuse_remaps
            .get(&name)
            .cloned()
            .or_else(|| default_remap(veg, burn).map(str::to_string))
    }

    /// Validates and stores a burn severity raster.
    pub fn set_sbs(&mut self, ctx: &RunContext, src: &Path) -> Result<()> {
        let grid: Grid<i32> = Grid::read_ascii(src)?;
        let burned = grid
            .cells()
            .filter(|(_, _, v)| BurnClass::from_sbs(*v) != BurnClass::Unburned)
            .count();
        self.locked(|d| {
            let dir = d.dir();
            fs::create_dir_all(&dir).at(&dir)?;
            grid.write_ascii(&d.sbs_path())?;
            d.has_sbs = true;
            d.burn_d.clear();
            d.burn_mofe.clear();
            d.log_status(&format!("burn severity map set, {} burned cells", burned))
        })?;
        ctx.prep().set_attr(PrepAttr::HasSbs, true)
    }

    pub fn remove_sbs(&mut self, ctx: &RunContext) -> Result<()> {
        self.locked(|d| {
            let path = d.sbs_path();
            if path.exists() {
                fs::remove_file(&path).at(&path)?;
            }
            d.has_sbs = false;
            d.burn_d.clear();
            d.burn_mofe.clear();
            d.log_status("burn severity map removed")
        })?;
        ctx.prep().set_attr(PrepAttr::HasSbs, false)
    }

    /// Dominant burn class per hillslope and per OFE segment.
    #[allow(clippy::type_complexity)]
    fn classify(&self, watershed: &Watershed) -> Result<(BTreeMap<i32, BurnClass>, BTreeMap<i32, Vec<BurnClass>>)> {
        let subwta = watershed.subwta()?;
        let sbs: Grid<i32> = Grid::read_ascii(&self.sbs_path())?;
        let classes = sbs.map(-1, |v| BurnClass::from_sbs(v) as i32);
        let hills = raster::polygon_mode(&subwta, &classes, &[], is_channel_topaz)?;
        let burn_d = hills
            .into_iter()
            .map(|(t, v)| (t, v.map(burn_from_ordinal).unwrap_or_default()))
            .collect();

        let mut burn_mofe: BTreeMap<i32, Vec<BurnClass>> = BTreeMap::new();
        let mofe_path = watershed.mofe_grid_path();
        if mofe_path.exists() {
            let segments: Grid<i32> = Grid::read_ascii(&mofe_path)?;
            let modes = raster::polygon_segment_mode(&subwta, &segments, &classes, &[], is_channel_topaz)?;
            for ((topaz, seg), v) in modes {
                let per_hill = burn_mofe.entry(topaz).or_default();
                let idx = seg.max(1) as usize - 1;
                if per_hill.len() <= idx {
                    per_hill.resize(idx + 1, BurnClass::Unburned);
                }
                per_hill[idx] = v.map(burn_from_ordinal).unwrap_or_default();
            }
        }
        Ok((burn_d, burn_mofe))
    }

    /// Remaps landcover keys by dominant burn class.
    pub fn on_landuse_domlc(&mut self, ctx: &RunContext) -> Result<usize> {
        timed("disturbed.remap_landuse", || {
            if !self.has_sbs || !self.sbs_path().exists() {
                tracing::debug!("no burn severity map, landuse left as assigned");
                return Ok(0);
            }
            let watershed: Watershed = ctx.load()?;
            let (burn_d, burn_mofe) = self.classify(&watershed)?;
            self.locked(|d| {
                d.burn_d = burn_d;
                d.burn_mofe = burn_mofe;
                let burned = d.burn_d.values().filter(|b| **b != BurnClass::Unburned).count();
                d.log_status(&format!("{} of {} hillslopes burned", burned, d.burn_d.len()))
            })?;

            let mut landuse: Landuse = ctx.load()?;
            let mut keys: BTreeSet<String> = landuse.domlc_d().values().cloned().collect();
            for topaz in landuse.domlc_d().keys() {
                if let Some(ofes) = landuse.mofe_keys(*topaz) {
                    keys.extend(ofes.iter().cloned());
                }
            }
            // managements are rebuilt after this event, so classes come from the library
            let source = ctx.providers().landcover.clone();
            let mut classes: BTreeMap<String, String> = BTreeMap::new();
            for key in keys {
                if let Some(class) = source.management(&key)?.disturbed_class {
                    classes.insert(key, class);
                }
            }

            let changed = landuse.remap(|topaz, segment, key| {
                let class = classes.get(key)?;
                let burn = match segment {
                    Some(seg) => self
                        .burn_mofe
                        .get(&topaz)
                        .and_then(|v| v.get(seg - 1))
                        .copied()
                        .unwrap_or_else(|| self.burn_class(topaz)),
                    None => self.burn_class(topaz),
                };
                self.remap_key(class, burn)
            })?;
            tracing::info!(changed, "landcover keys remapped by burn severity");
            Ok(changed)
        })
    }

    /// Specializes each hillslope's mapunit as `<mukey>-<texture>-<landcover
    /// key>` with the lookup's soil replacements.
    pub fn on_soils_build(&mut self, ctx: &RunContext) -> Result<usize> {
        timed("disturbed.specialize_soils", || {
            let landuse: Landuse = ctx.load()?;
            if landuse.domlc_d().is_empty() {
                tracing::warn!("landuse not assigned yet, soils left unspecialized");
                return Ok(0);
            }
            let mut soils: Soils = ctx.load()?;
            let source = ctx.providers().landcover.clone();
            let mut classes: BTreeMap<String, Option<String>> = BTreeMap::new();
            let mut plan: BTreeMap<i32, (String, SoilReplacements)> = BTreeMap::new();
            for (topaz, mukey) in soils.ssurgo_domsoil_d() {
                let Some(key) = landuse.dominant(*topaz) else { continue };
                let Some(texture) = soils.base_summary(mukey).and_then(|s| s.texture.clone()) else {
                    continue;
                };
                if !classes.contains_key(key) {
                    let class = match landuse.management(key) {
                        Some(m) => m.disturbed_class().map(str::to_string),
                        None => source.management(key)?.disturbed_class,
                    };
                    classes.insert(key.to_string(), class);
                }
                let Some(class) = classes.get(key).and_then(|c| c.as_deref()) else { continue };
                let Some(r) = self.replacement(&texture, class) else { continue };
                let specialized = format!("{}-{}-{}", mukey, texture.replace(' ', "_"), key);
                plan.insert(*topaz, (specialized, r.soil()));
            }
            let changed = soils.apply_specialization(ctx, &plan)?;
            let planned = plan.len();
            self.locked(|d| {
                d.specialized = planned;
                d.log_status(&format!("specialized soils on {} hillslopes", planned))
            })?;
            Ok(changed)
        })
    }
}

fn burn_from_ordinal(v: i32) -> BurnClass {
    match v {
        1 => BurnClass::Low,
        2 => BurnClass::Moderate,
        3 => BurnClass::High,
        _ => BurnClass::Unburned,
    }
}

/// Creates the controller for runs that enable the plugin.
pub fn on_init(ctx: &RunContext) -> Result<()> {
    if Disturbed::exists(ctx.wd()) {
        return Ok(());
    }
    Disturbed::new(ctx.wd(), &ctx.config().disturbed)?.persist_new()?;
    ctx.prep().set_attr(PrepAttr::SbsRequired, true)?;
    ctx.prep().set_attr(PrepAttr::HasSbs, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disturbed(remaps: &[(&str, &str)]) -> Disturbed {
        let cfg = DisturbedConfig {
            lookup: None,
            landuse_remaps: remaps.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        };
        Disturbed::new(Path::new("/tmp/run"), &cfg).unwrap()
    }

    #[test]
    fn test_sbs_classes() {
        assert_eq!(BurnClass::from_sbs(131), BurnClass::Low);
        assert_eq!(BurnClass::from_sbs(2), BurnClass::Moderate);
        assert_eq!(BurnClass::from_sbs(133), BurnClass::High);
        assert_eq!(BurnClass::from_sbs(0), BurnClass::Unburned);
        assert_eq!(BurnClass::from_sbs(255), BurnClass::Unburned);
    }

    #[test]
    fn test_remap_defaults_and_overrides() {
        let d = disturbed(&[("forest:high", "999")]);
        assert_eq!(d.remap_key("forest", BurnClass::Low).as_deref(), Some("106"));
        assert_eq!(d.remap_key("forest", BurnClass::High).as_deref(), Some("999"));
        assert_eq!(d.remap_key("shrub", BurnClass::Moderate).as_deref(), Some("120"));
        assert_eq!(d.remap_key("forest", BurnClass::Unburned), None);
        assert_eq!(d.remap_key("agriculture", BurnClass::High), None);
        // a burned class maps back onto its own severity key
        assert_eq!(
            d.remap_key("tall grass low sev fire", BurnClass::Low).as_deref(),
            Some("131")
        );
    }

    #[test]
    fn test_default_lookup_covers_every_texture() {
        let d = disturbed(&[]);
        for (texture, _) in TEXTURES {
            let r = d.replacement(texture, "Forest High Sev Fire").unwrap();
            assert_eq!(r.stext, texture);
            assert!(r.ki.unwrap() > d.replacement(texture, "forest").unwrap().ki.unwrap());
        }
        assert!(d.replacement("gravel", "forest").is_none());
    }

    #[test]
    fn test_lookup_from_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lookup.csv");
        fs::write(
            &path,
            "luse,stext,ki,kr,shcrit,avke,ksat_factor,rdmax,xmxlai,cancov\n\
             forest,loam,500000,0.0002,2.5,18,,0.5,10,0.8\n",
        )
        .unwrap();
        let rows = load_lookup(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ksat_factor, None);
        assert_eq!(rows[0].soil().kr, Some(0.0002));
        assert_eq!(rows[0].cancov, Some(0.8));
    }
}
