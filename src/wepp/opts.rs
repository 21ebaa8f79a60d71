//! Watershed-wide option bundles written next to the run files, and the
//! resolution chain that fills their values.

use crate::error::{Error, Result};
use crate::providers::MapSampler;
use serde::{Deserialize, Serialize};

/// Resolves one parameter: explicit argument, then configured scalar, then a
/// map sampled at `at`, then the built-in default.
pub struct Resolver<'a> {
    pub maps: &'a dyn MapSampler,
    /// (lon, lat) the maps are sampled at.
    pub at: (f64, f64),
}

impl Resolver<'_> {
    pub fn value(
        &self,
        label: &str,
        explicit: Option<f64>,
        configured: Option<f64>,
        map: Option<&str>,
        default: Option<f64>,
    ) -> Result<Option<f64>> {
        if let Some(v) = explicit.or(configured) {
            return Ok(Some(v));
        }
        if let Some(map) = map {
            if let Some(v) = self.maps.sample(map, self.at.0, self.at.1)? {
                tracing::debug!(map, value = v, "{} sampled from map", label);
                return Ok(Some(v));
            }
            tracing::warn!(map, "{} map has no value at {:?}", label, self.at);
        }
        Ok(default)
    }
}

fn check_non_negative(label: &str, v: Option<f64>) -> Result<()> {
    match v {
        Some(v) if !v.is_finite() || v < 0.0 => Err(Error::validation(format!(
            "{} must be a non-negative number, got {}",
            label, v
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhosphorusOpts {
    /// mg/l
    pub surf_runoff: Option<f64>,
    /// mg/l
    pub lateral_flow: Option<f64>,
    /// mg/l
    pub baseflow: Option<f64>,
    /// mg/kg
    pub sediment: Option<f64>,
}

impl PhosphorusOpts {
    pub fn is_valid(&self) -> bool {
        [self.surf_runoff, self.lateral_flow, self.baseflow, self.sediment]
            .iter()
            .all(|v| v.is_some_and(|v| v.is_finite() && v >= 0.0))
    }

    pub fn validate(&self) -> Result<()> {
        check_non_negative("surf_runoff", self.surf_runoff)?;
        check_non_negative("lateral_flow", self.lateral_flow)?;
        check_non_negative("baseflow", self.baseflow)?;
        check_non_negative("sediment", self.sediment)
    }

    /// `phosphorus.txt` contents, `None` while any concentration is unknown.
    pub fn contents(&self) -> Option<String> {
        if !self.is_valid() {
            return None;
        }
        let (Some(r), Some(l), Some(b), Some(s)) =
            (self.surf_runoff, self.lateral_flow, self.baseflow, self.sediment)
        else {
            return None;
        };
        Some(format!(
            "Phosphorus concentration\n\
             {}\tSurface runoff concentration (mg/l)\n\
             {}\tSubsurface lateral flow concentration (mg/l)\n\
             {}\tBaseflow concentration (mg/l)\n\
             {}\tSediment concentration (mg/kg)\n\n",
            r, l, b, s
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseflowOpts {
    /// Initial groundwater storage (mm).
    pub gwstorage: Option<f64>,
    /// Baseflow coefficient (1/day).
    pub bfcoeff: Option<f64>,
    /// Deep seepage coefficient (1/day).
    pub dscoeff: Option<f64>,
    /// Baseflow threshold area (ha).
    pub bfthreshold: Option<f64>,
    pub gwstorage_map: Option<String>,
    pub bfcoeff_map: Option<String>,
    pub dscoeff_map: Option<String>,
    pub bfthreshold_map: Option<String>,
}

impl BaseflowOpts {
    pub const DEFAULT_GWSTORAGE: f64 = 200.0;
    pub const DEFAULT_BFCOEFF: f64 = 0.04;
    pub const DEFAULT_DSCOEFF: f64 = 0.0;
    pub const DEFAULT_BFTHRESHOLD: f64 = 1.0;

    pub fn resolve(&self, r: &Resolver) -> Result<BaseflowOpts> {
        let out = BaseflowOpts {
            gwstorage: r.value(
                "gwstorage",
                None,
                self.gwstorage,
                self.gwstorage_map.as_deref(),
                Some(Self::DEFAULT_GWSTORAGE),
            )?,
            bfcoeff: r.value(
                "bfcoeff",
                None,
                self.bfcoeff,
                self.bfcoeff_map.as_deref(),
                Some(Self::DEFAULT_BFCOEFF),
            )?,
            dscoeff: r.value(
                "dscoeff",
                None,
                self.dscoeff,
                self.dscoeff_map.as_deref(),
                Some(Self::DEFAULT_DSCOEFF),
            )?,
            bfthreshold: r.value(
                "bfthreshold",
                None,
                self.bfthreshold,
                self.bfthreshold_map.as_deref(),
                Some(Self::DEFAULT_BFTHRESHOLD),
            )?,
            ..self.clone()
        };
        check_non_negative("gwstorage", out.gwstorage)?;
        check_non_negative("bfcoeff", out.bfcoeff)?;
        check_non_negative("dscoeff", out.dscoeff)?;
        check_non_negative("bfthreshold", out.bfthreshold)?;
        Ok(out)
    }

    pub fn contents(&self) -> String {
        format!(
            "{}\tInitial groundwater storage (mm)\n\
             {}\tBaseflow coefficient (per day)\n\
             {}\tDeep seepage coefficient (per day)\n\
             {}\tWatershed groundwater baseflow threshold area (ha)\n\n",
            self.gwstorage.unwrap_or(Self::DEFAULT_GWSTORAGE),
            self.bfcoeff.unwrap_or(Self::DEFAULT_BFCOEFF),
            self.dscoeff.unwrap_or(Self::DEFAULT_DSCOEFF),
            self.bfthreshold.unwrap_or(Self::DEFAULT_BFTHRESHOLD),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowOpts {
    /// Rain-snow threshold temperature (C).
    pub rst: Option<f64>,
    /// Density of new snow (kg/m^3).
    pub newsnw: Option<f64>,
    /// Settled snow density (kg/m^3).
    pub ssd: Option<f64>,
    pub rst_map: Option<String>,
}

impl SnowOpts {
    pub const DEFAULT_RST: f64 = 0.0;
    pub const DEFAULT_NEWSNW: f64 = 100.0;
    pub const DEFAULT_SSD: f64 = 250.0;

    pub fn resolve(&self, r: &Resolver) -> Result<SnowOpts> {
        Ok(SnowOpts {
            rst: r.value("rst", None, self.rst, self.rst_map.as_deref(), Some(Self::DEFAULT_RST))?,
            newsnw: self.newsnw.or(Some(Self::DEFAULT_NEWSNW)),
            ssd: self.ssd.or(Some(Self::DEFAULT_SSD)),
            rst_map: self.rst_map.clone(),
        })
    }

    pub fn contents(&self) -> String {
        format!(
            "{}\t# rain-snow threshold\n{}\t# density of new snow\n{}\t# snow settling density\n",
            self.rst.unwrap_or(Self::DEFAULT_RST),
            self.newsnw.unwrap_or(Self::DEFAULT_NEWSNW),
            self.ssd.unwrap_or(Self::DEFAULT_SSD),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrostOpts {
    pub winter_reduction: i32,
    pub fine_top: i32,
    pub fine_bottom: i32,
    pub ksnowf: f64,
    pub kresf: f64,
    pub ksoilf: f64,
    pub kfactor: f64,
}

impl Default for FrostOpts {
    fn default() -> Self {
        FrostOpts {
            winter_reduction: 1,
            fine_top: 1,
            fine_bottom: 1,
            ksnowf: 1.0,
            kresf: 1.0,
            ksoilf: 1.0,
            kfactor: 0.5,
        }
    }
}

impl FrostOpts {
    pub fn contents(&self) -> String {
        format!(
            "{}  {}  {}\n{}  {}  {}  {}\n",
            self.winter_reduction,
            self.fine_top,
            self.fine_bottom,
            self.ksnowf,
            self.kresf,
            self.ksoilf,
            self.kfactor
        )
    }
}

/// Channel critical shear options; all four or none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcrOpts {
    pub taumin: Option<f64>,
    pub taumax: Option<f64>,
    pub kch: Option<f64>,
    pub nch: Option<f64>,
}

impl TcrOpts {
    pub fn is_complete(&self) -> bool {
        self.taumin.is_some() && self.taumax.is_some() && self.kch.is_some() && self.nch.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(lo), Some(hi)) = (self.taumin, self.taumax) {
            if lo > hi {
                return Err(Error::validation(format!(
                    "tcr taumin {} exceeds taumax {}",
                    lo, hi
                )));
            }
        }
        Ok(())
    }

    /// `tcr.txt` contents; a single blank line when disabled.
    pub fn contents(&self, enabled: bool) -> String {
        match (enabled, self.taumin, self.taumax, self.kch, self.nch) {
            (true, Some(a), Some(b), Some(c), Some(d)) => format!("{}\n{}\n{}\n{}\n", a, b, c, d),
            _ => "\n".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmetOpts {
    /// Basal crop coefficient.
    pub kcb: Option<f64>,
    /// Readily available water fraction.
    pub rawp: Option<f64>,
    pub kcb_map: Option<String>,
}

impl PmetOpts {
    pub const DEFAULT_KCB: f64 = 0.95;
    pub const DEFAULT_RAWP: f64 = 0.80;

    /// `(kcb, rawp)` after resolution.
    pub fn resolve(&self, r: &Resolver, explicit_kcb: Option<f64>) -> Result<(f64, f64)> {
        let kcb = r
            .value(
                "pmet_kcb",
                explicit_kcb,
                self.kcb,
                self.kcb_map.as_deref(),
                Some(Self::DEFAULT_KCB),
            )?
            .unwrap_or(Self::DEFAULT_KCB);
        let rawp = self.rawp.unwrap_or(Self::DEFAULT_RAWP);
        check_non_negative("pmet_kcb", Some(kcb))?;
        if !(0.0..=1.0).contains(&rawp) {
            return Err(Error::validation(format!("pmet rawp {} is outside [0, 1]", rawp)));
        }
        Ok((kcb, rawp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Constant(BTreeMap<String, f64>);

    impl MapSampler for Constant {
        fn sample(&self, map: &str, _lon: f64, _lat: f64) -> Result<Option<f64>> {
            Ok(self.0.get(map).copied())
        }
    }

    #[test]
    fn test_phosphorus_contents_are_byte_exact() {
        let p = PhosphorusOpts {
            surf_runoff: Some(0.004),
            lateral_flow: Some(0.005),
            baseflow: Some(0.006),
            sediment: Some(800.0),
        };
        assert_eq!(
            p.contents().unwrap(),
            "Phosphorus concentration\n\
             0.004\tSurface runoff concentration (mg/l)\n\
             0.005\tSubsurface lateral flow concentration (mg/l)\n\
             0.006\tBaseflow concentration (mg/l)\n\
             800\tSediment concentration (mg/kg)\n\n"
        );
    }

    #[test]
    fn test_incomplete_phosphorus_has_no_file() {
        let p = PhosphorusOpts {
            surf_runoff: Some(0.004),
            ..Default::default()
        };
        assert!(!p.is_valid());
        assert!(p.contents().is_none());
        let bad = PhosphorusOpts {
            sediment: Some(-1.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_resolution_order() {
        let maps = Constant(BTreeMap::from([("bf".to_string(), 0.07)]));
        let r = Resolver {
            maps: &maps,
            at: (-117.0, 46.7),
        };
        assert_eq!(r.value("x", Some(1.0), Some(2.0), Some("bf"), Some(3.0)).unwrap(), Some(1.0));
        assert_eq!(r.value("x", None, Some(2.0), Some("bf"), Some(3.0)).unwrap(), Some(2.0));
        assert_eq!(r.value("x", None, None, Some("bf"), Some(3.0)).unwrap(), Some(0.07));
        assert_eq!(r.value("x", None, None, Some("nope"), Some(3.0)).unwrap(), Some(3.0));

        let opts = BaseflowOpts {
            bfcoeff_map: Some("bf".to_string()),
            ..Default::default()
        };
        let resolved = opts.resolve(&r).unwrap();
        assert_eq!(resolved.bfcoeff, Some(0.07));
        assert_eq!(resolved.gwstorage, Some(200.0));
        assert!(resolved.contents().starts_with("200\tInitial groundwater storage (mm)\n0.07\t"));
    }

    #[test]
    fn test_tcr_disabled_is_blank_line() {
        let t = TcrOpts {
            taumin: Some(0.5),
            taumax: Some(2.0),
            kch: Some(0.1),
            nch: Some(1.5),
        };
        assert_eq!(t.contents(true), "0.5\n2\n0.1\n1.5\n");
        assert_eq!(t.contents(false), "\n");
        assert_eq!(TcrOpts::default().contents(true), "\n");
    }

    #[test]
    fn test_frost_is_two_lines() {
        assert_eq!(FrostOpts::default().contents().lines().count(), 2);
    }

    #[test]
    fn test_pmet_defaults_and_bounds() {
        let maps = Constant(BTreeMap::new());
        let r = Resolver {
            maps: &maps,
            at: (0.0, 0.0),
        };
        assert_eq!(PmetOpts::default().resolve(&r, None).unwrap(), (0.95, 0.80));
        assert_eq!(PmetOpts::default().resolve(&r, Some(1.1)).unwrap().0, 1.1);
        let bad = PmetOpts {
            rawp: Some(1.5),
            ..Default::default()
        };
        assert!(bad.resolve(&r, None).is_err());
    }
}
