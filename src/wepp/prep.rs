//! Input files under `wepp/runs/`: per-hillslope `p{w}.*`, the watershed
//! `pw0.*` set and the run files that tie them together.

use crate::climate::Climate;
use crate::config::{RunConfig, WeppConfig};
use crate::error::{Error, IoContext, Result};
use crate::landuse::Landuse;
use crate::landuse::management::{CoverKind, Management};
use crate::plugins::disturbed::Disturbed;
use crate::providers::{CanopySource, MapSampler};
use crate::slope::SlopeProfile;
use crate::soils::Soils;
use crate::soils::soil_file::{SoilFile, SoilFormat, SoilHorizon, SoilOfe};
use crate::watershed::Watershed;
use crate::watershed::abstraction::ChannelSummary;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_DTCHR: u32 = 60;

pub fn hill_stem(wepp_id: i32) -> String {
    format!("p{}", wepp_id)
}

/// `(ichout, dtchr)` of `chan.inp`.
pub fn channel_output_control(single_storm: bool, dtchr_override: Option<u32>) -> (u32, u32) {
    if single_storm {
        (3, MIN_DTCHR)
    } else {
        (1, dtchr_override.unwrap_or(600).max(MIN_DTCHR))
    }
}

pub fn render_chan_inp(ichout: u32, dtchr: u32, channels_of_interest: &[i32]) -> String {
    let ids: Vec<String> = channels_of_interest.iter().map(i32::to_string).collect();
    format!(
        "{} {}\n0\n{}\n{}\n",
        ichout,
        dtchr,
        channels_of_interest.len(),
        ids.join(" ")
    )
}

/// Hillslope run file: metric units, continuous simulation, outputs written
/// next to the inputs.
pub fn render_hillslope_run(wepp_id: i32, sim_years: u32) -> String {
    let p = hill_stem(wepp_id);
    let mut s = String::new();
    let _ = writeln!(s, "m\t# metric units");
    let _ = writeln!(s, "y\t# not watershed");
    let _ = writeln!(s, "1\t# continuous simulation");
    let _ = writeln!(s, "1\t# hillslope version");
    let _ = writeln!(s, "y\t# write pass file");
    let _ = writeln!(s, "{}.pass.dat", p);
    let _ = writeln!(s, "1\t# abbreviated annual output");
    let _ = writeln!(s, "n\t# no initial scenario output");
    let _ = writeln!(s, "{}.loss.out", p);
    let _ = writeln!(s, "y\t# water balance output");
    let _ = writeln!(s, "{}.wat.out", p);
    let _ = writeln!(s, "n\t# no crop output");
    let _ = writeln!(s, "y\t# event by event output");
    let _ = writeln!(s, "{}.ebe.out", p);
    let _ = writeln!(s, "n\t# no final summary");
    let _ = writeln!(s, "{}.man", p);
    let _ = writeln!(s, "{}.slp", p);
    let _ = writeln!(s, "{}.cli", p);
    let _ = writeln!(s, "{}.sol", p);
    let _ = writeln!(s, "0\t# no irrigation");
    let _ = writeln!(s, "{}\t# years to simulate", sim_years.max(1));
    let _ = writeln!(s, "0\t# bypass erosion plots");
    s
}

/// Watershed run file. Hillslope pass files are read from `runs/`; the
/// summary tables land in `../output/`.
pub fn render_watershed_run(n_hillslopes: usize, sim_years: u32, single_storm: bool) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "m\t# metric units");
    let _ = writeln!(s, "y\t# watershed");
    let _ = writeln!(s, "{}\t# simulation type", if single_storm { 2 } else { 1 });
    let _ = writeln!(s, "{}\t# hillslopes", n_hillslopes);
    for w in 1..=n_hillslopes {
        let _ = writeln!(s, "{}.pass.dat", hill_stem(w as i32));
    }
    let _ = writeln!(s, "1\t# abbreviated annual output");
    let _ = writeln!(s, "../output/loss_pw0.txt");
    let _ = writeln!(s, "y\t# channel water balance");
    let _ = writeln!(s, "../output/chnwb_pw0.txt");
    let _ = writeln!(s, "y\t# event by event output");
    let _ = writeln!(s, "../output/ebe_pw0.txt");
    let _ = writeln!(s, "pw0.chan.out");
    let _ = writeln!(s, "pw0.man");
    let _ = writeln!(s, "pw0.slp");
    let _ = writeln!(s, "pw0.cli");
    let _ = writeln!(s, "pw0.sol");
    let _ = writeln!(s, "pw0.str");
    let _ = writeln!(s, "pw0.chn");
    let _ = writeln!(s, "pw0.imp");
    let _ = writeln!(s, "{}\t# years to simulate", sim_years.max(1));
    s
}

/// Resolved channel hydraulic and erosion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// s/m^(1/3)
    pub erodibility: f64,
    /// N/m^2
    pub critical_shear: f64,
    pub manning_n: f64,
}

impl ChannelParams {
    pub const DEFAULT_ERODIBILITY: f64 = 1e-6;
    pub const DEFAULT_CRITICAL_SHEAR: f64 = 10.0;
    pub const DEFAULT_MANNING_N: f64 = 0.04;
}

/// `pw0.chn`: one parameter block per channel in channel-enumeration order.
pub fn render_channel_params(channels: &[&ChannelSummary], params: &ChannelParams) -> String {
    let mut sorted: Vec<&ChannelSummary> = channels.to_vec();
    sorted.sort_by_key(|c| c.chn_enum);
    let mut s = String::new();
    let _ = writeln!(s, "99.1");
    let _ = writeln!(s, "{}\t# channels", sorted.len());
    for c in sorted {
        let _ = writeln!(s, "Channel {} (topaz {}, order {})", c.chn_enum, c.topaz_id, c.order);
        let _ = writeln!(
            s,
            "{:.4}\t{:.4}\t{:.6}\t{:.4}\t{:.4}",
            c.width.max(0.0),
            c.length.max(0.0),
            params.erodibility,
            params.critical_shear,
            params.manning_n
        );
    }
    s
}

/// `pw0.sol`: a shallow gravel bed per channel.
pub fn channel_soil(n_channels: usize, critical_shear: f64) -> SoilFile {
    let ofe = SoilOfe {
        name: "channel".to_string(),
        texture: "gravel".to_string(),
        albedo: 0.23,
        initial_sat: 0.75,
        ki: 1_000_000.0,
        kr: 0.0001,
        shcrit: critical_shear,
        avke: 10.0,
        horizons: vec![SoilHorizon {
            depth: 400.0,
            bd: 1.6,
            ksat: 100.0,
            anisotropy: 1.0,
            fc: 0.1,
            wp: 0.05,
            sand: 80.0,
            clay: 5.0,
            om: 1.0,
            cec: 5.0,
            rfg: 50.0,
        }],
        restrictive: None,
    };
    SoilFile {
        format: SoilFormat::V7778,
        comments: vec!["channel soils".to_string()],
        ksflag: 0,
        ofes: vec![ofe; n_channels],
    }
}

fn copy(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).at(src)?;
    Ok(())
}

/// Everything the per-hillslope writers read, borrowed from the controllers.
pub struct HillslopeSources<'a> {
    pub runs_dir: &'a Path,
    pub config: &'a RunConfig,
    pub watershed: &'a Watershed,
    pub soils: &'a Soils,
    pub landuse: &'a Landuse,
    pub climate: &'a Climate,
    pub disturbed: Option<&'a Disturbed>,
    pub maps: &'a dyn MapSampler,
    pub canopy: Option<&'a dyn CanopySource>,
}

/// What a prepared hillslope reports back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedHillslope {
    pub topaz_id: i32,
    pub wepp_id: i32,
    pub soil_format: SoilFormat,
    pub kslast: Option<f64>,
}

impl HillslopeSources<'_> {
    fn wepp_cfg(&self) -> &WeppConfig {
        &self.config.wepp
    }

    fn path(&self, wepp_id: i32, ext: &str) -> PathBuf {
        self.runs_dir.join(format!("{}.{}", hill_stem(wepp_id), ext))
    }

    /// Writes `p{w}.slp/.sol/.man/.cli/.run` for one hillslope.
    pub fn prepare(&self, topaz_id: i32, wepp_id: i32) -> Result<PreparedHillslope> {
        let nofe = self.write_slope(topaz_id, wepp_id)?;
        let (soil, kslast) = self.write_soil(topaz_id, wepp_id, nofe)?;
        let texture = soil.simple_texture();
        self.write_management(topaz_id, wepp_id, texture, nofe)?;
        copy(&self.climate.hillslope_cli(topaz_id)?, &self.path(wepp_id, "cli"))?;
        let run = self.path(wepp_id, "run");
        fs::write(&run, render_hillslope_run(wepp_id, self.climate.sim_years)).at(&run)?;
        Ok(PreparedHillslope {
            topaz_id,
            wepp_id,
            soil_format: soil.format,
            kslast,
        })
    }

    /// Returns the number of OFEs.
    fn write_slope(&self, topaz_id: i32, wepp_id: i32) -> Result<usize> {
        let dst = self.path(wepp_id, "slp");
        if let Some(seg) = self.watershed.mofe_segments().get(&topaz_id) {
            copy(&self.watershed.hill_mofe_slope_path(topaz_id), &dst)?;
            return Ok(seg.n_segments);
        }
        let src = self.watershed.hill_slope_path(topaz_id);
        let cfg = self.wepp_cfg();
        if cfg.clip_hillslopes {
            let profile = SlopeProfile::read_hillslope(&src)?;
            profile.clipped(cfg.clip_hillslope_length).write_hillslope(&dst)?;
        } else {
            copy(&src, &dst)?;
        }
        Ok(1)
    }

    fn write_soil(&self, topaz_id: i32, wepp_id: i32, nofe: usize) -> Result<(SoilFile, Option<f64>)> {
        let mut soil = self.soils.hillslope_soil(topaz_id)?;
        soil.set_initial_sat(self.soils.initial_sat);

        let cfg = self.wepp_cfg();
        let mut kslast = cfg.kslast;
        if kslast.is_none() {
            if let (Some(map), Some(s)) = (&cfg.kslast_map, self.watershed.sub_summary(topaz_id)) {
                kslast = self.maps.sample(map, s.centroid.lon, s.centroid.lat)?;
            }
        }
        if let Some(k) = kslast {
            if !k.is_finite() || k < 0.0 {
                return Err(Error::validation(format!("kslast {} for hillslope {}", k, topaz_id)));
            }
            if !soil.set_kslast(k) {
                tracing::debug!(topaz_id, "soil format has no restrictive layer, kslast ignored");
            }
        }
        if let Some(depth) = self.soils.max_soil_depth {
            if !soil.is_short_form() {
                soil.clip_soil_depth(depth);
            }
        }
        if nofe > 1 {
            if let Some(ofe) = soil.ofes.first().cloned() {
                soil.ofes = vec![ofe; nofe];
            }
        }
        soil.write(&self.path(wepp_id, "sol"))?;
        Ok((soil, kslast))
    }

    fn write_management(
        &self,
        topaz_id: i32,
        wepp_id: i32,
        texture: Option<&str>,
        nofe: usize,
    ) -> Result<()> {
        let mut man: Management = self.landuse.hillslope_management(topaz_id)?;
        man.validate()?;
        if man.nofe() != nofe {
            let key = man.key.clone();
            man = Management::stack_ofes(&key, &vec![man; nofe])?;
        }

        let replacement = match (self.disturbed, texture, man.disturbed_class.as_deref()) {
            (Some(d), Some(t), Some(class)) => d.replacement(t, class),
            _ => None,
        };
        if let Some(r) = replacement {
            if let Some(v) = r.rdmax {
                man.set_rdmax(v);
            }
            if let Some(v) = r.xmxlai {
                man.set_xmxlai(v);
            }
            if let Some(v) = r.cancov {
                man.set_cover(CoverKind::Cancov, v);
            }
        }
        if let Some(cancov) = self
            .canopy
            .and_then(|c| c.initial_canopy(topaz_id, self.landuse.rap_year))
        {
            man.set_cover(CoverKind::Cancov, cancov.clamp(0.0, 1.0));
        }
        let years = self.climate.sim_years;
        if self.wepp_cfg().multi_year_managements && years > 1 && man.sim_years < years {
            man = man.build_multiple_year(years);
        }
        man.write(&self.path(wepp_id, "man"))
    }
}
