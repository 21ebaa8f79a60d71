//! Typed management records and the engine's 98.4 management text format.
//!
//! A management is a set of plant and initial-condition scenarios, yearly
//! scenarios referencing plants, and a rotation saying which yearly scenario
//! each OFE follows in each year. Per-hillslope edits, multi-year expansion
//! and OFE stacking all operate on this record before rendering.

use crate::error::{Error, IoContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const MANAGEMENT_VERSION: &str = "98.4";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantParams {
    pub name: String,
    pub description: String,
    pub bb: f64,
    pub bbb: f64,
    pub beinp: f64,
    pub btemp: f64,
    pub cf: f64,
    pub crit: f64,
    pub critvm: f64,
    pub cuthgt: f64,
    pub decfct: f64,
    pub diam: f64,
    pub dlai: f64,
    pub dropfc: f64,
    pub extnct: f64,
    pub fact: f64,
    pub flivmx: f64,
    pub gddmax: f64,
    pub hi: f64,
    pub hmax: f64,
    pub mfo: i32,
    pub oratea: f64,
    pub orater: f64,
    pub otemp: f64,
    pub pltol: f64,
    pub pltsp: f64,
    /// Maximum root depth (m).
    pub rdmax: f64,
    pub rsr: f64,
    pub rtmmax: f64,
    pub spriod: f64,
    pub tmpmax: f64,
    pub tmpmin: f64,
    /// Maximum leaf area index.
    pub xmxlai: f64,
    pub yld: f64,
}

impl PlantParams {
    /// Perennial grass-like defaults, used by generated managements.
    pub fn perennial(name: &str) -> Self {
        PlantParams {
            name: name.to_string(),
            description: String::new(),
            bb: 14.0,
            bbb: 23.0,
            beinp: 0.0,
            btemp: 2.0,
            cf: 3.0,
            crit: 0.0,
            critvm: 0.0,
            cuthgt: 0.0,
            decfct: 0.99,
            diam: 0.0,
            dlai: 0.99,
            dropfc: 0.0,
            extnct: 0.65,
            fact: 0.5,
            flivmx: 0.0,
            gddmax: 0.0,
            hi: 0.0,
            hmax: 0.5,
            mfo: 2,
            oratea: 0.0,
            orater: 0.0,
            otemp: 0.0,
            pltol: 0.0,
            pltsp: 0.0,
            rdmax: 0.3,
            rsr: 0.25,
            rtmmax: 0.0,
            spriod: 14.0,
            tmpmax: 0.0,
            tmpmin: 0.0,
            xmxlai: 1.0,
            yld: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IniConditions {
    pub name: String,
    pub description: String,
    pub bdtill: f64,
    /// Initial canopy cover (0-1).
    pub cancov: f64,
    pub daydis: f64,
    pub dsharv: f64,
    pub frdp: f64,
    /// Initial interrill cover (0-1).
    pub inrcov: f64,
    pub iresd: i32,
    pub imngmt: i32,
    pub rfcum: f64,
    pub rhinit: f64,
    /// Initial rill cover (0-1).
    pub rilcov: f64,
    pub rrinit: f64,
    pub rspace: f64,
    pub rtyp: i32,
    pub snodpy: f64,
    pub thdp: f64,
    pub tillay1: f64,
    pub tillay2: f64,
    pub width: f64,
    pub sumrtm: f64,
    pub sumsrm: f64,
}

impl IniConditions {
    pub fn with_cover(name: &str, cover: f64) -> Self {
        IniConditions {
            name: name.to_string(),
            description: String::new(),
            bdtill: 1.1,
            cancov: cover,
            daydis: 1000.0,
            dsharv: 1000.0,
            frdp: 0.0,
            inrcov: cover,
            iresd: 1,
            imngmt: 2,
            rfcum: 0.0,
            rhinit: 0.0,
            rilcov: cover,
            rrinit: 0.0,
            rspace: 0.0,
            rtyp: 1,
            snodpy: 0.0,
            thdp: 0.0,
            tillay1: 0.1,
            tillay2: 0.2,
            width: 0.0,
            sumrtm: 0.0,
            sumsrm: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearScenario {
    pub name: String,
    /// 1-based index into the plant scenarios.
    pub plant: usize,
    pub management_kind: i32,
    pub row_width: f64,
}

/// Canopy, interrill or rill cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverKind {
    Cancov,
    Inrcov,
    Rilcov,
}

impl CoverKind {
    pub fn parse(name: &str) -> Option<CoverKind> {
        match name {
            "cancov" => Some(CoverKind::Cancov),
            "inrcov" => Some(CoverKind::Inrcov),
            "rilcov" => Some(CoverKind::Rilcov),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Management {
    pub key: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub disturbed_class: Option<String>,
    #[serde(default)]
    pub color: String,
    pub plants: Vec<PlantParams>,
    pub inis: Vec<IniConditions>,
    pub years: Vec<YearScenario>,
    /// 1-based initial-condition index per OFE.
    pub ofe_inis: Vec<usize>,
    /// Per rotation year, the 1-based yearly scenario of each OFE.
    pub rotation: Vec<Vec<usize>>,
    pub sim_years: u32,
}

impl Management {
    /// One plant, one initial condition, one OFE, one year.
    pub fn simple(key: &str, name: &str, disturbed_class: Option<&str>, cover: f64) -> Self {
        Management {
            key: key.to_string(),
            name: name.to_string(),
            description: name.to_string(),
            disturbed_class: disturbed_class.map(str::to_string),
            color: String::new(),
            plants: vec![PlantParams::perennial(name)],
            inis: vec![IniConditions::with_cover(name, cover)],
            years: vec![YearScenario {
                name: "Year 1".to_string(),
                plant: 1,
                management_kind: 2,
                row_width: 0.0,
            }],
            ofe_inis: vec![1],
            rotation: vec![vec![1]],
            sim_years: 1,
        }
    }

    pub fn nofe(&self) -> usize {
        self.ofe_inis.len()
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::validation(format!("management {}: {}", self.key, msg)));
        if self.plants.is_empty() || self.inis.is_empty() || self.years.is_empty() {
            return bad("needs at least one plant, initial condition and yearly scenario".into());
        }
        if let Some(y) = self.years.iter().find(|y| y.plant == 0 || y.plant > self.plants.len()) {
            return bad(format!("yearly scenario {} references missing plant {}", y.name, y.plant));
        }
        if self.ofe_inis.iter().any(|i| *i == 0 || *i > self.inis.len()) {
            return bad("OFE references a missing initial condition".into());
        }
        if self.rotation.is_empty() {
            return bad("empty rotation".into());
        }
        for year in &self.rotation {
            if year.len() != self.nofe() {
                return bad(format!("rotation year has {} OFEs, expected {}", year.len(), self.nofe()));
            }
            if year.iter().any(|s| *s == 0 || *s > self.years.len()) {
                return bad("rotation references a missing yearly scenario".into());
            }
        }
        Ok(())
    }

    pub fn set_cover(&mut self, kind: CoverKind, value: f64) {
        for ini in &mut self.inis {
            match kind {
                CoverKind::Cancov => ini.cancov = value,
                CoverKind::Inrcov => ini.inrcov = value,
                CoverKind::Rilcov => ini.rilcov = value,
            }
        }
    }

    pub fn cover(&self, kind: CoverKind) -> Option<f64> {
        self.inis.first().map(|ini| match kind {
            CoverKind::Cancov => ini.cancov,
            CoverKind::Inrcov => ini.inrcov,
            CoverKind::Rilcov => ini.rilcov,
        })
    }

    pub fn set_rdmax(&mut self, rdmax: f64) {
        for p in &mut self.plants {
            p.rdmax = rdmax;
        }
    }

    pub fn set_xmxlai(&mut self, xmxlai: f64) {
        for p in &mut self.plants {
            p.xmxlai = xmxlai;
        }
    }

    /// Replicates the rotation out to `years` simulation years.
    pub fn build_multiple_year(&self, years: u32) -> Management {
        let years = years.max(1) as usize;
        let mut out = self.clone();
        out.rotation = (0..years)
            .map(|y| self.rotation[y % self.rotation.len()].clone())
            .collect();
        out.sim_years = years as u32;
        out
    }

    /// Stacks single-hillslope managements into one multi-OFE management,
    /// top of the hillslope first.
    pub fn stack_ofes(key: &str, ofes: &[Management]) -> Result<Management> {
        let first = ofes
            .first()
            .ok_or_else(|| Error::validation("cannot stack zero managements"))?;
        let n_years = ofes.iter().map(|m| m.rotation.len()).max().unwrap_or(1);
        let mut out = Management {
            key: key.to_string(),
            name: key.to_string(),
            description: format!("{} OFEs", ofes.len()),
            disturbed_class: first.disturbed_class.clone(),
            color: first.color.clone(),
            plants: Vec::new(),
            inis: Vec::new(),
            years: Vec::new(),
            ofe_inis: Vec::new(),
            rotation: vec![Vec::new(); n_years],
            sim_years: ofes.iter().map(|m| m.sim_years).max().unwrap_or(1),
        };
        for m in ofes {
            let (p_off, i_off, y_off) = (out.plants.len(), out.inis.len(), out.years.len());
            out.plants.extend(m.plants.iter().cloned());
            out.inis.extend(m.inis.iter().cloned());
            out.years.extend(m.years.iter().cloned().map(|mut y| {
                y.plant += p_off;
                y
            }));
            out.ofe_inis.extend(m.ofe_inis.iter().map(|i| i + i_off));
            for (y, slots) in out.rotation.iter_mut().enumerate() {
                let src = &m.rotation[y % m.rotation.len()];
                slots.extend(src.iter().map(|s| s + y_off));
            }
        }
        out.validate()?;
        Ok(out)
    }

    /// Renders the 98.4 text format.
    pub fn render(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "{}", MANAGEMENT_VERSION);
        let _ = writeln!(s, "#\n# {}\n# {}\n#", self.name, self.description);
        let _ = writeln!(s, "{}\t# number of OFEs", self.nofe());
        let _ = writeln!(s, "{}\t# (total) years in simulation\n", self.sim_years);

        section(&mut s, "Plant Section");
        let _ = writeln!(s, "{}\t# looper; number of Plant scenarios\n", self.plants.len());
        for p in &self.plants {
            let _ = writeln!(s, "{}\n{}\n(null)\n(null)\n1\t# landuse\nWeppWillSet", p.name, p.description);
            let _ = writeln!(
                s,
                "{} {} {} {} {} {} {} {} {} {}",
                f(p.bb), f(p.bbb), f(p.beinp), f(p.btemp), f(p.cf),
                f(p.crit), f(p.critvm), f(p.cuthgt), f(p.decfct), f(p.diam)
            );
            let _ = writeln!(
                s,
                "{} {} {} {} {} {} {} {}",
                f(p.dlai), f(p.dropfc), f(p.extnct), f(p.fact),
                f(p.flivmx), f(p.gddmax), f(p.hi), f(p.hmax)
            );
            let _ = writeln!(s, "{}", p.mfo);
            let _ = writeln!(
                s,
                "{} {} {} {} {} {} {} {} {} {}",
                f(p.oratea), f(p.orater), f(p.otemp), f(p.pltol), f(p.pltsp),
                f(p.rdmax), f(p.rsr), f(p.rtmmax), f(p.spriod), f(p.tmpmax)
            );
            let _ = writeln!(s, "{} {} {}\n", f(p.tmpmin), f(p.xmxlai), f(p.yld));
        }

        section(&mut s, "Operation Section");
        let _ = writeln!(s, "0\t# looper; number of Operation scenarios\n");

        section(&mut s, "Initial Conditions Section");
        let _ = writeln!(s, "{}\t# looper; number of Initial Conditions scenarios\n", self.inis.len());
        for i in &self.inis {
            let _ = writeln!(s, "{}\n{}\n(null)\n(null)\n1\t# landuse", i.name, i.description);
            let _ = writeln!(
                s,
                "{} {} {} {} {} {}",
                f(i.bdtill), f(i.cancov), f(i.daydis), f(i.dsharv), f(i.frdp), f(i.inrcov)
            );
            let _ = writeln!(
                s,
                "{} {} {} {} {} {} {}",
                i.iresd, i.imngmt, f(i.rfcum), f(i.rhinit), f(i.rilcov), f(i.rrinit), f(i.rspace)
            );
            let _ = writeln!(s, "{}", i.rtyp);
            let _ = writeln!(
                s,
                "{} {} {} {} {}",
                f(i.snodpy), f(i.thdp), f(i.tillay1), f(i.tillay2), f(i.width)
            );
            let _ = writeln!(s, "{} {}\n", f(i.sumrtm), f(i.sumsrm));
        }

        section(&mut s, "Surface Effects Section");
        let _ = writeln!(s, "0\t# looper; number of Surface Effect scenarios\n");
        section(&mut s, "Contouring Section");
        let _ = writeln!(s, "0\t# looper; number of Contouring scenarios\n");
        section(&mut s, "Drainage Section");
        let _ = writeln!(s, "0\t# looper; number of Drainage scenarios\n");

        section(&mut s, "Yearly Section");
        let _ = writeln!(s, "{}\t# looper; number of Yearly scenarios\n", self.years.len());
        for y in &self.years {
            let _ = writeln!(s, "{}\n(null)\n(null)\n(null)\n1\t# landuse <cropland>", y.name);
            let _ = writeln!(s, "{}\t# plant growth scenario", y.plant);
            let _ = writeln!(s, "0\t# surface effect scenario\n0\t# contour scenario\n0\t# drainage scenario");
            let _ = writeln!(s, "{}\t# management <perennial>", y.management_kind);
            let _ = writeln!(s, "0\t# senescence date\n0\t# perennial plant date\n0\t# perennial stop growth date");
            let _ = writeln!(s, "{}\t# row width\n3\t# neither cut or grazed\n", f(y.row_width));
        }

        section(&mut s, "Management Section");
        let _ = writeln!(s, "{}\n(null)\n(null)\n(null)", self.name);
        let _ = writeln!(s, "{}\t# number of OFEs", self.nofe());
        for ini in &self.ofe_inis {
            let _ = writeln!(s, "\t{}\t# initial condition index", ini);
        }
        let _ = writeln!(s, "1\t# rotation repeats");
        let _ = writeln!(s, "{}\t# years in rotation\n", self.rotation.len());
        for (y, slots) in self.rotation.iter().enumerate() {
            let _ = writeln!(s, "#\tRotation 1: year {}", y + 1);
            for (ofe, scen) in slots.iter().enumerate() {
                let _ = writeln!(s, "\t{}\t# <Year {}> - OFE: {}", scen, y + 1, ofe + 1);
            }
            s.push('\n');
        }
        s
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render()).at(path)
    }

    /// Number of OFEs and simulation years read back from a rendered file.
    pub fn read_header(path: &Path) -> Result<(usize, u32)> {
        let text = fs::read_to_string(path).at(path)?;
        let mut nums = text
            .lines()
            .skip(1)
            .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
            .filter_map(|l| l.split_whitespace().next().and_then(|t| t.parse::<u32>().ok()));
        match (nums.next(), nums.next()) {
            (Some(nofe), Some(years)) => Ok((nofe as usize, years)),
            _ => Err(Error::validation(format!("{}: malformed management header", path.display()))),
        }
    }
}

fn section(s: &mut String, title: &str) {
    let _ = writeln!(s, "#######################\n# {:<20}#\n#######################", title);
}

fn f(v: f64) -> String {
    format!("{:.5}", v)
}
