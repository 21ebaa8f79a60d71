//! Engine soil files (`7778` and `2006.2` formats) and the raw horizon
//! profiles they are built from.

use crate::error::{Error, IoContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoilFormat {
    V7778,
    V2006_2,
}

impl SoilFormat {
    pub fn header(&self) -> &'static str {
        match self {
            SoilFormat::V7778 => "7778",
            SoilFormat::V2006_2 => "2006.2",
        }
    }

    fn parse(token: &str) -> Option<SoilFormat> {
        match token {
            "7778" | "7778.0" => Some(SoilFormat::V7778),
            "2006.2" => Some(SoilFormat::V2006_2),
            _ => None,
        }
    }
}

/// One horizon of a soil database record. Attributes the database lacks are
/// `None` until the pedotransfer hook fills them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonAttrs {
    /// Bottom depth (mm).
    pub depth: f64,
    pub bd: Option<f64>,
    /// Saturated hydraulic conductivity (mm/h).
    pub ksat: Option<f64>,
    pub fc: Option<f64>,
    pub wp: Option<f64>,
    pub sand: Option<f64>,
    pub clay: Option<f64>,
    pub om: Option<f64>,
    pub cec: Option<f64>,
    pub rfg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoilProfile {
    pub mukey: String,
    pub name: String,
    pub texture: String,
    /// `water`, `urban` or empty for ordinary mapunits.
    pub kind: String,
    pub albedo: Option<f64>,
    pub ki: Option<f64>,
    pub kr: Option<f64>,
    pub shcrit: Option<f64>,
    pub avke: Option<f64>,
    pub kslast: Option<f64>,
    pub ll: Option<f64>,
    pub horizons: Vec<HorizonAttrs>,
}

impl SoilProfile {
    pub fn is_water(&self) -> bool {
        self.kind.eq_ignore_ascii_case("water")
    }

    pub fn is_urban(&self) -> bool {
        self.kind.eq_ignore_ascii_case("urban")
    }

    /// A profile can become a soil file once its erodibility and every
    /// horizon attribute are known.
    pub fn is_complete(&self) -> bool {
        if self.is_water() || self.is_urban() {
            return true;
        }
        self.ki.is_some()
            && self.kr.is_some()
            && self.shcrit.is_some()
            && !self.horizons.is_empty()
            && self.horizons.iter().all(|h| {
                h.bd.is_some()
                    && h.ksat.is_some()
                    && h.fc.is_some()
                    && h.wp.is_some()
                    && h.sand.is_some()
                    && h.clay.is_some()
                    && h.om.is_some()
                    && h.cec.is_some()
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilHorizon {
    pub depth: f64,
    pub bd: f64,
    pub ksat: f64,
    pub anisotropy: f64,
    pub fc: f64,
    pub wp: f64,
    pub sand: f64,
    pub clay: f64,
    pub om: f64,
    pub cec: f64,
    pub rfg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictiveLayer {
    pub flag: i32,
    pub thickness: f64,
    pub kslast: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilOfe {
    pub name: String,
    pub texture: String,
    pub albedo: f64,
    pub initial_sat: f64,
    pub ki: f64,
    pub kr: f64,
    pub shcrit: f64,
    pub avke: f64,
    pub horizons: Vec<SoilHorizon>,
    pub restrictive: Option<RestrictiveLayer>,
}

/// Per-texture, per-disturbed-class replacement values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoilReplacements {
    pub ki: Option<f64>,
    pub kr: Option<f64>,
    pub shcrit: Option<f64>,
    pub avke: Option<f64>,
    pub ksat_factor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilFile {
    pub format: SoilFormat,
    pub comments: Vec<String>,
    pub ksflag: i32,
    pub ofes: Vec<SoilOfe>,
}

impl SoilFile {
    pub fn from_profile(profile: &SoilProfile, initial_sat: f64, ksflag: bool) -> Result<SoilFile> {
        if profile.is_water() {
            return Ok(SoilFile::water(&profile.mukey));
        }
        if profile.is_urban() {
            return Ok(SoilFile::urban(&profile.mukey));
        }
        if !profile.is_complete() {
            return Err(Error::validation(format!(
                "mapunit {} is missing soil attributes",
                profile.mukey
            )));
        }
        let horizons: Vec<SoilHorizon> = profile
            .horizons
            .iter()
            .map(|h| SoilHorizon {
                depth: h.depth,
                bd: h.bd.unwrap_or_default(),
                ksat: h.ksat.unwrap_or_default(),
                anisotropy: if h.depth <= 50.0 { 10.0 } else { 1.0 },
                fc: h.fc.unwrap_or_default(),
                wp: h.wp.unwrap_or_default(),
                sand: h.sand.unwrap_or_default(),
                clay: h.clay.unwrap_or_default(),
                om: h.om.unwrap_or_default(),
                cec: h.cec.unwrap_or_default(),
                rfg: h.rfg.unwrap_or_default(),
            })
            .collect();
        let top_ksat = horizons.first().map(|h| h.ksat).unwrap_or_default();
        let bottom = horizons.last().map(|h| h.depth).unwrap_or_default();
        Ok(SoilFile {
            format: SoilFormat::V7778,
            comments: vec![format!("{} {}", profile.mukey, profile.name)],
            ksflag: i32::from(ksflag),
            ofes: vec![SoilOfe {
                name: profile.name.clone(),
                texture: profile.texture.clone(),
                albedo: profile.albedo.unwrap_or(0.23),
                initial_sat,
                ki: profile.ki.unwrap_or_default(),
                kr: profile.kr.unwrap_or_default(),
                shcrit: profile.shcrit.unwrap_or_default(),
                avke: profile.avke.unwrap_or(top_ksat),
                horizons,
                restrictive: profile.kslast.map(|kslast| RestrictiveLayer {
                    flag: 1,
                    thickness: (10_000.0 - bottom).max(0.0),
                    kslast,
                }),
            }],
        })
    }

    fn short_form(mukey: &str, name: &str, texture: &str, ki: f64, kr: f64, shcrit: f64) -> SoilFile {
        SoilFile {
            format: SoilFormat::V7778,
            comments: vec![format!("{} {}", mukey, name)],
            ksflag: 1,
            ofes: vec![SoilOfe {
                name: name.to_string(),
                texture: texture.to_string(),
                albedo: 0.16,
                initial_sat: 0.75,
                ki,
                kr,
                shcrit,
                avke: 0.1,
                horizons: Vec::new(),
                restrictive: None,
            }],
        }
    }

    pub fn water(mukey: &str) -> SoilFile {
        Self::short_form(mukey, "water", "water", 1.0, 0.01, 999.0)
    }

    pub fn urban(mukey: &str) -> SoilFile {
        Self::short_form(mukey, "Urban_1", "Urban", 1.0, 0.0001, 999.0)
    }

    pub fn is_short_form(&self) -> bool {
        self.ofes.iter().all(|o| o.horizons.is_empty())
    }

    pub fn set_initial_sat(&mut self, value: f64) {
        for ofe in &mut self.ofes {
            ofe.initial_sat = value;
        }
    }

    /// Sets the restrictive-layer conductivity. Only the `7778` format carries
    /// a restrictive layer; returns whether anything changed.
    pub fn set_kslast(&mut self, kslast: f64) -> bool {
        if self.format != SoilFormat::V7778 || self.is_short_form() {
            return false;
        }
        for ofe in &mut self.ofes {
            let bottom = ofe.horizons.last().map(|h| h.depth).unwrap_or_default();
            match &mut ofe.restrictive {
                Some(layer) => layer.kslast = kslast,
                None => {
                    ofe.restrictive = Some(RestrictiveLayer {
                        flag: 1,
                        thickness: (10_000.0 - bottom).max(0.0),
                        kslast,
                    })
                }
            }
        }
        true
    }

    /// Truncates every OFE to `max_depth` mm.
    pub fn clip_soil_depth(&mut self, max_depth: f64) {
        for ofe in &mut self.ofes {
            let mut kept = Vec::new();
            let mut top = 0.0;
            for h in &ofe.horizons {
                if top >= max_depth {
                    break;
                }
                let mut h = h.clone();
                h.depth = h.depth.min(max_depth);
                top = h.depth;
                kept.push(h);
            }
            ofe.horizons = kept;
        }
    }

    pub fn apply_replacements(&mut self, r: &SoilReplacements) {
        for ofe in &mut self.ofes {
            if let Some(v) = r.ki {
                ofe.ki = v;
            }
            if let Some(v) = r.kr {
                ofe.kr = v;
            }
            if let Some(v) = r.shcrit {
                ofe.shcrit = v;
            }
            if let Some(v) = r.avke {
                ofe.avke = v;
            }
            if let Some(factor) = r.ksat_factor {
                for h in &mut ofe.horizons {
                    h.ksat *= factor;
                }
            }
        }
    }

    pub fn top_horizon(&self) -> Option<&SoilHorizon> {
        self.ofes.first().and_then(|o| o.horizons.first())
    }

    pub fn clay(&self) -> Option<f64> {
        self.top_horizon().map(|h| h.clay)
    }

    pub fn sand(&self) -> Option<f64> {
        self.top_horizon().map(|h| h.sand)
    }

    pub fn bd(&self) -> Option<f64> {
        self.top_horizon().map(|h| h.bd)
    }

    pub fn simple_texture(&self) -> Option<&'static str> {
        match (self.clay(), self.sand()) {
            (Some(clay), Some(sand)) => Some(simple_texture(clay, sand)),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "{}", self.format.header());
        for c in &self.comments {
            let _ = writeln!(s, "# {}", c);
        }
        let _ = writeln!(s, "Any comments:");
        let _ = writeln!(s, "{} {}", self.ofes.len(), self.ksflag);
        for ofe in &self.ofes {
            let _ = writeln!(
                s,
                "'{}'\t\t'{}'\t{}\t{:.4}\t{:.4}\t{:.2}\t{:.6}\t{:.4}\t{:.4}",
                ofe.name,
                ofe.texture,
                ofe.horizons.len(),
                ofe.albedo,
                ofe.initial_sat,
                ofe.ki,
                ofe.kr,
                ofe.shcrit,
                ofe.avke
            );
            for h in &ofe.horizons {
                match self.format {
                    SoilFormat::V7778 => {
                        let _ = writeln!(
                            s,
                            "\t{:.1}\t{:.2}\t{:.4}\t{:.1}\t{:.4}\t{:.4}\t{:.1}\t{:.1}\t{:.2}\t{:.1}\t{:.1}",
                            h.depth, h.bd, h.ksat, h.anisotropy, h.fc, h.wp, h.sand, h.clay, h.om, h.cec, h.rfg
                        );
                    }
                    SoilFormat::V2006_2 => {
                        let _ = writeln!(
                            s,
                            "\t{:.1}\t{:.1}\t{:.1}\t{:.2}\t{:.1}\t{:.1}",
                            h.depth, h.sand, h.clay, h.om, h.cec, h.rfg
                        );
                    }
                }
            }
            if self.format == SoilFormat::V7778 && !ofe.horizons.is_empty() {
                let (flag, thickness, kslast) = match &ofe.restrictive {
                    Some(r) => (r.flag, r.thickness, r.kslast),
                    None => (0, 0.0, 0.0),
                };
                let _ = writeln!(s, "{} {:.1} {:.6}", flag, thickness, kslast);
            }
        }
        s
    }

    pub fn parse(text: &str) -> Result<SoilFile> {
        let bad = |msg: &str| Error::validation(format!("soil file: {}", msg));
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        let format = lines
            .next()
            .and_then(SoilFormat::parse)
            .ok_or_else(|| bad("unsupported version header"))?;

        let mut comments = Vec::new();
        let mut line = lines.next().ok_or_else(|| bad("truncated"))?;
        while line.starts_with('#') || line.starts_with("Any comments") {
            if let Some(c) = line.strip_prefix('#') {
                comments.push(c.trim().to_string());
            }
            line = lines.next().ok_or_else(|| bad("truncated"))?;
        }

        let head = numbers(line)?;
        if head.len() < 2 {
            return Err(bad("missing `ntemp ksflag` line"));
        }
        let nofe = head[0] as usize;
        let ksflag = head[1] as i32;

        let mut ofes = Vec::with_capacity(nofe);
        for _ in 0..nofe {
            let ofe_line = lines.next().ok_or_else(|| bad("missing OFE line"))?;
            let toks = tokenize(ofe_line);
            if toks.len() < 9 {
                return Err(bad("short OFE line"));
            }
            let num = |i: usize| -> Result<f64> {
                toks[i]
                    .parse::<f64>()
                    .map_err(|_| bad(&format!("bad number `{}`", toks[i])))
            };
            let nsl = num(2)? as usize;
            let mut ofe = SoilOfe {
                name: toks[0].clone(),
                texture: toks[1].clone(),
                albedo: num(3)?,
                initial_sat: num(4)?,
                ki: num(5)?,
                kr: num(6)?,
                shcrit: num(7)?,
                avke: num(8)?,
                horizons: Vec::with_capacity(nsl),
                restrictive: None,
            };
            for _ in 0..nsl {
                let v = numbers(lines.next().ok_or_else(|| bad("missing horizon"))?)?;
                let h = match format {
                    SoilFormat::V7778 if v.len() >= 11 => SoilHorizon {
                        depth: v[0],
                        bd: v[1],
                        ksat: v[2],
                        anisotropy: v[3],
                        fc: v[4],
                        wp: v[5],
                        sand: v[6],
                        clay: v[7],
                        om: v[8],
                        cec: v[9],
                        rfg: v[10],
                    },
                    SoilFormat::V2006_2 if v.len() >= 6 => SoilHorizon {
                        depth: v[0],
                        bd: 0.0,
                        ksat: 0.0,
                        anisotropy: 0.0,
                        fc: 0.0,
                        wp: 0.0,
                        sand: v[1],
                        clay: v[2],
                        om: v[3],
                        cec: v[4],
                        rfg: v[5],
                    },
                    _ => return Err(bad("short horizon line")),
                };
                ofe.horizons.push(h);
            }
            if format == SoilFormat::V7778 && nsl > 0 {
                let v = numbers(lines.next().ok_or_else(|| bad("missing restrictive layer"))?)?;
                if v.len() >= 3 && v[0] as i32 != 0 {
                    ofe.restrictive = Some(RestrictiveLayer {
                        flag: v[0] as i32,
                        thickness: v[1],
                        kslast: v[2],
                    });
                }
            }
            ofes.push(ofe);
        }

        Ok(SoilFile {
            format,
            comments,
            ksflag,
            ofes,
        })
    }

    pub fn read(path: &Path) -> Result<SoilFile> {
        let text = fs::read_to_string(path).at(path)?;
        Self::parse(&text).map_err(|e| Error::validation(format!("{}: {}", path.display(), e)))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render()).at(path)
    }
}

fn numbers(line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .take_while(|t| !t.starts_with('#'))
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| Error::validation(format!("soil file: bad number `{}`", t)))
        })
        .collect()
}

/// Splits on whitespace, keeping single-quoted names intact.
fn tokenize(line: &str) -> Vec<String> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.peek().copied() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let tok: String = chars.by_ref().take_while(|c| *c != '\'').collect();
            toks.push(tok);
        } else {
            let mut tok = String::new();
            while let Some(c) = chars.peek().copied() {
                if c.is_whitespace() {
                    break;
                }
                tok.push(c);
                chars.next();
            }
            toks.push(tok);
        }
    }
    toks
}

/// Four-class texture used to key disturbed replacement tables.
pub fn simple_texture(clay: f64, sand: f64) -> &'static str {
    let cs = clay + sand;
    if (clay <= 27.0 && cs <= 50.0) || (clay > 27.0 && sand <= 20.0 && cs <= 50.0) {
        "silt loam"
    } else if (6.0..=27.0).contains(&clay) && cs > 50.0 && cs <= 72.0 && sand <= 52.0 {
        "loam"
    } else if sand >= 50.0 && (sand > 52.0 || clay < 6.0) {
        "sand loam"
    } else if clay > 27.0 || cs > 72.0 {
        "clay loam"
    } else if sand >= 50.0 {
        "sand loam"
    } else {
        "loam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SoilProfile {
        SoilProfile {
            mukey: "2485028".to_string(),
            name: "Palouse".to_string(),
            texture: "silt loam".to_string(),
            kind: String::new(),
            albedo: Some(0.23),
            ki: Some(5_000_000.0),
            kr: Some(0.006),
            shcrit: Some(3.5),
            avke: None,
            kslast: Some(0.01),
            ll: Some(32.0),
            horizons: vec![
                HorizonAttrs {
                    depth: 200.0,
                    bd: Some(1.3),
                    ksat: Some(30.0),
                    fc: Some(0.3),
                    wp: Some(0.12),
                    sand: Some(15.0),
                    clay: Some(20.0),
                    om: Some(3.0),
                    cec: Some(18.0),
                    rfg: Some(0.0),
                },
                HorizonAttrs {
                    depth: 1200.0,
                    bd: Some(1.4),
                    ksat: Some(10.0),
                    fc: Some(0.28),
                    wp: Some(0.14),
                    sand: Some(12.0),
                    clay: Some(25.0),
                    om: Some(1.0),
                    cec: Some(15.0),
                    rfg: Some(5.0),
                },
            ],
        }
    }

    #[test]
    fn test_render_parse_7778() {
        let sol = SoilFile::from_profile(&profile(), 0.75, true).unwrap();
        let text = sol.render();
        assert!(text.starts_with("7778\n"));
        let back = SoilFile::parse(&text).unwrap();
        assert_eq!(back.ofes.len(), 1);
        assert_eq!(back.ofes[0].name, "Palouse");
        assert_eq!(back.ofes[0].texture, "silt loam");
        assert_eq!(back.ofes[0].horizons.len(), 2);
        assert_eq!(back.ofes[0].restrictive.as_ref().map(|r| r.kslast), Some(0.01));
        assert_eq!(back.clay(), Some(20.0));
    }

    #[test]
    fn test_mutations() {
        let mut sol = SoilFile::from_profile(&profile(), 0.75, true).unwrap();
        sol.set_initial_sat(0.5);
        assert!(sol.set_kslast(0.002));
        sol.clip_soil_depth(500.0);
        sol.apply_replacements(&SoilReplacements {
            ki: Some(1.0),
            ksat_factor: Some(0.5),
            ..Default::default()
        });
        let ofe = &sol.ofes[0];
        assert_eq!(ofe.initial_sat, 0.5);
        assert_eq!(ofe.restrictive.as_ref().map(|r| r.kslast), Some(0.002));
        assert_eq!(ofe.horizons.len(), 2);
        assert_eq!(ofe.horizons[1].depth, 500.0);
        assert_eq!(ofe.horizons[0].ksat, 15.0);
        assert_eq!(ofe.ki, 1.0);
    }

    #[test]
    fn test_water_is_short_form() {
        let mut p = profile();
        p.kind = "water".to_string();
        p.horizons.clear();
        let sol = SoilFile::from_profile(&p, 0.75, true).unwrap();
        assert!(sol.is_short_form());
        let back = SoilFile::parse(&sol.render()).unwrap();
        assert_eq!(back.ofes[0].texture, "water");
        assert!(back.ofes[0].horizons.is_empty());
    }

    #[test]
    fn test_incomplete_profile_is_rejected() {
        let mut p = profile();
        p.horizons[1].bd = None;
        assert!(!p.is_complete());
        assert!(SoilFile::from_profile(&p, 0.75, true).is_err());
    }

    #[test]
    fn test_parse_2006() {
        let text = "2006.2\n#\nAny comments:\n1 1\n'Loam'  'loam'  1  0.23  0.75  4000000  0.005  3.5  12.0\n  300  40  20  2.5  15  5\n";
        let sol = SoilFile::parse(text).unwrap();
        assert_eq!(sol.format, SoilFormat::V2006_2);
        assert_eq!(sol.sand(), Some(40.0));
        let mut sol = sol;
        assert!(!sol.set_kslast(0.1));
    }

    #[test]
    fn test_simple_texture() {
        assert_eq!(simple_texture(20.0, 15.0), "silt loam");
        assert_eq!(simple_texture(15.0, 40.0), "loam");
        assert_eq!(simple_texture(5.0, 70.0), "sand loam");
        assert_eq!(simple_texture(35.0, 30.0), "clay loam");
    }
}
