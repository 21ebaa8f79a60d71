//! Parser for the watershed loss summary (`loss_pw0.txt`).
//!
//! The report is read section by section: the hillslope table, the channel
//! table, the outlet summary (`label = value unit` lines) and the sediment
//! class table. Banner and header lines are skipped; a data row is any line
//! whose tokens are all numeric.

use crate::error::{Error, IoContext, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct HillLossRow {
    pub wepp_id: i32,
    /// m^3
    pub runoff_volume: f64,
    /// m^3
    pub subrunoff_volume: f64,
    /// m^3
    pub baseflow_volume: f64,
    /// kg
    pub soil_loss: f64,
    /// kg
    pub sediment_deposition: f64,
    /// kg
    pub sediment_yield: f64,
    /// kg, present when phosphorus was simulated
    pub solub_react_p: Option<f64>,
    pub particulate_p: Option<f64>,
    pub total_p: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLossRow {
    pub wepp_id: i32,
    /// m^3
    pub discharge_volume: f64,
    /// tonne
    pub sediment_yield: f64,
    /// kg
    pub soil_loss: f64,
    /// m^3
    pub upland_charge: f64,
    /// m^3
    pub subsurface_flow_volume: f64,
    pub solub_react_p: Option<f64>,
    pub particulate_p: Option<f64>,
    pub total_p: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutletRow {
    pub key: String,
    pub value: f64,
    pub units: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SedimentClassRow {
    pub class: i32,
    /// mm
    pub diameter: f64,
    pub specific_gravity: f64,
    pub pct_sand: f64,
    pub pct_silt: f64,
    pub pct_clay: f64,
    pub pct_om: f64,
    /// Fraction of sediment leaving the outlet in this class.
    pub fraction: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossReport {
    pub hillslopes: Vec<HillLossRow>,
    pub channels: Vec<ChannelLossRow>,
    pub outlet: Vec<OutletRow>,
    pub classes: Vec<SedimentClassRow>,
}

impl LossReport {
    pub fn outlet_value(&self, key: &str) -> Option<f64> {
        self.outlet.iter().find(|r| r.key == key).map(|r| r.value)
    }

    pub fn hillslope(&self, wepp_id: i32) -> Option<&HillLossRow> {
        self.hillslopes.iter().find(|r| r.wepp_id == wepp_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Hillslopes,
    Channels,
    Outlet,
    Classes,
}

fn section_of(line: &str) -> Option<Section> {
    let t = line.trim();
    if t.starts_with("Hillslopes") {
        Some(Section::Hillslopes)
    } else if t.starts_with("Channels and Impoundments") {
        Some(Section::Channels)
    } else if t.contains("OUTLET") {
        Some(Section::Outlet)
    } else if t.starts_with("Sediment particle information") {
        Some(Section::Classes)
    } else {
        None
    }
}

fn numeric_row(line: &str) -> Option<Vec<f64>> {
    let values: Option<Vec<f64>> = line.split_whitespace().map(|t| t.parse().ok()).collect();
    values.filter(|v| !v.is_empty())
}

fn bad_row(lineno: usize, expected: usize, got: usize) -> Error {
    Error::validation(format!(
        "loss_pw0.txt line {}: expected at least {} columns, got {}",
        lineno + 1,
        expected,
        got
    ))
}

pub fn parse(text: &str) -> Result<LossReport> {
    let mut report = LossReport::default();
    let mut section = Section::Preamble;
    for (lineno, line) in text.lines().enumerate() {
        if let Some(s) = section_of(line) {
            section = s;
            continue;
        }
        match section {
            Section::Preamble => {}
            Section::Outlet => {
                if let Some((label, rest)) = line.split_once('=') {
                    let mut tokens = rest.split_whitespace();
                    let Some(value) = tokens.next().and_then(|t| t.parse::<f64>().ok()) else {
                        continue;
                    };
                    report.outlet.push(OutletRow {
                        key: label.trim().to_string(),
                        value,
                        units: tokens.collect::<Vec<_>>().join(" "),
                    });
                }
            }
            Section::Hillslopes => {
                let Some(v) = numeric_row(line) else { continue };
                if v.len() < 7 {
                    return Err(bad_row(lineno, 7, v.len()));
                }
                let p = v.len() >= 10;
                report.hillslopes.push(HillLossRow {
                    wepp_id: v[0] as i32,
                    runoff_volume: v[1],
                    subrunoff_volume: v[2],
                    baseflow_volume: v[3],
                    soil_loss: v[4],
                    sediment_deposition: v[5],
                    sediment_yield: v[6],
                    solub_react_p: p.then(|| v[7]),
                    particulate_p: p.then(|| v[8]),
                    total_p: p.then(|| v[9]),
                });
            }
            Section::Channels => {
                let Some(v) = numeric_row(line) else { continue };
                if v.len() < 6 {
                    return Err(bad_row(lineno, 6, v.len()));
                }
                let p = v.len() >= 9;
                report.channels.push(ChannelLossRow {
                    wepp_id: v[0] as i32,
                    discharge_volume: v[1],
                    sediment_yield: v[2],
                    soil_loss: v[3],
                    upland_charge: v[4],
                    subsurface_flow_volume: v[5],
                    solub_react_p: p.then(|| v[6]),
                    particulate_p: p.then(|| v[7]),
                    total_p: p.then(|| v[8]),
                });
            }
            Section::Classes => {
                let Some(v) = numeric_row(line) else { continue };
                if v.len() < 8 {
                    continue;
                }
                report.classes.push(SedimentClassRow {
                    class: v[0] as i32,
                    diameter: v[1],
                    specific_gravity: v[2],
                    pct_sand: v[3],
                    pct_silt: v[4],
                    pct_clay: v[5],
                    pct_om: v[6],
                    fraction: v[7],
                });
            }
        }
    }
    if report.hillslopes.is_empty() {
        return Err(Error::validation("loss_pw0.txt has no hillslope table"));
    }
    Ok(report)
}

pub fn read(path: &Path) -> Result<LossReport> {
    let text = fs::read_to_string(path).at(path)?;
    parse(&text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "\
 ANNUAL AVERAGE SUMMARIES

   Hillslopes
   ---------
   Hillslope  Runoff   Subrunoff  Baseflow  Soil     Sediment    Sediment
   ID         Volume   Volume     Volume    Loss     Deposition  Yield
              (m^3)    (m^3)      (m^3)     (kg)     (kg)        (kg)
   ----------------------------------------------------------------
     1        120.5    30.0       0.0       850.0    10.0        840.0
     2         80.0    12.5       0.0       400.0     0.0        400.0

   Channels and Impoundments
   ---------
   Channel  Discharge  Sediment  Soil   Upland   Subsurface
   ID       Volume     Yield     Loss   Charge   Flow Volume
            (m^3)      (tonne)   (kg)   (m^3)    (m^3)
   ----------------------------------------------------------------
     3      240.0      1.1       0.0    200.5    42.5

   OUTLET
   ------
   Avg. Ann. Precipitation volume in Contributing Area = 5000.0 m^3/yr
   Avg. Ann. water discharge from outlet = 240.0 m^3/yr
   Avg. Ann. sediment discharge from outlet = 1.1 tonne/yr
   Sediment Delivery Ratio for Watershed = 0.88

   Sediment particle information leaving the channel
   Class  Diameter  Specific  % Sand  % Silt  % Clay  % O.M.  Fraction
          (mm)      Gravity
     1    0.002     2.60      0.0     0.0     100.0   24.0    0.25
     2    0.010     2.65      0.0     100.0   0.0     0.0     0.75
";

    #[test]
    fn test_sections_are_parsed() {
        let r = parse(SAMPLE).unwrap();
        assert_eq!(r.hillslopes.len(), 2);
        assert_eq!(r.hillslope(1).unwrap().soil_loss, 850.0);
        assert_eq!(r.hillslope(2).unwrap().total_p, None);
        assert_eq!(r.channels.len(), 1);
        assert_eq!(r.channels[0].discharge_volume, 240.0);
        assert_eq!(r.outlet.len(), 4);
        assert_eq!(r.outlet_value("Avg. Ann. water discharge from outlet"), Some(240.0));
        assert_eq!(r.outlet[0].units, "m^3/yr");
        assert_eq!(r.outlet[3].units, "");
        assert_eq!(r.classes.len(), 2);
        assert_eq!(r.classes[1].fraction, 0.75);
    }

    #[test]
    fn test_phosphorus_columns_are_optional() {
        let text = "Hillslopes\n 1 1 0 0 5 0 5 0.1 0.2 0.3\n";
        let r = parse(text).unwrap();
        assert_eq!(r.hillslopes[0].total_p, Some(0.3));
    }

    #[test]
    fn test_short_row_and_empty_report_fail() {
        assert!(parse("Hillslopes\n 1 2 3\n").is_err());
        assert!(parse("nothing here\n").is_err());
    }
}
