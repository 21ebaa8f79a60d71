//! Daily watershed water balance (`totalwatsed`) aggregated from the
//! per-hillslope water-balance outputs, with a linear-reservoir baseflow.

use crate::error::{Error, IoContext, Result};
use crate::wepp::opts::BaseflowOpts;
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Minimum numeric columns of a water-balance data row.
const WAT_COLUMNS: usize = 20;

/// One OFE-day of a hillslope water-balance file. Depths in mm, area in m^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatRecord {
    pub ofe: i32,
    pub julian: u32,
    pub year: i32,
    pub precipitation: f64,
    pub rain_melt: f64,
    pub runoff: f64,
    pub transpiration: f64,
    pub soil_evaporation: f64,
    pub residue_evaporation: f64,
    pub percolation: f64,
    pub lateral_flow: f64,
    pub soil_water: f64,
    pub snow_water: f64,
    pub area: f64,
}

/// Parses the data rows of a water-balance file; headers are skipped.
pub fn parse_wat(text: &str) -> Result<Vec<WatRecord>> {
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < WAT_COLUMNS {
            continue;
        }
        let Some(v) = tokens
            .iter()
            .map(|t| t.parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()
        else {
            continue;
        };
        if v[1] < 1.0 || v[1] > 366.0 {
            return Err(Error::validation(format!(
                "water balance line {}: julian day {} out of range",
                lineno + 1,
                v[1]
            )));
        }
        out.push(WatRecord {
            ofe: v[0] as i32,
            julian: v[1] as u32,
            year: v[2] as i32,
            precipitation: v[3],
            rain_melt: v[4],
            runoff: v[5],
            transpiration: v[6],
            soil_evaporation: v[7],
            residue_evaporation: v[8],
            percolation: v[9],
            lateral_flow: v[12],
            soil_water: v[13],
            snow_water: v[15],
            area: v[19],
        });
    }
    Ok(out)
}

/// One day of the watershed balance. Depths in mm over the whole watershed.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalWatSedRow {
    pub year: i32,
    pub julian: u32,
    pub month: u32,
    pub day: u32,
    pub water_year: i32,
    /// m^2
    pub area: f64,
    pub precipitation: f64,
    pub rain_melt: f64,
    pub runoff: f64,
    pub lateral_flow: f64,
    pub percolation: f64,
    pub evapotranspiration: f64,
    pub soil_water: f64,
    pub snow_water: f64,
    pub baseflow: f64,
    pub gw_storage: f64,
    pub deep_seepage: f64,
    /// runoff + lateral flow + baseflow
    pub streamflow: f64,
}

impl TotalWatSedRow {
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Streamflow volume in m^3.
    pub fn streamflow_volume(&self) -> f64 {
        self.streamflow * self.area / 1000.0
    }
}

/// Water year of a day: days from the first of October count toward the
/// next year.
pub fn water_year(year: i32, julian: u32) -> i32 {
    if julian >= 274 { year + 1 } else { year }
}

#[derive(Default)]
struct DayVolumes {
    /// m^3 per quantity, summed over every OFE of every hillslope.
    precipitation: f64,
    rain_melt: f64,
    runoff: f64,
    lateral_flow: f64,
    percolation: f64,
    evapotranspiration: f64,
    soil_water: f64,
    snow_water: f64,
}

/// Area-weights the records into watershed depths and routes percolation
/// through the groundwater reservoir.
pub fn aggregate(records: &[WatRecord], total_area: f64, baseflow: &BaseflowOpts) -> Result<Vec<TotalWatSedRow>> {
    if total_area <= 0.0 {
        return Err(Error::validation("totalwatsed needs a positive watershed area"));
    }
    let mut days: BTreeMap<(i32, u32), DayVolumes> = BTreeMap::new();
    for r in records {
        let d = days.entry((r.year, r.julian)).or_default();
        let v = |mm: f64| mm * r.area / 1000.0;
        d.precipitation += v(r.precipitation);
        d.rain_melt += v(r.rain_melt);
        d.runoff += v(r.runoff);
        d.lateral_flow += v(r.lateral_flow);
        d.percolation += v(r.percolation);
        d.evapotranspiration += v(r.transpiration + r.soil_evaporation + r.residue_evaporation);
        d.soil_water += v(r.soil_water);
        d.snow_water += v(r.snow_water);
    }

    let bfcoeff = baseflow.bfcoeff.unwrap_or(BaseflowOpts::DEFAULT_BFCOEFF);
    let dscoeff = baseflow.dscoeff.unwrap_or(BaseflowOpts::DEFAULT_DSCOEFF);
    let threshold_ha = baseflow.bfthreshold.unwrap_or(BaseflowOpts::DEFAULT_BFTHRESHOLD);
    let reservoir_on = total_area / 10_000.0 >= threshold_ha;
    let mut gw = baseflow.gwstorage.unwrap_or(BaseflowOpts::DEFAULT_GWSTORAGE);

    let depth = |m3: f64| m3 / total_area * 1000.0;
    let mut rows = Vec::with_capacity(days.len());
    for ((year, julian), d) in days {
        let date = NaiveDate::from_yo_opt(year, julian).ok_or_else(|| {
            Error::validation(format!("day {} of year {} is not a date", julian, year))
        })?;
        let percolation = depth(d.percolation);
        gw += percolation;
        let bf = if reservoir_on { bfcoeff * gw } else { 0.0 };
        let seep = dscoeff * gw;
        gw = (gw - bf - seep).max(0.0);
        let runoff = depth(d.runoff);
        let lateral = depth(d.lateral_flow);
        rows.push(TotalWatSedRow {
            year,
            julian,
            month: date.month(),
            day: date.day(),
            water_year: water_year(year, julian),
            area: total_area,
            precipitation: depth(d.precipitation),
            rain_melt: depth(d.rain_melt),
            runoff,
            lateral_flow: lateral,
            percolation,
            evapotranspiration: depth(d.evapotranspiration),
            soil_water: depth(d.soil_water),
            snow_water: depth(d.snow_water),
            baseflow: bf,
            gw_storage: gw,
            deep_seepage: seep,
            streamflow: runoff + lateral + bf,
        });
    }
    Ok(rows)
}

pub fn wat_path(output_dir: &Path, wepp_id: i32) -> PathBuf {
    output_dir.join(format!("p{}.wat.out", wepp_id))
}

/// Reads `p{w}.wat.out` for every hillslope in parallel and aggregates.
pub fn build(
    output_dir: &Path,
    wepp_ids: &[i32],
    total_area: f64,
    baseflow: &BaseflowOpts,
) -> Result<Vec<TotalWatSedRow>> {
    let per_hill: Vec<Result<Vec<WatRecord>>> = wepp_ids
        .par_iter()
        .map(|w| {
            let path = wat_path(output_dir, *w);
            let text = fs::read_to_string(&path).at(&path)?;
            parse_wat(&text)
        })
        .collect();
    let mut records = Vec::new();
    for r in per_hill {
        records.extend(r?);
    }
    tracing::debug!(hillslopes = wepp_ids.len(), records = records.len(), "aggregating water balance");
    aggregate(&records, total_area, baseflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(ofe: i32, julian: u32, year: i32, p: f64, q: f64, dp: f64, latq: f64, area: f64) -> String {
        format!(
            "{} {} {} {} {} {} 0.5 0.2 0.1 {} 0 0 {} 150 0 0 0 0 0 {}\n",
            ofe, julian, year, p, p, q, dp, latq, area
        )
    }

    #[test]
    fn test_parse_skips_headers() {
        let text = format!(
            "Daily water balance\nOFE J Y P RM Q\n----\n{}{}",
            line(1, 1, 2000, 10.0, 2.0, 1.0, 0.5, 5000.0),
            line(1, 2, 2000, 0.0, 0.0, 0.0, 0.0, 5000.0)
        );
        let r = parse_wat(&text).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].runoff, 2.0);
        assert_eq!(r[0].lateral_flow, 0.5);
        assert_eq!(r[0].area, 5000.0);
    }

    #[test]
    fn test_area_weighting_and_streamflow() {
        let records = parse_wat(&format!(
            "{}{}",
            line(1, 1, 2000, 10.0, 4.0, 0.0, 0.0, 1000.0),
            line(1, 1, 2000, 10.0, 0.0, 0.0, 0.0, 3000.0)
        ))
        .unwrap();
        let opts = BaseflowOpts {
            gwstorage: Some(0.0),
            ..Default::default()
        };
        let rows = aggregate(&records, 4000.0, &opts).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].precipitation - 10.0).abs() < 1e-9);
        assert!((rows[0].runoff - 1.0).abs() < 1e-9);
        assert_eq!(rows[0].baseflow, 0.0);
        assert!((rows[0].streamflow - 1.0).abs() < 1e-9);
        assert_eq!((rows[0].month, rows[0].day), (1, 1));
    }

    #[test]
    fn test_reservoir_drains_and_respects_threshold() {
        let records = parse_wat(&format!(
            "{}{}",
            line(1, 1, 2000, 0.0, 0.0, 10.0, 0.0, 20_000.0),
            line(1, 2, 2000, 0.0, 0.0, 0.0, 0.0, 20_000.0)
        ))
        .unwrap();
        let opts = BaseflowOpts {
            gwstorage: Some(100.0),
            bfcoeff: Some(0.1),
            dscoeff: Some(0.0),
            bfthreshold: Some(1.0),
            ..Default::default()
        };
        let rows = aggregate(&records, 20_000.0, &opts).unwrap();
        assert!((rows[0].baseflow - 11.0).abs() < 1e-9);
        assert!((rows[0].gw_storage - 99.0).abs() < 1e-9);
        assert!((rows[1].baseflow - 9.9).abs() < 1e-9);

        let big_threshold = BaseflowOpts {
            bfthreshold: Some(5.0),
            ..opts
        };
        let rows = aggregate(&records, 20_000.0, &big_threshold).unwrap();
        assert!(rows.iter().all(|r| r.baseflow == 0.0));
    }

    #[test]
    fn test_water_year_boundary() {
        assert_eq!(water_year(2001, 273), 2001);
        assert_eq!(water_year(2001, 274), 2002);
    }
}
