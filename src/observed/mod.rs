//! Observed controller: fits simulated series against a user-supplied daily
//! record and writes per-measure comparison tables.

pub mod stats;

use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::nodb::prep::TaskEnum;
use crate::nodb::snapshot::atomic_write;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::watershed::Watershed;
use crate::wepp::Wepp;
use crate::wepp::interchange::read_totalwatsed;
use crate::wepp::totalwatsed::water_year;
use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use stats::{FitStats, fit};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const STREAMFLOW: &str = "Streamflow (mm)";
pub const SEDIMENT: &str = "Sed. Del (kg)";

/// Default channel output interval (s) when the run recorded none.
const DEFAULT_DTCHR: u32 = 600;

type Series = BTreeMap<NaiveDate, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeriesKind {
    Hillslopes,
    Channels,
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeriesKind::Hillslopes => "Hillslopes",
            SeriesKind::Channels => "Channels",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Aggregation {
    Daily,
    Yearly,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregation::Daily => "Daily",
            Aggregation::Yearly => "Yearly",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub series: SeriesKind,
    pub measure: String,
    pub aggregation: Aggregation,
    pub stats: FitStats,
}

impl FitReport {
    /// Comparison table name, `<series>-<measure>-<aggregation>.csv`.
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.csv", self.series, self.measure, self.aggregation)
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

/// Parses the observed record: a `Date` column followed by one column per
/// measure. Blank cells are missing values.
pub fn parse_observed(text: &str) -> Result<BTreeMap<String, Series>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = rdr.headers()?.clone();
    let date_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("date"))
        .ok_or_else(|| Error::validation("observed data has no Date column"))?;

    let mut measures: BTreeMap<String, Series> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != date_col && !h.is_empty())
        .map(|(_, h)| (h.to_string(), Series::new()))
        .collect();
    if measures.is_empty() {
        return Err(Error::validation("observed data has no measure columns"));
    }

    for (lineno, record) in rdr.records().enumerate() {
        let record = record?;
        let raw = record.get(date_col).unwrap_or_default();
        let date = parse_date(raw).ok_or_else(|| {
            Error::validation(format!("observed row {}: bad date `{}`", lineno + 2, raw))
        })?;
        for (i, h) in headers.iter().enumerate() {
            let Some(series) = measures.get_mut(h) else { continue };
            let cell = record.get(i).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            let v: f64 = cell.parse().map_err(|_| {
                Error::validation(format!("observed row {}: `{}` is not a number", lineno + 2, cell))
            })?;
            series.insert(date, v);
        }
    }
    Ok(measures)
}

/// Daily outlet series from the channel output. Data rows are
/// `year julian seconds channel discharge(m^3/s) [sediment(kg/s)]`; the
/// outlet is the highest channel id in the file.
pub fn channel_series(text: &str, dtchr: u32, area_m2: f64) -> Result<BTreeMap<String, Series>> {
    let rows: Vec<Vec<f64>> = text
        .lines()
        .filter_map(|l| {
            l.split_whitespace()
                .map(|t| t.parse::<f64>().ok())
                .collect::<Option<Vec<f64>>>()
        })
        .filter(|v| v.len() >= 5)
        .collect();
    let Some(outlet) = rows.iter().map(|v| v[3] as i32).max() else {
        return Err(Error::validation("channel output has no data rows"));
    };
    if area_m2 <= 0.0 {
        return Err(Error::validation("channel series needs a positive watershed area"));
    }

    let dt = dtchr as f64;
    let mut flow = Series::new();
    let mut sediment = Series::new();
    for v in rows.iter().filter(|v| v[3] as i32 == outlet) {
        let date = NaiveDate::from_yo_opt(v[0] as i32, v[1] as u32).ok_or_else(|| {
            Error::validation(format!("day {} of year {} is not a date", v[1], v[0]))
        })?;
        *flow.entry(date).or_insert(0.0) += v[4] * dt / area_m2 * 1000.0;
        if let Some(sed) = v.get(5) {
            *sediment.entry(date).or_insert(0.0) += sed * dt;
        }
    }
    let mut out = BTreeMap::from([(STREAMFLOW.to_string(), flow)]);
    if !sediment.is_empty() {
        out.insert(SEDIMENT.to_string(), sediment);
    }
    Ok(out)
}

fn water_year_of(date: NaiveDate) -> i32 {
    water_year(date.year(), date.ordinal())
}

/// Observed and simulated values on the dates both series share.
fn pair_daily(observed: &Series, simulated: &Series) -> Vec<(NaiveDate, f64, f64)> {
    observed
        .iter()
        .filter_map(|(d, o)| simulated.get(d).map(|s| (*d, *o, *s)))
        .collect()
}

/// Water-year totals of the paired days.
fn pair_yearly(daily: &[(NaiveDate, f64, f64)]) -> Vec<(i32, f64, f64)> {
    let mut years: BTreeMap<i32, (f64, f64)> = BTreeMap::new();
    for (d, o, s) in daily {
        let e = years.entry(water_year_of(*d)).or_insert((0.0, 0.0));
        e.0 += o;
        e.1 += s;
    }
    years.into_iter().map(|(y, (o, s))| (y, o, s)).collect()
}

fn write_daily(path: &Path, rows: &[(NaiveDate, f64, f64)]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(Vec::new());
    wtr.write_record(["date", "water_year", "observed", "simulated"])?;
    for (d, o, s) in rows {
        wtr.write_record([
            d.format("%Y-%m-%d").to_string(),
            water_year_of(*d).to_string(),
            o.to_string(),
            s.to_string(),
        ])?;
    }
    let bytes = wtr.into_inner().map_err(|e| Error::validation(e.to_string()))?;
    atomic_write(path, &bytes)
}

fn write_yearly(path: &Path, rows: &[(i32, f64, f64)]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(Vec::new());
    wtr.write_record(["water_year", "observed", "simulated"])?;
    for (y, o, s) in rows {
        wtr.write_record([y.to_string(), o.to_string(), s.to_string()])?;
    }
    let bytes = wtr.into_inner().map_err(|e| Error::validation(e.to_string()))?;
    atomic_write(path, &bytes)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed {
    #[serde(skip)]
    wd: PathBuf,
    measures: Vec<String>,
    reports: Vec<FitReport>,
}

impl NoDb for Observed {
    const KIND: ControllerKind = ControllerKind::Observed;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[("\"results\"", "\"reports\"")]
    }
}

impl Observed {
    pub fn new(wd: &Path) -> Self {
        Observed {
            wd: wd.to_path_buf(),
            measures: Vec::new(),
            reports: Vec::new(),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("observed")
    }

    pub fn observed_path(&self) -> PathBuf {
        self.dir().join("observed.csv")
    }

    pub fn has_observed(&self) -> bool {
        self.observed_path().exists()
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn reports(&self) -> &[FitReport] {
        &self.reports
    }

    /// Validates and stores the observed record, dropping earlier fits.
    pub fn set_observed(&mut self, ctx: &RunContext, text: &str) -> Result<()> {
        let parsed = parse_observed(text)?;
        self.locked(|o| {
            atomic_write(&o.observed_path(), text.as_bytes())?;
            o.measures = parsed.keys().cloned().collect();
            o.reports.clear();
            o.log_status(&format!("observed data with {} measures", o.measures.len()))
        })?;
        ctx.prep().remove_timestamp(TaskEnum::RunObserved)
    }

    /// Fits every observed measure against the hillslope-aggregated and the
    /// channel series. Measures without a simulated counterpart are skipped.
    pub fn run_model_fit(&mut self, ctx: &RunContext) -> Result<()> {
        timed("observed.run_model_fit", || {
            let wepp: Wepp = ctx.load()?;
            wepp.require_run()?;
            if !self.has_observed() {
                return Err(Error::precondition("no observed data has been provided"));
            }
            let path = self.observed_path();
            let observed = parse_observed(&fs::read_to_string(&path).at(&path)?)?;
            let watershed: Watershed = ctx.load()?;

            let mut simulated: Vec<(SeriesKind, BTreeMap<String, Series>)> = Vec::new();
            match read_totalwatsed(&wepp.interchange_dir())? {
                Some(rows) => {
                    let flow: Series = rows
                        .iter()
                        .filter_map(|r| r.date().map(|d| (d, r.streamflow)))
                        .collect();
                    simulated.push((
                        SeriesKind::Hillslopes,
                        BTreeMap::from([(STREAMFLOW.to_string(), flow)]),
                    ));
                }
                None => tracing::warn!("no totalwatsed table, hillslope fits skipped"),
            }
            let chan_out = wepp.output_dir().join("pw0.chan.out");
            if chan_out.exists() {
                let text = fs::read_to_string(&chan_out).at(&chan_out)?;
                let dtchr = wepp.dtchr().unwrap_or(DEFAULT_DTCHR);
                simulated.push((
                    SeriesKind::Channels,
                    channel_series(&text, dtchr, watershed.total_area())?,
                ));
            } else {
                tracing::warn!("no channel output, channel fits skipped");
            }

            self.locked(|o| {
                let dir = o.dir();
                let mut reports = Vec::new();
                for (kind, sims) in &simulated {
                    for (measure, obs) in &observed {
                        let Some(sim) = sims.get(measure) else {
                            tracing::debug!(series = %kind, measure = %measure, "no simulated series");
                            continue;
                        };
                        let daily = pair_daily(obs, sim);
                        if daily.is_empty() {
                            tracing::warn!(series = %kind, measure = %measure, "observed and simulated dates do not overlap");
                            continue;
                        }
                        let yearly = pair_yearly(&daily);
                        let day_pairs: Vec<(f64, f64)> = daily.iter().map(|(_, o, s)| (*o, *s)).collect();
                        let year_pairs: Vec<(f64, f64)> = yearly.iter().map(|(_, o, s)| (*o, *s)).collect();

                        let day_report = FitReport {
                            series: *kind,
                            measure: measure.clone(),
                            aggregation: Aggregation::Daily,
                            stats: fit(&day_pairs),
                        };
                        write_daily(&dir.join(day_report.file_name()), &daily)?;
                        let year_report = FitReport {
                            aggregation: Aggregation::Yearly,
                            stats: fit(&year_pairs),
                            ..day_report.clone()
                        };
                        write_yearly(&dir.join(year_report.file_name()), &yearly)?;
                        reports.push(day_report);
                        reports.push(year_report);
                    }
                }
                o.reports = reports;
                o.log_status(&format!("{} fits computed", o.reports.len()))
            })?;
            ctx.prep().timestamp(TaskEnum::RunObserved)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_observed_skips_blank_cells() {
        let text = "Date,Streamflow (mm),Sed. Del (kg)\n2001-01-01,1.5,\n01/02/2001,2.0,30\n";
        let m = parse_observed(text).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m[STREAMFLOW].len(), 2);
        assert_eq!(m[SEDIMENT].len(), 1);
        let d = NaiveDate::from_ymd_opt(2001, 1, 2).unwrap();
        assert_eq!(m[SEDIMENT][&d], 30.0);
    }

    #[test]
    fn test_parse_observed_rejects_bad_rows() {
        assert!(parse_observed("When,Q\n2001-01-01,1\n").is_err());
        assert!(parse_observed("Date,Q\nyesterday,1\n").is_err());
        assert!(parse_observed("Date,Q\n2001-01-01,lots\n").is_err());
    }

    #[test]
    fn test_channel_series_sums_intervals_at_outlet() {
        // two 600 s intervals on day 1 at the outlet (24), one upstream row
        let text = "year day sec chn Q sed\n2001 1 600 24 1.0 0.5\n2001 1 1200 24 3.0 0.5\n2001 1 600 14 9.0 9.0\n";
        let s = channel_series(text, 600, 1_200_000.0).unwrap();
        let d = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
        // (1 + 3) * 600 m^3 over 1.2 km^2 = 2 mm
        assert!((s[STREAMFLOW][&d] - 2.0).abs() < 1e-9);
        assert!((s[SEDIMENT][&d] - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_yearly_pairs_follow_water_years() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let daily = vec![(d(2001, 9, 30), 1.0, 2.0), (d(2001, 10, 1), 3.0, 4.0), (d(2002, 1, 1), 5.0, 6.0)];
        let yearly = pair_yearly(&daily);
        assert_eq!(yearly, vec![(2001, 1.0, 2.0), (2002, 8.0, 10.0)]);
    }
}
