//! Return periods of watershed events from the event-by-event outlet file
//! (`ebe_pw0.txt`), memoized on disk per parameter set.

use crate::error::{Error, IoContext, Result};
use crate::nodb::snapshot::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

pub const CACHE_FILE: &str = "return_periods_cache.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// m^3
    Runoff,
    /// m^3/s
    PeakDischarge,
    /// kg
    SedimentYield,
    SolubleP,
    ParticulateP,
    TotalP,
}

impl Measure {
    pub const ALL: [Measure; 6] = [
        Measure::Runoff,
        Measure::PeakDischarge,
        Measure::SedimentYield,
        Measure::SolubleP,
        Measure::ParticulateP,
        Measure::TotalP,
    ];
}

/// One outlet event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub day: u32,
    pub month: u32,
    /// Simulation year index.
    pub year: i32,
    pub precipitation: f64,
    pub runoff: f64,
    pub peak_discharge: f64,
    pub sediment_yield: f64,
    pub soluble_p: Option<f64>,
    pub particulate_p: Option<f64>,
    pub total_p: Option<f64>,
}

impl Event {
    pub fn value(&self, m: Measure) -> Option<f64> {
        match m {
            Measure::Runoff => Some(self.runoff),
            Measure::PeakDischarge => Some(self.peak_discharge),
            Measure::SedimentYield => Some(self.sediment_yield),
            Measure::SolubleP => self.soluble_p,
            Measure::ParticulateP => self.particulate_p,
            Measure::TotalP => self.total_p,
        }
    }
}

/// Data rows: `day month year precip runoff peak sediment [srp pp tp]`.
pub fn parse_ebe(text: &str) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let Some(v) = line
            .split_whitespace()
            .map(|t| t.parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()
        else {
            continue;
        };
        if v.is_empty() {
            continue;
        }
        if v.len() < 7 {
            return Err(Error::validation(format!(
                "ebe_pw0.txt line {}: expected at least 7 columns, got {}",
                lineno + 1,
                v.len()
            )));
        }
        let p = v.len() >= 10;
        events.push(Event {
            day: v[0] as u32,
            month: v[1] as u32,
            year: v[2] as i32,
            precipitation: v[3],
            runoff: v[4],
            peak_discharge: v[5],
            sediment_yield: v[6],
            soluble_p: p.then(|| v[7]),
            particulate_p: p.then(|| v[8]),
            total_p: p.then(|| v[9]),
        });
    }
    Ok(events)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPeriodParams {
    pub measures: Vec<Measure>,
    /// Recurrence intervals to report, years.
    pub recurrence: Vec<f64>,
    pub exclude_yr_indxs: Vec<i32>,
    pub exclude_months: Vec<u32>,
    /// Events below this value of the measure are left out of its ranking.
    pub threshold: Option<f64>,
    pub gringorten: bool,
}

impl Default for ReturnPeriodParams {
    fn default() -> Self {
        ReturnPeriodParams {
            measures: Measure::ALL.to_vec(),
            recurrence: vec![2.0, 5.0, 10.0, 20.0, 25.0, 50.0, 100.0],
            exclude_yr_indxs: Vec::new(),
            exclude_months: Vec::new(),
            threshold: None,
            gringorten: false,
        }
    }
}

impl ReturnPeriodParams {
    /// Canonical cache key: sorted, de-duplicated parameters serialized.
    pub fn cache_key(&self) -> Result<String> {
        let mut canon = self.clone();
        canon.measures = canon.measures.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        canon.recurrence.sort_by(f64::total_cmp);
        canon.recurrence.dedup();
        canon.exclude_yr_indxs = canon
            .exclude_yr_indxs
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        canon.exclude_months = canon
            .exclude_months
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(serde_json::to_string(&canon)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPeriodRow {
    pub recurrence: f64,
    pub value: f64,
    pub rank: usize,
    /// Return period of the selected event under the estimator.
    pub period: f64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPeriods {
    pub years: usize,
    pub num_events: usize,
    pub gringorten: bool,
    pub measures: BTreeMap<Measure, Vec<ReturnPeriodRow>>,
}

pub fn period(years: usize, rank: usize, gringorten: bool) -> f64 {
    let (y, r) = (years as f64, rank as f64);
    if gringorten {
        (y + 0.12) / (r - 0.44)
    } else {
        (y + 1.0) / r
    }
}

pub fn compute(events: &[Event], params: &ReturnPeriodParams) -> Result<ReturnPeriods> {
    let all_years: BTreeSet<i32> = events.iter().map(|e| e.year).collect();
    let (Some(first), Some(last)) = (all_years.first(), all_years.last()) else {
        return Err(Error::precondition("no events to analyse"));
    };
    let excluded: BTreeSet<i32> = params.exclude_yr_indxs.iter().copied().collect();
    let years = (*first..=*last).filter(|y| !excluded.contains(y)).count();
    if years == 0 {
        return Err(Error::validation("every simulated year is excluded"));
    }
    let kept: Vec<&Event> = events
        .iter()
        .filter(|e| !excluded.contains(&e.year) && !params.exclude_months.contains(&e.month))
        .collect();

    let mut measures = BTreeMap::new();
    for m in &params.measures {
        let mut ranked: Vec<(&Event, f64)> = kept
            .iter()
            .filter_map(|e| e.value(*m).map(|v| (*e, v)))
            .filter(|(_, v)| params.threshold.is_none_or(|t| *v >= t))
            .collect();
        if ranked.is_empty() {
            continue;
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut rows = Vec::new();
        for &t in &params.recurrence {
            // least extreme event whose return period still reaches t
            let hit = ranked
                .iter()
                .enumerate()
                .map(|(i, (e, v))| (i + 1, e, *v, period(years, i + 1, params.gringorten)))
                .take_while(|(_, _, _, p)| *p >= t)
                .last();
            if let Some((rank, e, value, p)) = hit {
                rows.push(ReturnPeriodRow {
                    recurrence: t,
                    value,
                    rank,
                    period: p,
                    year: e.year,
                    month: e.month,
                    day: e.day,
                });
            }
        }
        measures.insert(*m, rows);
    }
    Ok(ReturnPeriods {
        years,
        num_events: kept.len(),
        gringorten: params.gringorten,
        measures,
    })
}

/// Computes from `ebe` unless `cache` already holds a result for `params`.
pub fn cached(ebe: &Path, cache: &Path, params: &ReturnPeriodParams) -> Result<ReturnPeriods> {
    let key = params.cache_key()?;
    let mut entries: BTreeMap<String, ReturnPeriods> = match fs::read_to_string(cache) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(path = %cache.display(), "discarding unreadable cache: {}", e);
            BTreeMap::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(e).at(cache),
    };
    if let Some(hit) = entries.get(&key) {
        tracing::debug!("return periods served from cache");
        return Ok(hit.clone());
    }
    let text = fs::read_to_string(ebe).at(ebe)?;
    let result = compute(&parse_ebe(&text)?, params)?;
    entries.insert(key, result.clone());
    atomic_write(cache, serde_json::to_string_pretty(&entries)?.as_bytes())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ebe(years: i32) -> String {
        let mut s = String::from("EVENT OUTPUT\nday mo year precip runoff peak sed\n");
        for y in 1..=years {
            // one event per year, larger each year
            s.push_str(&format!("15 6 {} 20.0 {} 0.5 {}\n", y, 100.0 * y as f64, 10.0 * y as f64));
        }
        s
    }

    #[test]
    fn test_cta_ranking() {
        let events = parse_ebe(&ebe(9)).unwrap();
        let params = ReturnPeriodParams {
            measures: vec![Measure::Runoff],
            recurrence: vec![2.0, 5.0, 10.0],
            ..Default::default()
        };
        let r = compute(&events, &params).unwrap();
        assert_eq!(r.years, 9);
        let rows = &r.measures[&Measure::Runoff];
        // T = 10 / rank: rank 5 -> 2.0, rank 2 -> 5.0, rank 1 -> 10.0
        assert_eq!(rows[0].rank, 5);
        assert_eq!(rows[0].value, 500.0);
        assert_eq!(rows[1].rank, 2);
        assert_eq!(rows[2].rank, 1);
        assert_eq!(rows[2].value, 900.0);
        assert!(!r.measures.contains_key(&Measure::TotalP));
    }

    #[test]
    fn test_gringorten_and_exclusions() {
        assert!((period(9, 1, true) - 9.12 / 0.56).abs() < 1e-12);
        let events = parse_ebe(&ebe(9)).unwrap();
        let params = ReturnPeriodParams {
            measures: vec![Measure::SedimentYield],
            recurrence: vec![2.0],
            exclude_yr_indxs: vec![9],
            threshold: Some(30.0),
            ..Default::default()
        };
        let r = compute(&events, &params).unwrap();
        assert_eq!(r.years, 8);
        let rows = &r.measures[&Measure::SedimentYield];
        // 8 years, T = 9 / rank >= 2 up to rank 4: 80, 70, 60, 50
        assert_eq!(rows[0].value, 50.0);
    }

    #[test]
    fn test_cache_key_is_canonical() {
        let a = ReturnPeriodParams {
            exclude_months: vec![7, 1, 7],
            ..Default::default()
        };
        let b = ReturnPeriodParams {
            exclude_months: vec![1, 7],
            ..Default::default()
        };
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }

    #[test]
    fn test_cached_result_survives_source_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("ebe_pw0.txt");
        let cache = tmp.path().join(CACHE_FILE);
        fs::write(&src, ebe(5)).unwrap();
        let params = ReturnPeriodParams::default();
        let first = cached(&src, &cache, &params).unwrap();
        fs::remove_file(&src).unwrap();
        assert_eq!(cached(&src, &cache, &params).unwrap(), first);
        let other = ReturnPeriodParams {
            gringorten: true,
            ..Default::default()
        };
        assert!(cached(&src, &cache, &other).is_err());
    }
}
