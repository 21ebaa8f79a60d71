//! Columnar interchange artifacts under `wepp/output/interchange/`.

use crate::catalog::{self, CatalogRow, Column, ColumnarTable, get_f64, get_i32, get_opt_f64, get_str};
use crate::error::{IoContext, Result};
use crate::wepp::loss::{ChannelLossRow, HillLossRow, LossReport, OutletRow, SedimentClassRow};
use crate::wepp::totalwatsed::TotalWatSedRow;
use arrow::record_batch::RecordBatch;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const HILLSLOPE_LOSS: &str = "loss_pw0.hill.parquet";
pub const CHANNEL_LOSS: &str = "loss_pw0.chn.parquet";
pub const OUTLET_LOSS: &str = "loss_pw0.out.parquet";
pub const CLASS_DATA: &str = "loss_pw0.class_data.parquet";
pub const TOTALWATSED: &str = "totalwatsed.parquet";
pub const README: &str = "README.md";

pub fn interchange_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("interchange")
}

impl CatalogRow for HillLossRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("wepp_id", Column::I32(rows.iter().map(|r| r.wepp_id).collect()))
            .with("runoff_volume", Column::F64(rows.iter().map(|r| r.runoff_volume).collect()))
            .with("subrunoff_volume", Column::F64(rows.iter().map(|r| r.subrunoff_volume).collect()))
            .with("baseflow_volume", Column::F64(rows.iter().map(|r| r.baseflow_volume).collect()))
            .with("soil_loss", Column::F64(rows.iter().map(|r| r.soil_loss).collect()))
            .with("sediment_deposition", Column::F64(rows.iter().map(|r| r.sediment_deposition).collect()))
            .with("sediment_yield", Column::F64(rows.iter().map(|r| r.sediment_yield).collect()))
            .with("solub_react_p", Column::OptF64(rows.iter().map(|r| r.solub_react_p).collect()))
            .with("particulate_p", Column::OptF64(rows.iter().map(|r| r.particulate_p).collect()))
            .with("total_p", Column::OptF64(rows.iter().map(|r| r.total_p).collect()))
    }

    fn from_batch(b: &RecordBatch, i: usize) -> Result<Self> {
        Ok(HillLossRow {
            wepp_id: get_i32(b, "wepp_id", i)?,
            runoff_volume: get_f64(b, "runoff_volume", i)?,
            subrunoff_volume: get_f64(b, "subrunoff_volume", i)?,
            baseflow_volume: get_f64(b, "baseflow_volume", i)?,
            soil_loss: get_f64(b, "soil_loss", i)?,
            sediment_deposition: get_f64(b, "sediment_deposition", i)?,
            sediment_yield: get_f64(b, "sediment_yield", i)?,
            solub_react_p: get_opt_f64(b, "solub_react_p", i)?,
            particulate_p: get_opt_f64(b, "particulate_p", i)?,
            total_p: get_opt_f64(b, "total_p", i)?,
        })
    }
}

impl CatalogRow for ChannelLossRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("wepp_id", Column::I32(rows.iter().map(|r| r.wepp_id).collect()))
            .with("discharge_volume", Column::F64(rows.iter().map(|r| r.discharge_volume).collect()))
            .with("sediment_yield", Column::F64(rows.iter().map(|r| r.sediment_yield).collect()))
            .with("soil_loss", Column::F64(rows.iter().map(|r| r.soil_loss).collect()))
            .with("upland_charge", Column::F64(rows.iter().map(|r| r.upland_charge).collect()))
            .with(
                "subsurface_flow_volume",
                Column::F64(rows.iter().map(|r| r.subsurface_flow_volume).collect()),
            )
            .with("solub_react_p", Column::OptF64(rows.iter().map(|r| r.solub_react_p).collect()))
            .with("particulate_p", Column::OptF64(rows.iter().map(|r| r.particulate_p).collect()))
            .with("total_p", Column::OptF64(rows.iter().map(|r| r.total_p).collect()))
    }

    fn from_batch(b: &RecordBatch, i: usize) -> Result<Self> {
        Ok(ChannelLossRow {
            wepp_id: get_i32(b, "wepp_id", i)?,
            discharge_volume: get_f64(b, "discharge_volume", i)?,
            sediment_yield: get_f64(b, "sediment_yield", i)?,
            soil_loss: get_f64(b, "soil_loss", i)?,
            upland_charge: get_f64(b, "upland_charge", i)?,
            subsurface_flow_volume: get_f64(b, "subsurface_flow_volume", i)?,
            solub_react_p: get_opt_f64(b, "solub_react_p", i)?,
            particulate_p: get_opt_f64(b, "particulate_p", i)?,
            total_p: get_opt_f64(b, "total_p", i)?,
        })
    }
}

impl CatalogRow for OutletRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("key", Column::Str(rows.iter().map(|r| r.key.clone()).collect()))
            .with("value", Column::F64(rows.iter().map(|r| r.value).collect()))
            .with("units", Column::Str(rows.iter().map(|r| r.units.clone()).collect()))
    }

    fn from_batch(b: &RecordBatch, i: usize) -> Result<Self> {
        Ok(OutletRow {
            key: get_str(b, "key", i)?,
            value: get_f64(b, "value", i)?,
            units: get_str(b, "units", i)?,
        })
    }
}

impl CatalogRow for SedimentClassRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        ColumnarTable::new()
            .with("class", Column::I32(rows.iter().map(|r| r.class).collect()))
            .with("diameter", Column::F64(rows.iter().map(|r| r.diameter).collect()))
            .with("specific_gravity", Column::F64(rows.iter().map(|r| r.specific_gravity).collect()))
            .with("pct_sand", Column::F64(rows.iter().map(|r| r.pct_sand).collect()))
            .with("pct_silt", Column::F64(rows.iter().map(|r| r.pct_silt).collect()))
            .with("pct_clay", Column::F64(rows.iter().map(|r| r.pct_clay).collect()))
            .with("pct_om", Column::F64(rows.iter().map(|r| r.pct_om).collect()))
            .with("fraction", Column::F64(rows.iter().map(|r| r.fraction).collect()))
    }

    fn from_batch(b: &RecordBatch, i: usize) -> Result<Self> {
        Ok(SedimentClassRow {
            class: get_i32(b, "class", i)?,
            diameter: get_f64(b, "diameter", i)?,
            specific_gravity: get_f64(b, "specific_gravity", i)?,
            pct_sand: get_f64(b, "pct_sand", i)?,
            pct_silt: get_f64(b, "pct_silt", i)?,
            pct_clay: get_f64(b, "pct_clay", i)?,
            pct_om: get_f64(b, "pct_om", i)?,
            fraction: get_f64(b, "fraction", i)?,
        })
    }
}

impl CatalogRow for TotalWatSedRow {
    fn to_table(rows: &[Self]) -> ColumnarTable {
        let f = |g: fn(&TotalWatSedRow) -> f64| Column::F64(rows.iter().map(g).collect());
        let u = |g: fn(&TotalWatSedRow) -> u32| Column::I32(rows.iter().map(|r| g(r) as i32).collect());
        ColumnarTable::new()
            .with("year", Column::I32(rows.iter().map(|r| r.year).collect()))
            .with("julian", u(|r| r.julian))
            .with("month", u(|r| r.month))
            .with("day", u(|r| r.day))
            .with("water_year", Column::I32(rows.iter().map(|r| r.water_year).collect()))
            .with("area", f(|r| r.area))
            .with("precipitation", f(|r| r.precipitation))
            .with("rain_melt", f(|r| r.rain_melt))
            .with("runoff", f(|r| r.runoff))
            .with("lateral_flow", f(|r| r.lateral_flow))
            .with("percolation", f(|r| r.percolation))
            .with("evapotranspiration", f(|r| r.evapotranspiration))
            .with("soil_water", f(|r| r.soil_water))
            .with("snow_water", f(|r| r.snow_water))
            .with("baseflow", f(|r| r.baseflow))
            .with("gw_storage", f(|r| r.gw_storage))
            .with("deep_seepage", f(|r| r.deep_seepage))
            .with("streamflow", f(|r| r.streamflow))
    }

    fn from_batch(b: &RecordBatch, i: usize) -> Result<Self> {
        Ok(TotalWatSedRow {
            year: get_i32(b, "year", i)?,
            julian: get_i32(b, "julian", i)? as u32,
            month: get_i32(b, "month", i)? as u32,
            day: get_i32(b, "day", i)? as u32,
            water_year: get_i32(b, "water_year", i)?,
            area: get_f64(b, "area", i)?,
            precipitation: get_f64(b, "precipitation", i)?,
            rain_melt: get_f64(b, "rain_melt", i)?,
            runoff: get_f64(b, "runoff", i)?,
            lateral_flow: get_f64(b, "lateral_flow", i)?,
            percolation: get_f64(b, "percolation", i)?,
            evapotranspiration: get_f64(b, "evapotranspiration", i)?,
            soil_water: get_f64(b, "soil_water", i)?,
            snow_water: get_f64(b, "snow_water", i)?,
            baseflow: get_f64(b, "baseflow", i)?,
            gw_storage: get_f64(b, "gw_storage", i)?,
            deep_seepage: get_f64(b, "deep_seepage", i)?,
            streamflow: get_f64(b, "streamflow", i)?,
        })
    }
}

pub fn write_loss(dir: &Path, report: &LossReport) -> Result<()> {
    catalog::write_rows(&dir.join(HILLSLOPE_LOSS), &report.hillslopes)?;
    catalog::write_rows(&dir.join(CHANNEL_LOSS), &report.channels)?;
    catalog::write_rows(&dir.join(OUTLET_LOSS), &report.outlet)?;
    catalog::write_rows(&dir.join(CLASS_DATA), &report.classes)
}

pub fn write_totalwatsed(dir: &Path, rows: &[TotalWatSedRow]) -> Result<()> {
    catalog::write_rows(&dir.join(TOTALWATSED), rows)
}

/// `None` when the run has not produced the table.
pub fn read_totalwatsed(dir: &Path) -> Result<Option<Vec<TotalWatSedRow>>> {
    catalog::read_rows(&dir.join(TOTALWATSED))
}

pub fn read_hillslope_loss(dir: &Path) -> Result<Option<Vec<HillLossRow>>> {
    catalog::read_rows(&dir.join(HILLSLOPE_LOSS))
}

const SCHEMAS: &[(&str, &str, &[(&str, &str)])] = &[
    (
        HILLSLOPE_LOSS,
        "Average annual hillslope losses.",
        &[
            ("wepp_id", "int32"),
            ("runoff_volume", "float64, m^3"),
            ("subrunoff_volume", "float64, m^3"),
            ("baseflow_volume", "float64, m^3"),
            ("soil_loss", "float64, kg"),
            ("sediment_deposition", "float64, kg"),
            ("sediment_yield", "float64, kg"),
            ("solub_react_p", "float64 nullable, kg"),
            ("particulate_p", "float64 nullable, kg"),
            ("total_p", "float64 nullable, kg"),
        ],
    ),
    (
        CHANNEL_LOSS,
        "Average annual channel losses.",
        &[
            ("wepp_id", "int32"),
            ("discharge_volume", "float64, m^3"),
            ("sediment_yield", "float64, tonne"),
            ("soil_loss", "float64, kg"),
            ("upland_charge", "float64, m^3"),
            ("subsurface_flow_volume", "float64, m^3"),
            ("solub_react_p", "float64 nullable, kg"),
            ("particulate_p", "float64 nullable, kg"),
            ("total_p", "float64 nullable, kg"),
        ],
    ),
    (
        OUTLET_LOSS,
        "Outlet summary, one row per reported quantity.",
        &[("key", "utf8"), ("value", "float64"), ("units", "utf8")],
    ),
    (
        CLASS_DATA,
        "Particle classes of sediment leaving the outlet.",
        &[
            ("class", "int32"),
            ("diameter", "float64, mm"),
            ("specific_gravity", "float64"),
            ("pct_sand", "float64, %"),
            ("pct_silt", "float64, %"),
            ("pct_clay", "float64, %"),
            ("pct_om", "float64, %"),
            ("fraction", "float64"),
        ],
    ),
    (
        TOTALWATSED,
        "Daily watershed water balance. Depths are mm over the watershed area.",
        &[
            ("year, julian, month, day, water_year", "int32"),
            ("area", "float64, m^2"),
            ("precipitation, rain_melt, runoff, lateral_flow, percolation", "float64, mm"),
            ("evapotranspiration, soil_water, snow_water", "float64, mm"),
            ("baseflow, gw_storage, deep_seepage", "float64, mm"),
            ("streamflow", "float64, mm (runoff + lateral_flow + baseflow)"),
        ],
    ),
];

pub fn write_readme(dir: &Path) -> Result<()> {
    let mut s = String::from("# Interchange tables\n\n");
    for (file, about, columns) in SCHEMAS {
        let _ = writeln!(s, "## {}\n\n{}\n", file, about);
        let _ = writeln!(s, "| column | type |\n|---|---|");
        for (name, ty) in *columns {
            let _ = writeln!(s, "| {} | {} |", name, ty);
        }
        s.push('\n');
    }
    fs::create_dir_all(dir).at(dir)?;
    let path = dir.join(README);
    fs::write(&path, s).at(&path)
}
