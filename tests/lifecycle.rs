mod common;

use common::*;
use std::fs;
use wepprun_rs::NoDb;
use wepprun_rs::landuse::{self, Landuse};
use wepprun_rs::nodb::prep::TaskEnum;
use wepprun_rs::observed::{Observed, SeriesKind};
use wepprun_rs::soils::{self, Soils};
use wepprun_rs::watershed::abstraction::StructureEntry;
use wepprun_rs::watershed::{self, Watershed};
use wepprun_rs::wepp::Wepp;
use wepprun_rs::wepp::return_periods::{Measure, ReturnPeriodParams};

#[test]
fn test_delineation_and_abstraction() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    delineate(&ctx).unwrap();

    let watershed: Watershed = ctx.load().unwrap();
    assert!(watershed.is_abstracted());
    assert_eq!(watershed.hillslope_count(), HILLSLOPES.len());
    assert_eq!(watershed.sub_summary(12).unwrap().area, 8.0 * CELLSIZE * CELLSIZE);
    assert_eq!(watershed.total_area(), 34.0 * CELLSIZE * CELLSIZE);

    let translator = watershed.translator().unwrap();
    assert_eq!(translator.wepp(11), Some(1));
    assert_eq!(translator.wepp(23), Some(6));
    assert_eq!(translator.wepp(24), Some(7));
    assert_eq!(translator.wepp(14), Some(8));

    for t in HILLSLOPES {
        assert!(watershed.hill_slope_path(t).exists(), "no slope file for {}", t);
    }
    assert!(ctx.prep().get_timestamp(TaskEnum::AbstractWatershed).is_some());
}

#[test]
fn test_structure_file_matches_snapshot() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    delineate(&ctx).unwrap();

    let watershed: Watershed = ctx.load().unwrap();
    let text = fs::read_to_string(watershed.structure_path()).unwrap();
    let entries: Vec<StructureEntry> = serde_json::from_str(&text).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.as_slice(), watershed.structure());
}

#[test]
fn test_inputs_are_assigned_per_hillslope() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());

    let landuse: Landuse = ctx.load().unwrap();
    assert_eq!(landuse.dominant(12), Some(FOREST));
    assert_eq!(landuse.dominant(22), Some(FOREST));
    assert_eq!(landuse.dominant(13), Some(SHRUB));
    assert_eq!(landuse.dominant(11), Some(SHRUB));
    assert_eq!(landuse.domlc_d().len(), HILLSLOPES.len());
    assert!(landuse.management(FOREST).is_some());

    let soils: Soils = ctx.load().unwrap();
    assert!(soils.domsoil_d().values().all(|k| k == MUKEY));
    let summary = soils.summary(MUKEY).unwrap();
    assert_eq!(summary.texture.as_deref(), Some("silt loam"));
    assert!(soils.soil_path(MUKEY).exists());

    let lu_row = landuse::landuse_summary(ctx.wd(), 12).unwrap().unwrap();
    assert_eq!(lu_row.key, FOREST);
    let soil_row = soils::soil_summary(ctx.wd(), 13).unwrap().unwrap();
    assert_eq!(soil_row.mukey, MUKEY);
}

#[test]
fn test_full_pipeline_runs_and_ingests() {
    let fakes = Fakes::default();
    let engine = fakes.engine.clone();
    let (_tmp, ctx) = prepared_run(test_config(), fakes);

    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), HILLSLOPES.len() + 1);
    assert_eq!(calls.last().map(String::as_str), Some("pw0"));
    for w in 1..=HILLSLOPES.len() {
        assert!(calls.contains(&format!("p{}", w)));
    }

    let wepp: Wepp = ctx.load().unwrap();
    assert!(wepp.has_run());
    let out = wepp.output_dir();
    assert!(out.join("p1.wat.out").exists());
    assert!(out.join("pw0.chan.out").exists());
    assert!(!wepp.runs_dir().join("p1.wat.out").exists());
    assert!(wepp.plots_dir().join("loss.asc").exists());
    assert!(wepp.plots_dir().join("loss.WGS.asc").exists());
    assert!(ctx.prep().get_timestamp(TaskEnum::RunWepp).is_some());

    let report = wepp.loss_report().unwrap();
    assert_eq!(report.hillslopes.len(), HILLSLOPES.len());
    assert_eq!(report.channels.len(), 2);
    assert_eq!(report.hillslope(3).unwrap().soil_loss, 300.0);
    assert_eq!(
        report.outlet_value("Avg. Ann. water discharge from outlet"),
        Some(240.0)
    );
}

fn modified(path: &std::path::Path) -> std::time::SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn test_outputs_are_newer_than_their_inputs() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let wepp: Wepp = ctx.load().unwrap();
    let runs = wepp.runs_dir();
    let out = wepp.output_dir();
    for w in 1..=HILLSLOPES.len() {
        let produced = modified(&out.join(format!("p{}.wat.out", w)));
        for ext in ["run", "man", "sol", "cli", "slp"] {
            assert!(produced >= modified(&runs.join(format!("p{}.{}", w, ext))), "p{}.{}", w, ext);
        }
    }
    let outlet = modified(&out.join("loss_pw0.txt"));
    for name in ["pw0.run", "pw0.man", "pw0.sol", "pw0.cli", "p1.pass.dat"] {
        assert!(outlet >= modified(&runs.join(name)), "{}", name);
    }
    for w in 1..=HILLSLOPES.len() {
        assert!(outlet >= modified(&out.join(format!("p{}.wat.out", w))));
    }

    let ran = ctx.prep().get_timestamp(TaskEnum::RunWepp).unwrap();
    for task in [
        TaskEnum::AbstractWatershed,
        TaskEnum::BuildLanduse,
        TaskEnum::BuildSoils,
        TaskEnum::BuildClimate,
    ] {
        assert!(ran >= ctx.prep().get_timestamp(task).unwrap(), "{}", task);
    }
}

#[test]
fn test_coverage_accounts_for_the_whole_watershed() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let watershed: Watershed = ctx.load().unwrap();
    let total = watershed.total_area();
    assert!(total > 0.0);

    let landuse: Landuse = ctx.load().unwrap();
    let pct: f64 = landuse.managements().map(|m| m.pct_coverage).sum();
    let area: f64 = landuse.managements().map(|m| m.area).sum();
    assert!((pct - 100.0).abs() < 1e-6, "{}", pct);
    assert!((area - total).abs() < 1e-6 * total, "{} vs {}", area, total);

    let soils: Soils = ctx.load().unwrap();
    let pct: f64 = soils.summaries().map(|s| s.pct_coverage).sum();
    let area: f64 = soils.summaries().map(|s| s.area).sum();
    assert!((pct - 100.0).abs() < 1e-6, "{}", pct);
    assert!((area - total).abs() < 1e-6 * total, "{} vs {}", area, total);
}

#[test]
fn test_return_periods_rank_outlet_events() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let params = ReturnPeriodParams {
        recurrence: vec![2.0],
        ..ReturnPeriodParams::default()
    };
    let rp = wepp.return_periods(&ctx, &params).unwrap();
    assert_eq!(rp.years, 2);
    assert_eq!(rp.num_events, 4);
    let runoff = &rp.measures[&Measure::Runoff];
    assert_eq!(runoff.len(), 1);
    assert_eq!(runoff[0].value, 300.0);
    assert_eq!(runoff[0].rank, 1);
    assert_eq!(runoff[0].year, 2);
    assert!(!rp.measures.contains_key(&Measure::TotalP));
    assert!(ctx.prep().get_timestamp(TaskEnum::ReturnPeriods).is_some());

    // served from the cache once computed
    fs::remove_file(wepp.output_dir().join("ebe_pw0.txt")).unwrap();
    let again = wepp.return_periods(&ctx, &params).unwrap();
    assert_eq!(again, rp);
}

#[test]
fn test_catalog_lookup_falls_back_to_controller() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let wd = ctx.wd();

    let hill = watershed::hillslope_summary(wd, 22).unwrap().unwrap();
    let chn = watershed::channel_summary(wd, 24).unwrap().unwrap();
    let lu = landuse::landuse_summary(wd, 22).unwrap().unwrap();
    let soil = soils::soil_summary(wd, 22).unwrap().unwrap();
    assert_eq!(lu.key, FOREST);
    assert_eq!(soil.mukey, MUKEY);

    for path in [
        Watershed::hillslopes_parquet(wd),
        Watershed::channels_parquet(wd),
        Landuse::parquet_path(wd),
        Soils::parquet_path(wd),
    ] {
        fs::remove_file(path).unwrap();
    }
    assert_eq!(watershed::hillslope_summary(wd, 22).unwrap(), Some(hill));
    assert_eq!(watershed::channel_summary(wd, 24).unwrap(), Some(chn));
    assert_eq!(landuse::landuse_summary(wd, 22).unwrap(), Some(lu));
    assert_eq!(soils::soil_summary(wd, 22).unwrap(), Some(soil));

    assert!(watershed::hillslope_summary(wd, 999).unwrap().is_none());
    assert!(landuse::landuse_summary(wd, 999).unwrap().is_none());
}

#[test]
fn test_observed_model_fit() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let mut csv = String::from("Date,Streamflow (mm)\n");
    for day in 1..=5 {
        csv.push_str(&format!("2001-01-0{},{}\n", day, day as f64 * 0.01));
    }
    let mut observed: Observed = ctx.load().unwrap();
    observed.set_observed(&ctx, &csv).unwrap();
    observed.run_model_fit(&ctx).unwrap();

    let observed: Observed = ctx.load().unwrap();
    let reports = observed.reports();
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().any(|r| r.series == SeriesKind::Hillslopes));
    assert!(reports.iter().any(|r| r.series == SeriesKind::Channels));
    for r in reports {
        assert!(observed.dir().join(r.file_name()).exists(), "{}", r.file_name());
    }
    assert!(ctx.prep().get_timestamp(TaskEnum::RunObserved).is_some());
}

#[test]
fn test_reopened_run_sees_persisted_state() {
    let (tmp, ctx) = prepared_run(test_config(), Fakes::default());
    drop(ctx);

    let landuse = Landuse::get_instance(tmp.path()).unwrap();
    assert_eq!(landuse.dominant(22), Some(FOREST));
    let watershed = Watershed::get_instance(tmp.path()).unwrap();
    assert_eq!(watershed.hillslope_count(), HILLSLOPES.len());
}
