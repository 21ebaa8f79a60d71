mod common;

use common::*;
use std::collections::BTreeMap;
use wepprun_rs::NoDb;
use wepprun_rs::landuse::Landuse;
use wepprun_rs::nodb::prep::PrepAttr;
use wepprun_rs::plugins::disturbed::{BurnClass, Disturbed};
use wepprun_rs::soils::Soils;
use wepprun_rs::wepp::Wepp;

fn disturbed_config() -> wepprun_rs::config::RunConfig {
    let mut cfg = test_config();
    cfg.general.mods.push("disturbed".to_string());
    cfg
}

/// Delineated run with the burn severity map attached, inputs not yet built.
fn burned_run() -> (tempfile::TempDir, wepprun_rs::RunContext) {
    let (tmp, ctx) = init(disturbed_config(), Fakes::default());
    delineate(&ctx).unwrap();
    let sbs = tmp.path().join("upload").join("sbs.asc");
    write_sbs(&sbs);
    let mut disturbed: Disturbed = ctx.load().unwrap();
    disturbed.set_sbs(&ctx, &sbs).unwrap();
    build_inputs(&ctx).unwrap();
    (tmp, ctx)
}

#[test]
fn test_disturbed_controller_created_on_init() {
    let (tmp, ctx) = init(disturbed_config(), Fakes::default());
    assert!(Disturbed::exists(tmp.path()));
    assert!(ctx.prep().get_attr(PrepAttr::SbsRequired));
    assert!(!ctx.prep().get_attr(PrepAttr::HasSbs));

    let (tmp, _ctx) = init(test_config(), Fakes::default());
    assert!(!Disturbed::exists(tmp.path()));
}

#[test]
fn test_burned_hillslopes_get_fire_landcover() {
    let (_tmp, ctx) = burned_run();
    assert!(ctx.prep().get_attr(PrepAttr::HasSbs));

    let disturbed: Disturbed = ctx.load().unwrap();
    assert_eq!(disturbed.burn_class(12), BurnClass::High);
    assert_eq!(disturbed.burn_class(22), BurnClass::High);
    assert_eq!(disturbed.burn_class(13), BurnClass::Unburned);

    let landuse: Landuse = ctx.load().unwrap();
    assert_eq!(landuse.dominant(12), Some("105"));
    assert_eq!(landuse.dominant(22), Some("105"));
    assert_eq!(landuse.dominant(13), Some(SHRUB));
    let fire = landuse.management("105").unwrap();
    assert_eq!(fire.disturbed_class(), Some("forest high sev fire"));
}

#[test]
fn test_soils_specialized_by_landcover() {
    let (_tmp, ctx) = burned_run();

    let soils: Soils = ctx.load().unwrap();
    let burned_key = format!("{}-silt_loam-105", MUKEY);
    assert_eq!(soils.mukey(12), Some(burned_key.as_str()));
    assert_eq!(soils.mukey(13), Some(format!("{}-silt_loam-{}", MUKEY, SHRUB).as_str()));
    assert!(soils.soil_path(&burned_key).exists());
    assert!(soils.summary(&burned_key).is_some());
    // the as-built assignment is kept for later rebuilds
    assert!(soils.ssurgo_domsoil_d().values().all(|k| k == MUKEY));

    let mut disturbed: Disturbed = ctx.load().unwrap();
    assert_eq!(disturbed.specialized(), HILLSLOPES.len());

    // a second pass over the same assignment changes nothing
    assert_eq!(disturbed.on_soils_build(&ctx).unwrap(), 0);
    let again: Soils = ctx.load().unwrap();
    assert_eq!(again.domsoil_d(), soils.domsoil_d());
}

#[test]
fn test_removing_sbs_leaves_landcover_unburned() {
    let (_tmp, ctx) = burned_run();
    let mut disturbed: Disturbed = ctx.load().unwrap();
    disturbed.remove_sbs(&ctx).unwrap();
    assert!(!ctx.prep().get_attr(PrepAttr::HasSbs));

    let mut landuse: Landuse = ctx.load().unwrap();
    landuse.build(&ctx).unwrap();
    let landuse: Landuse = ctx.load().unwrap();
    assert_eq!(landuse.dominant(12), Some(FOREST));
}

#[test]
fn test_burned_run_simulates() {
    let (_tmp, ctx) = burned_run();
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();
    assert!(wepp.loss_report().is_ok());
}

#[test]
fn test_phosphorus_sampled_from_maps() {
    let mut cfg = test_config();
    cfg.phosphorus.surf_runoff_map = Some("p_surf".to_string());
    cfg.phosphorus.lateral_flow_map = Some("p_lat".to_string());
    cfg.phosphorus.baseflow_map = Some("p_base".to_string());
    cfg.phosphorus.sediment_map = Some("p_sed".to_string());
    let fakes = Fakes {
        maps: FakeMaps {
            values: BTreeMap::from([
                ("p_surf".to_string(), 0.004),
                ("p_lat".to_string(), 0.005),
                ("p_base".to_string(), 0.006),
                ("p_sed".to_string(), 800.0),
            ]),
        },
        ..Fakes::default()
    };
    let (_tmp, ctx) = prepared_run(cfg, fakes);

    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let wepp: Wepp = ctx.load().unwrap();
    assert!(wepp.phosphorus_opts().is_valid());
    assert_eq!(wepp.phosphorus_opts().sediment, Some(800.0));
    assert!(wepp.runs_dir().join("phosphorus.txt").exists());
}

#[test]
fn test_phosphorus_left_out_when_maps_are_incomplete() {
    let mut cfg = test_config();
    cfg.phosphorus.surf_runoff_map = Some("p_surf".to_string());
    let fakes = Fakes {
        maps: FakeMaps {
            values: BTreeMap::from([("p_surf".to_string(), 0.004)]),
        },
        ..Fakes::default()
    };
    let (_tmp, ctx) = prepared_run(cfg, fakes);

    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let wepp: Wepp = ctx.load().unwrap();
    assert!(!wepp.phosphorus_opts().is_valid());
    assert_eq!(wepp.phosphorus_opts().surf_runoff, Some(0.004));
    assert!(!wepp.runs_dir().join("phosphorus.txt").exists());
}
