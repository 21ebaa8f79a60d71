mod common;

use common::*;
use wepprun_rs::landuse::{Landuse, LanduseMode};
use wepprun_rs::nodb::events::TriggerEvent;
use wepprun_rs::nodb::prep::TaskEnum;
use wepprun_rs::soils::{Soils, SoilsMode};
use wepprun_rs::{Error, NoDb};

fn assert_landuse_intact(ctx: &wepprun_rs::RunContext) {
    let landuse: Landuse = ctx.load().unwrap();
    assert!(landuse.is_built());
    assert_eq!(landuse.dominant(12), Some(FOREST));
    assert_eq!(landuse.dominant(13), Some(SHRUB));
    assert!(landuse.management(FOREST).is_some());
    assert!(landuse.man_path(FOREST).exists());
    assert!(landuse.man_path(SHRUB).exists());
    assert!(Landuse::parquet_path(ctx.wd()).exists());
    assert!(!ctx.wd().join("landuse.prev").exists());
}

#[test]
fn test_failed_landuse_rebuild_keeps_previous_build() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut landuse: Landuse = ctx.load().unwrap();
    landuse
        .locked(|lu| {
            lu.mode = LanduseMode::Single;
            lu.single_selection = Some("77".to_string());
            Ok(())
        })
        .unwrap();

    let err = landuse.build(&ctx).unwrap_err();
    assert!(matches!(err, Error::Provider { .. }), "{:?}", err);
    assert_landuse_intact(&ctx);
    assert!(!landuse.man_path("77").exists());
    assert!(ctx.prep().get_timestamp(TaskEnum::BuildLanduse).is_some());
}

#[test]
fn test_landuse_rolled_back_when_a_handler_fails() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    ctx.bus().subscribe_fn(TriggerEvent::LanduseBuildComplete, "test.fail", |_, _| {
        Err(Error::validation("handler failed"))
    });
    let mut landuse: Landuse = ctx.load().unwrap();
    landuse
        .locked(|lu| {
            lu.mode = LanduseMode::Single;
            lu.single_selection = Some(SHRUB.to_string());
            Ok(())
        })
        .unwrap();

    assert!(matches!(landuse.build(&ctx), Err(Error::Validation(_))));
    // the assignment was committed before the handler ran, and undone after
    assert_landuse_intact(&ctx);
    let landuse: Landuse = ctx.load().unwrap();
    assert_eq!(landuse.mode, LanduseMode::Single);
}

#[test]
fn test_modify_to_unknown_key_changes_nothing() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut landuse: Landuse = ctx.load().unwrap();
    assert!(landuse.modify(&ctx, &[12], "77").is_err());
    assert_landuse_intact(&ctx);

    landuse.modify(&ctx, &[12], SHRUB).unwrap();
    let landuse: Landuse = ctx.load().unwrap();
    assert_eq!(landuse.dominant(12), Some(SHRUB));
    assert!(landuse.man_path(SHRUB).exists());
}

#[test]
fn test_failed_soils_rebuild_keeps_previous_build() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut soils: Soils = ctx.load().unwrap();
    let before = soils.clone();
    soils
        .locked(|s| {
            s.mode = SoilsMode::Single;
            s.single_mukey = Some("999".to_string());
            Ok(())
        })
        .unwrap();

    assert!(soils.build(&ctx).is_err());

    let soils: Soils = ctx.load().unwrap();
    assert!(soils.is_built());
    assert_eq!(soils.domsoil_d(), before.domsoil_d());
    assert!(soils.soil_path(MUKEY).exists());
    assert!(!soils.soil_path("999").exists());
    assert!(Soils::parquet_path(ctx.wd()).exists());
    assert!(!ctx.wd().join("soils.tmp").exists());
}

#[test]
fn test_soils_rebuild_replaces_files() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut soils: Soils = ctx.load().unwrap();
    let stray = soils.dir().join("stray.sol");
    std::fs::write(&stray, "stale").unwrap();

    soils.build(&ctx).unwrap();
    assert!(!stray.exists());
    assert!(soils.soil_path(MUKEY).exists());
    assert!(Soils::parquet_path(ctx.wd()).exists());
}
