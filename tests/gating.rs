mod common;

use common::*;
use wepprun_rs::Error;
use wepprun_rs::landuse::Landuse;
use wepprun_rs::nodb::{self, ControllerKind};
use wepprun_rs::ron::Ron;
use wepprun_rs::soils::Soils;
use wepprun_rs::watershed::{DelineationBackendKind, Watershed, WatershedStatus};
use wepprun_rs::wepp::Wepp;

#[test]
fn test_second_init_in_same_directory_fails() {
    let (tmp, _ctx) = init(test_config(), Fakes::default());
    let err = Ron::init_run(tmp.path(), "again", test_config(), Fakes::default().providers()).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)), "{:?}", err);
}

#[test]
fn test_channels_need_a_dem() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    let mut watershed: Watershed = ctx.load().unwrap();
    let err = watershed.build_channels(&ctx).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)), "{:?}", err);
}

#[test]
fn test_channels_need_the_configured_backend() {
    let mut cfg = test_config();
    cfg.watershed.backend = DelineationBackendKind::Peridot;
    let (_tmp, ctx) = init(cfg, Fakes::default());
    let mut ron: Ron = ctx.load().unwrap();
    ron.set_map(&ctx, [-116.51, 46.69, -116.49, 46.71], 13).unwrap();
    ron.fetch_dem(&ctx).unwrap();

    let mut watershed: Watershed = ctx.load().unwrap();
    assert_eq!(watershed.backend, DelineationBackendKind::Peridot);
    let err = watershed.build_channels(&ctx).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)), "{:?}", err);
    let watershed: Watershed = ctx.load().unwrap();
    assert!(watershed.status() < WatershedStatus::HasChannels);
}

#[test]
fn test_set_map_rejects_inverted_extent() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    let mut ron: Ron = ctx.load().unwrap();
    assert!(ron.set_map(&ctx, [-116.49, 46.69, -116.51, 46.71], 13).is_err());
    assert!(ron.fetch_dem(&ctx).is_err());
}

#[test]
fn test_inputs_need_abstraction() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    let mut landuse: Landuse = ctx.load().unwrap();
    let err = landuse.build(&ctx).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)), "{:?}", err);

    let mut soils: Soils = ctx.load().unwrap();
    assert!(matches!(soils.build(&ctx), Err(Error::PreconditionFailed(_))));
}

#[test]
fn test_wepp_needs_inputs() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    delineate(&ctx).unwrap();
    let mut wepp: Wepp = ctx.load().unwrap();
    assert!(wepp.run(&ctx).is_err());
    assert!(!nodb::lock_path(ctx.wd(), ControllerKind::Wepp).exists());

    let wepp: Wepp = ctx.load().unwrap();
    assert!(!wepp.has_run());
    assert!(wepp.loss_report().is_err());
}

#[test]
fn test_outlet_on_raster_edge_is_rejected() {
    let fakes = Fakes {
        outlet_px: (9, 3),
        ..Fakes::default()
    };
    let (_tmp, ctx) = init(test_config(), fakes);
    let mut ron: Ron = ctx.load().unwrap();
    ron.set_map(&ctx, [-116.51, 46.69, -116.49, 46.71], 13).unwrap();
    ron.fetch_dem(&ctx).unwrap();

    let mut watershed: Watershed = ctx.load().unwrap();
    watershed.build_channels(&ctx).unwrap();
    watershed.set_outlet(&ctx, -116.49, 46.70).unwrap();
    let err = watershed.build_subcatchments(&ctx).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{:?}", err);
}

#[test]
fn test_readonly_run_refuses_mutation() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    let ron: Ron = ctx.load().unwrap();
    ron.set_readonly(true).unwrap();
    assert!(nodb::is_readonly(ctx.wd()));

    let mut ron: Ron = ctx.load().unwrap();
    let err = ron.set_map(&ctx, [-116.51, 46.69, -116.49, 46.71], 13).unwrap_err();
    assert!(matches!(err, Error::ReadOnlyRun(_)), "{:?}", err);

    ron.set_readonly(false).unwrap();
    ron.set_map(&ctx, [-116.51, 46.69, -116.49, 46.71], 13).unwrap();
}

#[test]
fn test_force_unlock_clears_stale_lock() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    let lock = nodb::lock_path(ctx.wd(), ControllerKind::Landuse);
    std::fs::write(&lock, "12345").unwrap();
    assert!(nodb::force_unlock(ctx.wd(), ControllerKind::Landuse).unwrap());
    assert!(!lock.exists());
    assert!(!nodb::force_unlock(ctx.wd(), ControllerKind::Landuse).unwrap());
}
