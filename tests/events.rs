mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use wepprun_rs::landuse::Landuse;
use wepprun_rs::nodb::events::TriggerEvent;
use wepprun_rs::nodb::prep::TaskEnum;
use wepprun_rs::soils::Soils;
use wepprun_rs::watershed::Watershed;
use wepprun_rs::wepp::Wepp;

fn record(ctx: &wepprun_rs::RunContext, events: &[TriggerEvent]) -> Arc<Mutex<Vec<TriggerEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for event in events {
        let seen = seen.clone();
        ctx.bus().subscribe_fn(*event, "test.record", move |_, e| {
            seen.lock().push(e);
            Ok(())
        });
    }
    seen
}

#[test]
fn test_builds_fire_events_in_order() {
    let (_tmp, ctx) = init(test_config(), Fakes::default());
    let seen = record(
        &ctx,
        &[
            TriggerEvent::WatershedAbstractionComplete,
            TriggerEvent::LanduseDomlcComplete,
            TriggerEvent::LanduseBuildComplete,
            TriggerEvent::SoilsBuildComplete,
            TriggerEvent::PreppingPhosphorus,
            TriggerEvent::WeppPrepWatershedComplete,
        ],
    );

    delineate(&ctx).unwrap();
    let mut landuse: Landuse = ctx.load().unwrap();
    landuse.build(&ctx).unwrap();
    let mut soils: Soils = ctx.load().unwrap();
    soils.build(&ctx).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            TriggerEvent::WatershedAbstractionComplete,
            TriggerEvent::LanduseDomlcComplete,
            TriggerEvent::LanduseBuildComplete,
            TriggerEvent::SoilsBuildComplete,
        ]
    );
}

#[test]
fn test_stage_timestamps_are_recorded() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    for task in [
        TaskEnum::ProjectInit,
        TaskEnum::FetchDem,
        TaskEnum::BuildChannels,
        TaskEnum::SetOutlet,
        TaskEnum::BuildSubcatchments,
        TaskEnum::AbstractWatershed,
        TaskEnum::BuildLanduse,
        TaskEnum::BuildSoils,
        TaskEnum::BuildClimate,
    ] {
        assert!(ctx.prep().get_timestamp(task).is_some(), "{} missing", task);
    }
    assert!(ctx.prep().get_timestamp(TaskEnum::RunWepp).is_none());
}

#[test]
fn test_reabstraction_invalidates_downstream_stages() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();
    assert!(ctx.prep().get_timestamp(TaskEnum::RunWepp).is_some());

    let mut watershed: Watershed = ctx.load().unwrap();
    watershed.abstract_watershed(&ctx).unwrap();

    assert!(ctx.prep().get_timestamp(TaskEnum::AbstractWatershed).is_some());
    for task in [
        TaskEnum::BuildLanduse,
        TaskEnum::BuildSoils,
        TaskEnum::BuildClimate,
        TaskEnum::PrepWepp,
        TaskEnum::RunWepp,
    ] {
        assert!(ctx.prep().get_timestamp(task).is_none(), "{} survived", task);
    }
    // upstream stages are untouched
    assert!(ctx.prep().get_timestamp(TaskEnum::FetchDem).is_some());
}

#[test]
fn test_landuse_rebuild_invalidates_simulation() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();

    let mut landuse: Landuse = ctx.load().unwrap();
    landuse.build(&ctx).unwrap();
    assert!(ctx.prep().get_timestamp(TaskEnum::BuildLanduse).is_some());
    assert!(ctx.prep().get_timestamp(TaskEnum::RunWepp).is_none());
    assert!(ctx.prep().get_timestamp(TaskEnum::BuildSoils).is_some());
}

#[test]
fn test_prep_state_is_dumped_beside_the_run() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    ctx.prep().dump().unwrap();
    let fields = ctx.prep().fields();
    assert!(fields.keys().any(|k| k.contains(TaskEnum::BuildSoils.as_str())));
}
