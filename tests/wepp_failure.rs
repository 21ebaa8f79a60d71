mod common;

use common::*;
use std::sync::Arc;
use wepprun_rs::Error;
use wepprun_rs::nodb::prep::TaskEnum;
use wepprun_rs::nodb::{self, ControllerKind};
use wepprun_rs::wepp::Wepp;

#[test]
fn test_hillslope_failure_stops_the_run() {
    let engine = Arc::new(FakeEngine::failing("p3"));
    let fakes = Fakes {
        engine: engine.clone(),
        ..Fakes::default()
    };
    let (_tmp, ctx) = prepared_run(test_config(), fakes);

    let mut wepp: Wepp = ctx.load().unwrap();
    let err = wepp.run(&ctx).unwrap_err();
    match err {
        Error::Simulator { label, .. } => assert_eq!(label, "p3"),
        other => panic!("unexpected error {:?}", other),
    }

    assert!(!engine.calls().iter().any(|c| c == "pw0"));
    assert!(!nodb::lock_path(ctx.wd(), ControllerKind::Wepp).exists());
    assert!(ctx.prep().get_timestamp(TaskEnum::RunWepp).is_none());

    let wepp: Wepp = ctx.load().unwrap();
    assert!(!wepp.has_run());
    assert!(wepp.runs_dir().join("p3.err").exists());
}

fn hillslope_outputs(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".out") && !n.starts_with("pw0"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_failure_cancels_hillslopes_not_yet_finished() {
    let engine = Arc::new(FakeEngine::failing("p4").stalling(&["p5", "p6"]));
    let fakes = Fakes {
        engine: engine.clone(),
        ..Fakes::default()
    };
    let (_tmp, ctx) = prepared_run(test_config(), fakes);

    let mut wepp: Wepp = ctx.load().unwrap();
    let err = wepp.run(&ctx).unwrap_err();
    assert!(matches!(err, Error::Simulator { ref label, .. } if label == "p4"), "{:?}", err);

    let runs = wepp.runs_dir();
    let outputs = hillslope_outputs(&runs);
    // only hillslopes started before the failure leave outputs behind
    for name in &outputs {
        assert!(["p1.", "p2.", "p3."].iter().any(|p| name.starts_with(p)), "{}", name);
    }
    let finished: std::collections::BTreeSet<&str> =
        outputs.iter().filter_map(|n| n.split('.').next()).collect();
    assert!(finished.len() <= 3, "{:?}", finished);

    assert!(!engine.calls().iter().any(|c| c == "pw0"));
    assert!(!runs.join("pw0.chan.out").exists());
    assert!(!runs.join("pw0.loss.out").exists());
    assert!(!wepp.output_dir().join("loss_pw0.txt").exists());
}

#[test]
fn test_watershed_failure_after_hillslopes() {
    let engine = Arc::new(FakeEngine::failing("pw0"));
    let fakes = Fakes {
        engine: engine.clone(),
        ..Fakes::default()
    };
    let (_tmp, ctx) = prepared_run(test_config(), fakes);

    let mut wepp: Wepp = ctx.load().unwrap();
    assert!(matches!(wepp.run(&ctx), Err(Error::Simulator { .. })));
    assert_eq!(engine.calls().len(), HILLSLOPES.len() + 1);

    let wepp: Wepp = ctx.load().unwrap();
    assert!(!wepp.has_run());
}

#[test]
fn test_rerun_after_failure_succeeds() {
    let (_tmp, ctx) = prepared_run(test_config(), Fakes::default());
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();
    // a second run replaces the outputs of the first
    let mut wepp: Wepp = ctx.load().unwrap();
    wepp.run(&ctx).unwrap();
    assert!(wepp.loss_report().is_ok());
}
