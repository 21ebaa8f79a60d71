//! Optional behaviour attached to the run through the event bus.

pub mod disturbed;
pub mod phosphorus;

use crate::config::RunConfig;
use crate::nodb::events::{EventBus, TriggerEvent};
use disturbed::Disturbed;

pub fn register(bus: &EventBus, config: &RunConfig) {
    bus.subscribe_fn(
        TriggerEvent::PreppingPhosphorus,
        "phosphorus.resolve_maps",
        |ctx, _| phosphorus::on_prepping_phosphorus(ctx),
    );

    if !config.has_mod("disturbed") {
        return;
    }
    bus.subscribe_fn(TriggerEvent::OnInitFinish, "disturbed.init", |ctx, _| {
        disturbed::on_init(ctx)
    });
    bus.subscribe_fn(
        TriggerEvent::LanduseDomlcComplete,
        "disturbed.remap_landuse",
        |ctx, _| {
            let mut d: Disturbed = ctx.load()?;
            d.on_landuse_domlc(ctx).map(|_| ())
        },
    );
    bus.subscribe_fn(
        TriggerEvent::SoilsBuildComplete,
        "disturbed.specialize_soils",
        |ctx, _| {
            let mut d: Disturbed = ctx.load()?;
            d.on_soils_build(ctx).map(|_| ())
        },
    );
}
