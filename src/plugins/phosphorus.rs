//! Fills incomplete phosphorus concentrations from maps sampled at the
//! watershed outlet.

use crate::config::PhosphorusConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::nodb::NoDb;
use crate::watershed::Watershed;
use crate::wepp::Wepp;
use crate::wepp::opts::{PhosphorusOpts, Resolver};

fn has_maps(cfg: &PhosphorusConfig) -> bool {
    [
        &cfg.surf_runoff_map,
        &cfg.lateral_flow_map,
        &cfg.baseflow_map,
        &cfg.sediment_map,
    ]
    .iter()
    .any(|m| m.is_some())
}

/// Resolves each concentration: stored value, then configured scalar, then
/// the configured map.
pub fn resolve(current: &PhosphorusOpts, cfg: &PhosphorusConfig, r: &Resolver) -> Result<PhosphorusOpts> {
    Ok(PhosphorusOpts {
        surf_runoff: r.value(
            "surf_runoff",
            current.surf_runoff,
            cfg.opts.surf_runoff,
            cfg.surf_runoff_map.as_deref(),
            None,
        )?,
        lateral_flow: r.value(
            "lateral_flow",
            current.lateral_flow,
            cfg.opts.lateral_flow,
            cfg.lateral_flow_map.as_deref(),
            None,
        )?,
        baseflow: r.value(
            "baseflow",
            current.baseflow,
            cfg.opts.baseflow,
            cfg.baseflow_map.as_deref(),
            None,
        )?,
        sediment: r.value(
            "sediment",
            current.sediment,
            cfg.opts.sediment,
            cfg.sediment_map.as_deref(),
            None,
        )?,
    })
}

pub fn on_prepping_phosphorus(ctx: &RunContext) -> Result<()> {
    let cfg = &ctx.config().phosphorus;
    let mut wepp: Wepp = ctx.load()?;
    if wepp.phosphorus_opts().is_valid() || !has_maps(cfg) {
        return Ok(());
    }
    let watershed: Watershed = ctx.load()?;
    let Some(outlet) = watershed.outlet() else {
        tracing::warn!("no outlet to sample phosphorus maps at");
        return Ok(());
    };
    let resolver = Resolver {
        maps: ctx.providers().maps.as_ref(),
        at: (outlet.actual_lon, outlet.actual_lat),
    };
    let opts = resolve(wepp.phosphorus_opts(), cfg, &resolver)?;
    if opts == *wepp.phosphorus_opts() {
        return Ok(());
    }
    tracing::info!(complete = opts.is_valid(), "phosphorus options resolved from maps");
    wepp.set_phosphorus_opts(opts)?;
    wepp.log_status("phosphorus options sampled at the outlet")
}
