use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::fs;
use std::path::Path;
use tracing_subscriber::FmtSubscriber;
use wepprun_rs::climate::Climate;
use wepprun_rs::config::RunConfig;
use wepprun_rs::landuse::Landuse;
use wepprun_rs::nodb::prep::TaskEnum;
use wepprun_rs::nodb::{self, ControllerKind, NoDb};
use wepprun_rs::observed::Observed;
use wepprun_rs::plugins::disturbed::Disturbed;
use wepprun_rs::providers::Providers;
use wepprun_rs::ron::Ron;
use wepprun_rs::soils::Soils;
use wepprun_rs::watershed::Watershed;
use wepprun_rs::wepp::Wepp;
use wepprun_rs::wepp::return_periods::ReturnPeriodParams;
use wepprun_rs::RunContext;

mod cli;

use cli::{Cli, Commands, ReturnPeriodArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli::parse_level(&cli.log_level))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { wd, config } => init(&wd, &config),
        Commands::Status { wd } => status(&wd),
        Commands::FetchDem { wd, extent, zoom } => {
            let ctx = open(&wd)?;
            let extent: [f64; 4] = extent
                .try_into()
                .map_err(|_| anyhow!("--extent takes west south east north"))?;
            let mut ron: Ron = ctx.load()?;
            ron.set_map(&ctx, extent, zoom)?;
            ron.fetch_dem(&ctx).context("Failed to fetch DEM")
        }
        Commands::BuildChannels { wd } => {
            let ctx = open(&wd)?;
            let mut watershed: Watershed = ctx.load()?;
            watershed.build_channels(&ctx).context("Failed to build channels")
        }
        Commands::SetOutlet { wd, lng, lat } => {
            let ctx = open(&wd)?;
            let mut watershed: Watershed = ctx.load()?;
            watershed.set_outlet(&ctx, lng, lat).context("Failed to set outlet")?;
            if let Some(outlet) = watershed.outlet() {
                println!(
                    "Outlet at {:.6}, {:.6} ({:.1} m from request)",
                    outlet.actual_lon, outlet.actual_lat, outlet.distance
                );
            }
            Ok(())
        }
        Commands::BuildSubcatchments { wd } => {
            let ctx = open(&wd)?;
            let mut watershed: Watershed = ctx.load()?;
            watershed
                .build_subcatchments(&ctx)
                .context("Failed to build subcatchments")
        }
        Commands::Abstract { wd } => {
            let ctx = open(&wd)?;
            let mut watershed: Watershed = ctx.load()?;
            watershed
                .abstract_watershed(&ctx)
                .context("Failed to abstract watershed")?;
            println!(
                "{} hillslopes, {:.1} ha",
                watershed.hillslope_count(),
                watershed.total_area() / 10_000.0
            );
            Ok(())
        }
        Commands::BuildLanduse { wd } => {
            let ctx = open(&wd)?;
            let mut landuse: Landuse = ctx.load()?;
            landuse.build(&ctx).context("Failed to build landuse")
        }
        Commands::BuildSoils { wd } => {
            let ctx = open(&wd)?;
            let mut soils: Soils = ctx.load()?;
            soils.build(&ctx).context("Failed to build soils")
        }
        Commands::BuildClimate { wd } => {
            let ctx = open(&wd)?;
            let mut climate: Climate = ctx.load()?;
            climate.build(&ctx).context("Failed to build climate")
        }
        Commands::RunWepp { wd } => {
            let ctx = open(&wd)?;
            let mut wepp: Wepp = ctx.load()?;
            wepp.run(&ctx).context("WEPP run failed")?;
            let report = wepp.loss_report()?;
            for row in &report.outlet {
                println!("{:<40}{:>14.3} {}", row.key, row.value, row.units);
            }
            Ok(())
        }
        Commands::Observed { wd, file } => {
            let ctx = open(&wd)?;
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read observed data: {:?}", file))?;
            let mut observed: Observed = ctx.load()?;
            observed.set_observed(&ctx, &text)?;
            observed.run_model_fit(&ctx).context("Model fit failed")?;
            for report in observed.reports() {
                println!(
                    "{} {} {}: NSE {:?} KGE {:?}",
                    report.series, report.measure, report.aggregation, report.stats.nse, report.stats.kge
                );
            }
            Ok(())
        }
        Commands::ReturnPeriods(args) => return_periods(args),
        Commands::Readonly { wd, off } => {
            let ron = Ron::get_instance(&wd)?;
            ron.set_readonly(!off)?;
            println!("{} is {}", wd.display(), if off { "writable" } else { "read-only" });
            Ok(())
        }
        Commands::Unlock { wd, controller } => {
            let kind = ControllerKind::parse(&controller)
                .ok_or_else(|| anyhow!("unknown controller {}", controller))?;
            tracing::warn!(wd = %wd.display(), controller = %kind, "forcing unlock");
            if nodb::force_unlock(&wd, kind)? {
                println!("Removed {} lock", kind);
            } else {
                println!("{} was not locked", kind);
            }
            Ok(())
        }
        Commands::UploadSbs { wd, raster } => {
            let ctx = open(&wd)?;
            let mut disturbed: Disturbed = ctx
                .load()
                .context("Run does not have the disturbed mod")?;
            disturbed.set_sbs(&ctx, &raster).context("Failed to attach SBS raster")
        }
    }
}

fn init(wd: &Path, config_path: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)
        .with_context(|| format!("Failed to read configuration: {:?}", config_path))?;
    let stem = config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("configuration path has no file stem"))?;
    let providers = Providers::local(&config)?;
    let ctx = Ron::init_run(wd, &stem, config, providers)
        .with_context(|| format!("Failed to initialize run in {:?}", wd))?;
    println!("Initialized run {}", ctx.run_id());
    Ok(())
}

fn open(wd: &Path) -> Result<RunContext> {
    let ron = Ron::get_instance(wd).with_context(|| format!("No run in {:?}", wd))?;
    let config = RunConfig::load(&ron.config_path())?;
    let providers = Providers::local(&config)?;
    Ok(RunContext::new(wd, config, providers)?)
}

fn status(wd: &Path) -> Result<()> {
    let ctx = open(wd)?;
    println!("Run {}{}", ctx.run_id(), if nodb::is_readonly(wd) { " (read-only)" } else { "" });
    for kind in ControllerKind::ALL {
        let path = nodb::nodb_path(wd, kind);
        if !path.exists() {
            continue;
        }
        let locked = nodb::lock_path(wd, kind).exists();
        println!("  {:<10}{}", kind.name(), if locked { " locked" } else { "" });
    }
    for task in TaskEnum::ALL {
        if let Some(ts) = ctx.prep().get_timestamp(task) {
            println!("  {:<22}{}", task.as_str(), ts);
        }
    }
    Ok(())
}

fn return_periods(args: ReturnPeriodArgs) -> Result<()> {
    let ctx = open(&args.wd)?;
    let mut params = ReturnPeriodParams {
        exclude_yr_indxs: args.exclude_years,
        exclude_months: args.exclude_months,
        threshold: args.threshold,
        gringorten: args.gringorten,
        ..ReturnPeriodParams::default()
    };
    if let Some(recurrence) = args.recurrence {
        params.recurrence = recurrence;
    }
    let wepp: Wepp = ctx.load()?;
    let result = wepp
        .return_periods(&ctx, &params)
        .context("Failed to compute return periods")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
