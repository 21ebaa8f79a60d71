use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

/// Builds and runs WEPP watershed simulations in a run directory.
#[derive(Parser, Debug)]
#[command(name = "wepprun", version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a run from a TOML configuration
    Init {
        wd: PathBuf,
        /// Run configuration; its file stem becomes the run's config name
        config: PathBuf,
    },
    /// Print controllers, locks and stage timestamps
    Status { wd: PathBuf },
    /// Set the map extent and fetch the DEM
    FetchDem {
        wd: PathBuf,
        #[arg(long, num_args = 4, value_names = ["WEST", "SOUTH", "EAST", "NORTH"], allow_negative_numbers = true)]
        extent: Vec<f64>,
        #[arg(long, default_value_t = 13)]
        zoom: u32,
    },
    BuildChannels { wd: PathBuf },
    /// Snap the outlet to the channel network
    SetOutlet {
        wd: PathBuf,
        #[arg(allow_negative_numbers = true)]
        lng: f64,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
    },
    BuildSubcatchments { wd: PathBuf },
    /// Abstract hillslopes and channels into simulator inputs
    Abstract { wd: PathBuf },
    BuildLanduse { wd: PathBuf },
    BuildSoils { wd: PathBuf },
    BuildClimate { wd: PathBuf },
    /// Prep, run and ingest the hillslope and watershed simulations
    RunWepp { wd: PathBuf },
    /// Load observed data and compute model fit statistics
    Observed {
        wd: PathBuf,
        /// CSV with a Date column and one column per measure
        file: PathBuf,
    },
    /// Rank outlet events into return periods
    ReturnPeriods(ReturnPeriodArgs),
    /// Mark the run read-only, or lift the mark with --off
    Readonly {
        wd: PathBuf,
        #[arg(long)]
        off: bool,
    },
    /// Drop a stale controller lock left by a crashed writer
    Unlock {
        wd: PathBuf,
        /// Controller name (ron, watershed, landuse, ...)
        controller: String,
    },
    /// Attach a soil burn severity raster (disturbed runs)
    UploadSbs { wd: PathBuf, raster: PathBuf },
}

#[derive(Args, Debug)]
pub struct ReturnPeriodArgs {
    pub wd: PathBuf,
    /// Recurrence intervals in years
    #[arg(long, value_delimiter = ',')]
    pub recurrence: Option<Vec<f64>>,
    /// Simulation year indexes to leave out
    #[arg(long, value_delimiter = ',')]
    pub exclude_years: Vec<i32>,
    #[arg(long, value_delimiter = ',')]
    pub exclude_months: Vec<u32>,
    #[arg(long)]
    pub threshold: Option<f64>,
    #[arg(long)]
    pub gringorten: bool,
}

pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["wepprun", "set-outlet", "run1", "-116.5", "46.7"]);
        match cli.command {
            Commands::SetOutlet { lng, lat, .. } => {
                assert_eq!(lng, -116.5);
                assert_eq!(lat, 46.7);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::parse_from([
            "wepprun",
            "--log-level",
            "debug",
            "return-periods",
            "run1",
            "--recurrence",
            "2,10",
            "--gringorten",
        ]);
        assert_eq!(parse_level(&cli.log_level), Level::DEBUG);
        match cli.command {
            Commands::ReturnPeriods(args) => {
                assert_eq!(args.recurrence, Some(vec![2.0, 10.0]));
                assert!(args.gringorten);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("loud"), Level::INFO);
    }
}
