//! Climate controller. Climate generation itself is external; the controller
//! records which file each hillslope and the watershed run use.

use crate::context::RunContext;
use crate::error::{Error, IoContext, Result};
use crate::nodb::prep::TaskEnum;
use crate::nodb::{ControllerKind, NoDb, timed};
use crate::providers::ClimateRequest;
use crate::watershed::Watershed;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimateMode {
    /// One station file for the whole watershed.
    #[default]
    Single,
    /// One file per hillslope.
    Multiple,
    SingleStorm,
    /// A list of design storms, each simulated on its own.
    SingleStormBatch,
}

impl ClimateMode {
    pub fn is_single_storm(&self) -> bool {
        matches!(self, ClimateMode::SingleStorm | ClimateMode::SingleStormBatch)
    }
}

/// A design storm of single-storm batch mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormEvent {
    /// Directory name of the storm's outputs.
    pub name: String,
    /// Climate file under `climate/`.
    pub cli_fn: String,
    pub date: String,
    /// mm
    pub depth: f64,
    /// hours
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Climate {
    #[serde(skip)]
    wd: PathBuf,
    pub mode: ClimateMode,
    pub input_years: u32,
    pub sim_years: u32,
    watershed_cli: Option<String>,
    sub_cli_fns: BTreeMap<i32, String>,
    storms: Vec<StormEvent>,
}

impl NoDb for Climate {
    const KIND: ControllerKind = ControllerKind::Climate;

    fn wd(&self) -> &Path {
        &self.wd
    }

    fn attach(&mut self, wd: &Path) {
        self.wd = wd.to_path_buf();
    }

    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[("\"cli_fn\"", "\"watershed_cli\""), ("\"_input_years\"", "\"input_years\"")]
    }
}

impl Climate {
    pub fn new(wd: &Path, cfg: &crate::config::ClimateConfig) -> Self {
        Climate {
            wd: wd.to_path_buf(),
            mode: cfg.mode,
            input_years: cfg.input_years,
            sim_years: 0,
            watershed_cli: None,
            sub_cli_fns: BTreeMap::new(),
            storms: Vec::new(),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.wd.join("climate")
    }

    pub fn cli_path(&self, cli_fn: &str) -> PathBuf {
        self.dir().join(cli_fn)
    }

    pub fn watershed_cli(&self) -> Option<&str> {
        self.watershed_cli.as_deref()
    }

    pub fn storms(&self) -> &[StormEvent] {
        &self.storms
    }

    pub fn is_single_storm(&self) -> bool {
        self.mode.is_single_storm()
    }

    pub fn is_built(&self) -> bool {
        self.watershed_cli.is_some()
    }

    pub fn require_built(&self) -> Result<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(Error::precondition("climate has not been built"))
        }
    }

    /// Climate file of a hillslope; the watershed file when it has none.
    pub fn hillslope_cli(&self, topaz_id: i32) -> Result<PathBuf> {
        let cli_fn = self
            .sub_cli_fns
            .get(&topaz_id)
            .map(String::as_str)
            .or(self.watershed_cli.as_deref())
            .ok_or_else(|| Error::precondition("climate has not been built"))?;
        Ok(self.cli_path(cli_fn))
    }

    pub fn build(&mut self, ctx: &RunContext) -> Result<()> {
        timed("climate.build", || {
            let watershed: Watershed = ctx.load()?;
            watershed.require_abstracted()?;
            let centroids = watershed.centroids();
            let centroid = watershed.centroid();
            let source = ctx.providers().climate.clone();
            self.locked(|cli| {
                let dir = cli.dir();
                if dir.exists() {
                    fs::remove_dir_all(&dir).at(&dir)?;
                }
                fs::create_dir_all(&dir).at(&dir)?;
                let built = source.build(&ClimateRequest {
                    cli_dir: &dir,
                    mode: cli.mode,
                    input_years: cli.input_years,
                    watershed_centroid: centroid,
                    centroids: &centroids,
                })?;

                let missing = std::iter::once(&built.watershed_cli)
                    .chain(built.sub_cli_fns.values())
                    .chain(built.storms.iter().map(|s| &s.cli_fn))
                    .find(|f| !dir.join(f).exists());
                if let Some(f) = missing {
                    return Err(Error::provider(
                        "climate",
                        format!("climate file {} was not produced", f),
                    ));
                }
                if cli.mode == ClimateMode::SingleStormBatch && built.storms.is_empty() {
                    return Err(Error::provider("climate", "storm batch produced no storms"));
                }

                cli.sub_cli_fns = match cli.mode {
                    ClimateMode::Multiple => built.sub_cli_fns,
                    _ => centroids
                        .keys()
                        .map(|t| (*t, built.watershed_cli.clone()))
                        .collect(),
                };
                cli.watershed_cli = Some(built.watershed_cli);
                cli.sim_years = built.sim_years;
                cli.storms = built.storms;
                cli.log_status(&format!(
                    "built {:?} climate, {} years",
                    cli.mode, cli.sim_years
                ))
            })?;
            ctx.prep().timestamp(TaskEnum::BuildClimate)?;
            ctx.prep().invalidate_downstream(TaskEnum::BuildClimate)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hillslope_cli_falls_back_to_watershed_file() {
        let mut c = Climate::new(Path::new("/run"), &Default::default());
        assert!(c.hillslope_cli(11).is_err());
        c.watershed_cli = Some("wepp.cli".to_string());
        c.sub_cli_fns.insert(12, "h12.cli".to_string());
        assert_eq!(c.hillslope_cli(11).unwrap(), PathBuf::from("/run/climate/wepp.cli"));
        assert_eq!(c.hillslope_cli(12).unwrap(), PathBuf::from("/run/climate/h12.cli"));
    }

    #[test]
    fn test_single_storm_modes() {
        assert!(ClimateMode::SingleStormBatch.is_single_storm());
        assert!(!ClimateMode::Multiple.is_single_storm());
    }
}
