//! Orchestration core for WEPP watershed runs.
//!
//! A run is a directory of disk-persisted controllers (Ron, Watershed,
//! Landuse, Soils, Climate, Wepp, Observed) that build on each other's
//! artifacts. External geoprocessing, databases and the simulator itself are
//! reached through the traits in [`providers`].

pub mod catalog;
pub mod climate;
pub mod config;
pub mod context;
pub mod error;
pub mod landuse;
pub mod nodb;
pub mod observed;
pub mod plugins;
pub mod providers;
pub mod raster;
pub mod ron;
pub mod slope;
pub mod soils;
pub mod translator;
pub mod watershed;
pub mod wepp;

pub use context::RunContext;
pub use error::{Error, Result};
pub use nodb::NoDb;
