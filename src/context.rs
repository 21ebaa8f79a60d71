//! Per-run context: the run directory plus everything bound to it that is
//! not part of a controller snapshot.
//!
//! Controllers are never referenced directly from each other; they are
//! resolved from the run directory by kind through [`RunContext::load`].

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::nodb::events::{EventBus, TriggerEvent};
use crate::nodb::prep::{KvStore, MemoryKv, RedisPrep, TaskEnum};
use crate::nodb::NoDb;
use crate::plugins;
use crate::providers::Providers;
use crate::ron::Ron;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

static SHARED_STORE: OnceLock<Arc<MemoryKv>> = OnceLock::new();

/// Process-wide key-value store standing in for the external service.
pub fn shared_store() -> Arc<dyn KvStore> {
    SHARED_STORE.get_or_init(|| Arc::new(MemoryKv::new())).clone()
}

pub struct RunContext {
    wd: PathBuf,
    config: RunConfig,
    providers: Providers,
    bus: EventBus,
    prep: RedisPrep,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("wd", &self.wd)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(wd: &Path, config: RunConfig, providers: Providers) -> Result<Self> {
        Self::with_store(wd, config, providers, shared_store())
    }

    pub fn with_store(
        wd: &Path,
        config: RunConfig,
        providers: Providers,
        store: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let run_id = wd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::validation(format!("{} has no run id", wd.display())))?;
        let prep = RedisPrep::open(wd, &run_id, store)?;
        let ctx = RunContext {
            wd: wd.to_path_buf(),
            config,
            providers,
            bus: EventBus::new(),
            prep,
        };
        ctx.register_handlers();
        Ok(ctx)
    }

    /// Opens an initialized run, reading its configuration from the copy
    /// recorded by Ron.
    pub fn open(wd: &Path, providers: Providers) -> Result<Self> {
        let ron = Ron::get_instance(wd)?;
        let config = RunConfig::load(&ron.config_path())?;
        Self::new(wd, config, providers)
    }

    fn register_handlers(&self) {
        self.bus.subscribe_fn(
            TriggerEvent::WatershedAbstractionComplete,
            "redisprep.invalidate_downstream",
            |ctx, _| ctx.prep().invalidate_downstream(TaskEnum::AbstractWatershed),
        );
        plugins::register(&self.bus, &self.config);
    }

    pub fn wd(&self) -> &Path {
        &self.wd
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn prep(&self) -> &RedisPrep {
        &self.prep
    }

    pub fn run_id(&self) -> &str {
        self.prep.run_id()
    }

    /// Dispatches `event` to every handler registered for this run.
    pub fn trigger(&self, event: TriggerEvent) -> Result<()> {
        tracing::info!(run = %self.run_id(), "trigger {}", event);
        self.bus.dispatch(self, event)
    }

    pub fn load<T: NoDb>(&self) -> Result<T> {
        T::get_instance(&self.wd)
    }

    pub fn try_load<T: NoDb>(&self) -> Result<Option<T>> {
        T::try_get_instance(&self.wd)
    }
}
