use crate::context::RunContext;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Closed set of cross-controller lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerEvent {
    OnInitFinish,
    WatershedAbstractionComplete,
    LanduseDomlcComplete,
    LanduseBuildComplete,
    SoilsBuildComplete,
    PreppingPhosphorus,
    WeppPrepWatershedComplete,
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::OnInitFinish => "ON_INIT_FINISH",
            TriggerEvent::WatershedAbstractionComplete => "WATERSHED_ABSTRACTION_COMPLETE",
            TriggerEvent::LanduseDomlcComplete => "LANDUSE_DOMLC_COMPLETE",
            TriggerEvent::LanduseBuildComplete => "LANDUSE_BUILD_COMPLETE",
            TriggerEvent::SoilsBuildComplete => "SOILS_BUILD_COMPLETE",
            TriggerEvent::PreppingPhosphorus => "PREPPING_PHOSPHORUS",
            TriggerEvent::WeppPrepWatershedComplete => "WEPP_PREP_WATERSHED_COMPLETE",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Handler = Arc<dyn Fn(&RunContext, TriggerEvent) -> Result<()> + Send + Sync>;

/// Explicit `event -> [handler]` registry for one run.
///
/// Handlers run synchronously on the triggering thread, in subscription
/// order, with no controller lock held; they take their own locks.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<BTreeMap<TriggerEvent, Vec<(String, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event: TriggerEvent, name: impl Into<String>, handler: Handler) {
        let name = name.into();
        tracing::debug!("subscribing {} to {}", name, event);
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push((name, handler));
    }

    pub fn subscribe_fn<F>(&self, event: TriggerEvent, name: impl Into<String>, handler: F)
    where
        F: Fn(&RunContext, TriggerEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event, name, Arc::new(handler));
    }

    pub fn handler_names(&self, event: TriggerEvent) -> Vec<String> {
        self.handlers
            .read()
            .get(&event)
            .map(|hs| hs.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    /// The first failing handler aborts dispatch and its error propagates.
    pub fn dispatch(&self, ctx: &RunContext, event: TriggerEvent) -> Result<()> {
        // Snapshot so handlers may subscribe without deadlocking.
        let handlers = self.handlers.read().get(&event).cloned().unwrap_or_default();
        for (name, handler) in handlers {
            tracing::debug!("dispatching {} to {}", event, name);
            handler(ctx, event)?;
        }
        Ok(())
    }
}
