//! Layer context and its process-wide handle.
//!
//! All interception state (registry, telemetry, frame counter, memory
//! tracker) lives in one [`LayerContext`]. The exported entry points reach it
//! through a process-wide slot with an explicit contract:
//!
//! - [`acquire`] is called by every `vkCreateInstance` before calling down.
//!   It creates the context on first use and counts one more live instance.
//! - [`release`] is called when an instance is destroyed, or when its
//!   creation failed. The call that brings the count to zero takes the
//!   context out of the slot and tears it down.
//! - [`current`] is what every other entry point uses.
//!
//! Known defect: teardown is decided per instance count, not per object.
//! A device-level call racing with the last `vkDestroyInstance` keeps the
//! old context alive (through its `Arc`) until it returns, and any table it
//! registers there is lost with it. A `vkCreateInstance` that starts after
//! teardown gets a fresh context with an empty registry. Callers are expected
//! to serialize instance creation and destruction, as the loader does.

use std::sync::{Arc, OnceLock};

use super::frame::FrameCounter;
use super::registry::DispatchRegistry;
use super::tracker::MemoryTracker;
use crate::api::config::LayerConfig;
use crate::api::stats::MemoryStats;
use crate::diagnostics;
use crate::sync::mutex::Mutex;
use crate::telemetry::{Telemetry, TelemetryEvent};

/// Everything an intercepted call needs.
pub struct LayerContext {
    config: LayerConfig,
    registry: DispatchRegistry,
    telemetry: Telemetry,
    frames: FrameCounter,
    tracker: MemoryTracker,
}

impl LayerContext {
    /// Build a context, opening the telemetry backend `config` names.
    pub fn new(config: LayerConfig) -> Self {
        let telemetry = Telemetry::from_config(&config);
        Self::with_telemetry(config, telemetry)
    }

    /// Build a context around an already opened telemetry backend.
    pub fn with_telemetry(config: LayerConfig, telemetry: Telemetry) -> Self {
        Self {
            config,
            registry: DispatchRegistry::new(),
            telemetry,
            frames: FrameCounter::new(),
            tracker: MemoryTracker::new(),
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn frames(&self) -> &FrameCounter {
        &self.frames
    }

    pub fn tracker(&self) -> &MemoryTracker {
        &self.tracker
    }

    /// Device memory totals seen so far.
    pub fn memory_stats(&self) -> MemoryStats {
        self.tracker.stats()
    }

    /// Events queued by an in-memory backend.
    pub fn drain_events(&self) -> Vec<TelemetryEvent> {
        self.telemetry.drain()
    }
}

impl Drop for LayerContext {
    fn drop(&mut self) {
        self.registry.clear();
        #[cfg(feature = "log")]
        log::debug!("layer context torn down: {}", self.tracker.stats());
    }
}

impl std::fmt::Debug for LayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerContext")
            .field("registry", &self.registry)
            .field("telemetry", &self.telemetry)
            .field("frame", &self.frames.current())
            .finish()
    }
}

// =============================================================================
// Process-wide slot
// =============================================================================

#[derive(Default)]
struct Slot {
    context: Option<Arc<LayerContext>>,
    live_instances: usize,
    /// Config for the next context instead of the environment.
    pending_config: Option<LayerConfig>,
}

static SLOT: OnceLock<Mutex<Slot>> = OnceLock::new();

fn slot() -> &'static Mutex<Slot> {
    SLOT.get_or_init(|| Mutex::new(Slot::default()))
}

/// Use `config` instead of the `VMI_*` environment for the next context the
/// layer creates. `None` goes back to the environment.
pub fn configure(config: Option<LayerConfig>) {
    slot().lock().pending_config = config;
}

/// Count one more live instance, creating the context if there is none.
pub fn acquire() -> Arc<LayerContext> {
    let mut slot = slot().lock();
    slot.live_instances += 1;

    if let Some(context) = &slot.context {
        return Arc::clone(context);
    }

    let config = slot
        .pending_config
        .clone()
        .unwrap_or_else(LayerConfig::from_env);
    diagnostics::set_strict_mode(config.strict);

    let context = Arc::new(LayerContext::new(config));
    slot.context = Some(Arc::clone(&context));
    #[cfg(feature = "log")]
    log::debug!("layer context created: {:?}", context);
    context
}

/// The live context, if any instance is alive.
pub fn current() -> Option<Arc<LayerContext>> {
    SLOT.get()?.lock().context.clone()
}

/// Count one fewer live instance.
///
/// Returns `true` when this call tore the context down.
pub fn release() -> bool {
    let retired = {
        let mut slot = slot().lock();
        slot.live_instances = slot.live_instances.saturating_sub(1);
        if slot.live_instances == 0 {
            slot.context.take()
        } else {
            None
        }
    };
    // Dropped outside the lock; the last Arc flushes the backend.
    retired.is_some()
}

/// Number of instances the slot counts as alive.
pub fn live_instances() -> usize {
    SLOT.get().map_or(0, |slot| slot.lock().live_instances)
}
