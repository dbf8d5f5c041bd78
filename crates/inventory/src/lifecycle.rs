//! Engine lifecycle
//!
//! [`InventoryEngine`] owns the store for as long as it is registered with
//! an [`EventSource`]. Bringing it up is all-or-nothing: the store is
//! allocated first, then the source registration is attempted, and if that
//! fails nothing is left registered or allocated. Both `initialize` and
//! `shutdown` may be called repeatedly.

use crate::dispatcher::{DEFAULT_DEFERRED_QUEUE, EventDispatcher};
use crate::error::{InventoryError, Result};
use crate::filter::AdmissionFilter;
use crate::report::{ReportRenderer, render};
use crate::store::{DEFAULT_CAPACITY, InventorySnapshot, InventoryStore, OverflowPolicy};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Engine construction parameters, fixed for the engine's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of records
    pub capacity: usize,
    /// What happens to an insert once `capacity` is reached
    pub overflow_policy: OverflowPolicy,
    /// Events that may wait for a busy store lock
    pub deferred_queue: usize,
    /// Admission policy
    pub filter: AdmissionFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            deferred_queue: DEFAULT_DEFERRED_QUEUE,
            filter: AdmissionFilter::default(),
        }
    }
}

/// Producer of connect/disconnect notifications
///
/// A source delivers events by calling [`EventDispatcher::dispatch`] from
/// whatever context it runs in. `register` must either fully subscribe and
/// return the registration, or fail without keeping the dispatcher.
pub trait EventSource {
    /// Token that keeps the subscription alive
    type Registration;

    /// Start delivering events to `dispatcher`
    fn register(&mut self, dispatcher: Arc<EventDispatcher>) -> Result<Self::Registration>;

    /// Stop delivering events; no dispatch happens after this returns
    fn unregister(&mut self, registration: Self::Registration);
}

struct Running<R> {
    dispatcher: Arc<EventDispatcher>,
    registration: R,
}

/// Store, dispatcher and source registration bundled with their lifecycle
pub struct InventoryEngine<S: EventSource> {
    config: EngineConfig,
    source: S,
    running: Option<Running<S::Registration>>,
}

impl<S: EventSource> InventoryEngine<S> {
    pub fn new(config: EngineConfig, source: S) -> Self {
        Self {
            config,
            source,
            running: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Allocate the store and register with the event source
    ///
    /// Returns the dispatcher the source delivers to. Calling this on a
    /// running engine returns the existing dispatcher.
    pub fn initialize(&mut self) -> Result<Arc<EventDispatcher>> {
        if let Some(running) = &self.running {
            debug!("Inventory engine already initialized");
            return Ok(Arc::clone(&running.dispatcher));
        }

        let store = InventoryStore::new(self.config.capacity, self.config.overflow_policy)
            .map_err(initialization_error)?;
        let dispatcher = EventDispatcher::with_deferred_capacity(
            Arc::new(store),
            self.config.filter.clone(),
            self.config.deferred_queue,
        )
        .map_err(initialization_error)?;
        let dispatcher = Arc::new(dispatcher);

        let registration = self
            .source
            .register(Arc::clone(&dispatcher))
            .map_err(|e| {
                warn!("Event source registration failed: {}", e);
                initialization_error(e)
            })?;

        info!(
            "Inventory engine initialized: capacity={}, policy={}, whitelist={}",
            dispatcher.store().capacity(),
            dispatcher.store().policy().as_str(),
            dispatcher.filter().is_whitelist()
        );

        self.running = Some(Running {
            dispatcher: Arc::clone(&dispatcher),
            registration,
        });
        Ok(dispatcher)
    }

    /// Unregister from the event source and release the store
    ///
    /// No-op when the engine is not running.
    pub fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            self.source.unregister(running.registration);
            let records = running.dispatcher.store().len();
            drop(running.dispatcher);
            info!("Inventory engine shut down ({} records released)", records);
        }
    }

    pub fn dispatcher(&self) -> Option<&Arc<EventDispatcher>> {
        self.running.as_ref().map(|running| &running.dispatcher)
    }

    /// Renderer bound to the running store and its counters
    pub fn renderer(&self) -> Option<ReportRenderer> {
        self.dispatcher().map(|dispatcher| {
            ReportRenderer::new(Arc::clone(dispatcher.store()))
                .with_counters(Arc::clone(dispatcher.counters()))
        })
    }

    /// Render the current inventory
    ///
    /// A stopped engine renders as an empty inventory.
    pub fn report(&self, with_stats: bool) -> String {
        match self.dispatcher() {
            Some(dispatcher) => {
                let snapshot = dispatcher.store().snapshot();
                let stats = with_stats.then(|| dispatcher.stats());
                render(&snapshot, stats.as_ref())
            }
            None => render(
                &InventorySnapshot::from_records([], self.config.capacity),
                None,
            ),
        }
    }
}

impl<S: EventSource> Drop for InventoryEngine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn initialization_error(e: InventoryError) -> InventoryError {
    match e {
        InventoryError::InitializationFailed(_) => e,
        other => InventoryError::InitializationFailed(other.to_string()),
    }
}
