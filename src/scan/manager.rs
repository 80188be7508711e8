//! Scan Manager
//!
//! The manager drains the scan's incoming queue of emitted events, decides
//! what happens to each one and fans the survivors out to the module workers.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use log::{debug, error, trace};

use super::context::{panic_message, ScanContext, POLL_INTERVAL};
use super::error::{ScanError, ScanResult};
use crate::event::{EmitOptions, EmittedEvent, Event, EventRequest, TARGET_TAG};
use crate::module::{ModuleResult, ModuleStatus, ModuleWorker};

const LOG_TARGET: &str = "scancore::scan::manager";

/// Dispatcher between emitting modules and consuming modules
pub struct ScanManager {
    ctx: Arc<ScanContext>,
    /// Ordered by module priority, most urgent first
    workers: Vec<ModuleWorker>,
    by_name: HashMap<String, usize>,
    /// `(type, data)` keys already distributed
    seen: DashSet<String>,
    events_received: AtomicU64,
    events_distributed: AtomicU64,
}

impl ScanManager {
    pub fn new(ctx: Arc<ScanContext>, mut workers: Vec<ModuleWorker>) -> Self {
        workers.sort_by_key(|worker| worker.settings().priority);
        let by_name = workers
            .iter()
            .enumerate()
            .map(|(i, worker)| (worker.name().to_string(), i))
            .collect();
        Self {
            ctx,
            workers,
            by_name,
            seen: DashSet::new(),
            events_received: AtomicU64::new(0),
            events_distributed: AtomicU64::new(0),
        }
    }

    pub fn ctx(&self) -> &Arc<ScanContext> {
        &self.ctx
    }

    pub fn workers(&self) -> &[ModuleWorker] {
        &self.workers
    }

    pub fn worker(&self, name: &str) -> Option<&ModuleWorker> {
        self.by_name.get(name).map(|&i| &self.workers[i])
    }

    /// Distribute emitted events until the scan stops
    pub async fn run(&self) {
        let stop = self.ctx.stop_token().clone();
        debug!(target: LOG_TARGET, "Dispatcher started for {} modules", self.workers.len());
        loop {
            let emitted = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                emitted = self.ctx.incoming().get(POLL_INTERVAL) => emitted,
            };
            if let Ok(emitted) = emitted {
                self.distribute(emitted);
            }
        }
        debug!(target: LOG_TARGET, "Dispatcher stopped");
    }

    /// Decide the fate of one emitted event and hand it to the workers.
    ///
    /// Returns `true` if the event was distributed. The event's resolution
    /// signal fires on every path so children waiting on it never hang.
    pub fn distribute(&self, emitted: EmittedEvent) -> bool {
        let EmittedEvent { event, options } = emitted;
        self.events_received.fetch_add(1, Ordering::Relaxed);

        let emitter = event.module().and_then(|name| self.worker(name));
        let emitter_settings = emitter.map(|worker| worker.settings());

        let is_new = self.seen.insert(event.dedupe_key());
        if !is_new && emitter_settings.map_or(true, |settings| settings.suppress_dupes) {
            trace!(target: LOG_TARGET, "Suppressing duplicate {event}");
            event.mark_resolved();
            return false;
        }

        let scope = self.ctx.scope();
        let shepherds = emitter_settings.map_or(true, |settings| settings.scope_shepherding);
        if shepherds && event.scope_distance() > 0 && scope.in_scope(&event) {
            trace!(target: LOG_TARGET, "Shepherding {event} into scope");
            event.set_scope_distance(0);
        }

        if scope.blacklisted(&event) {
            debug!(target: LOG_TARGET, "Dropping blacklisted {event}");
            event.mark_resolved();
            return false;
        }

        if let Some(predicate) = &options.abort_if {
            match catch_unwind(AssertUnwindSafe(|| predicate(&event))) {
                Ok(false) => {}
                Ok(true) => {
                    debug!(target: LOG_TARGET, "Not distributing {event} because abort_if returned true");
                    event.mark_resolved();
                    return false;
                }
                Err(panic) => {
                    error!(
                        target: LOG_TARGET,
                        "Panic in abort_if for {event}: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        self.ctx.events().insert(Arc::clone(&event));
        event.mark_resolved();
        self.events_distributed.fetch_add(1, Ordering::Relaxed);

        for worker in &self.workers {
            if event.module() == Some(worker.name()) {
                continue;
            }
            if !is_new && !worker.settings().accept_dupes {
                continue;
            }
            worker.queue_event(Arc::clone(&event));
        }

        if let Some(callback) = &options.on_success {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                error!(
                    target: LOG_TARGET,
                    "Panic in on_success for {event}: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        true
    }

    /// Turn a raw target into a target-tagged event and queue it
    pub fn emit_target(&self, target: &str) -> ScanResult<Arc<Event>> {
        let request = EventRequest::new(target).with_tag(TARGET_TAG);
        let event = self
            .ctx
            .factory()
            .make_event(self.ctx.events().next_id(), &request, self.ctx.root_event())
            .map_err(|source| ScanError::Target {
                target: target.to_string(),
                source,
            })?;
        event.set_scope_distance(0);
        let event = Arc::new(event);
        self.ctx
            .incoming()
            .put(EmittedEvent::new(Arc::clone(&event), EmitOptions::default()));
        Ok(event)
    }

    /// Queue a `FINISHED` event into every worker
    pub fn broadcast_finished(&self) {
        let finished = Arc::new(Event::finished(
            self.ctx.events().next_id(),
            self.ctx.root_event(),
        ));
        debug!(target: LOG_TARGET, "Broadcasting {finished}");
        for worker in &self.workers {
            worker.queue_event(Arc::clone(&finished));
        }
    }

    /// Events a module emitted that have not been distributed yet
    pub fn outgoing_depth(&self, module: &str) -> usize {
        self.ctx.incoming().module_depth(module)
    }

    pub fn modules_status(&self) -> BTreeMap<String, ModuleStatus> {
        self.workers
            .iter()
            .map(|worker| (worker.name().to_string(), worker.status()))
            .collect()
    }

    /// Whether any module has work or events are waiting to be distributed
    pub fn running(&self) -> bool {
        !self.ctx.incoming().is_empty() || self.workers.iter().any(ModuleWorker::running)
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn events_distributed(&self) -> u64 {
        self.events_distributed.load(Ordering::Relaxed)
    }

    pub async fn catch<T, F>(&self, label: &str, future: F) -> Option<T>
    where
        F: Future<Output = ModuleResult<T>>,
    {
        self.ctx.catch(label, future).await
    }
}
