//! Scan Context
//!
//! Scan-wide state shared by the manager and every module worker. The context
//! is created once per scan and passed explicitly as `Arc<ScanContext>`.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{types, EmittedEvent, Event, EventFactory, EventTable};
use crate::module::worker::WorkerInner;
use crate::module::{ModuleResult, ModuleWorker};
use crate::pool::SharedPool;
use crate::queue::{DequeuePolicy, EventQueue};
use crate::scope::ScopeOracle;

/// Upper bound on every wait in the engine before the stop flag is re-checked
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const LOG_TARGET: &str = "scancore::scan";

/// Lifecycle of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    NotStarted,
    Starting,
    Running,
    /// Out of work; modules are running their finish hooks
    Finishing,
    Cleaning,
    /// A stop was requested
    Aborting,
    Aborted,
    Finished,
    Failed,
}

impl ScanStatus {
    /// Whether the scan has reached a terminal state
    pub fn is_done(&self) -> bool {
        matches!(self, ScanStatus::Aborted | ScanStatus::Finished | ScanStatus::Failed)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStatus::NotStarted => "NOT_STARTED",
            ScanStatus::Starting => "STARTING",
            ScanStatus::Running => "RUNNING",
            ScanStatus::Finishing => "FINISHING",
            ScanStatus::Cleaning => "CLEANING",
            ScanStatus::Aborting => "ABORTING",
            ScanStatus::Aborted => "ABORTED",
            ScanStatus::Finished => "FINISHED",
            ScanStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// Scan-wide engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// How many hops past the targets modules may look by default
    pub scope_search_distance: u32,
    /// Scan-wide capacity shared by every module's main pool
    pub max_threads: usize,
    /// Scan-wide capacity shared by every module's handler pool
    pub max_event_handlers: usize,
    pub dequeue_policy: DequeuePolicy,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            scope_search_distance: 1,
            max_threads: 25,
            max_event_handlers: (num_cpus::get() * 2).max(4),
            dequeue_policy: DequeuePolicy::Weighted,
        }
    }
}

/// Shared state of one scan
pub struct ScanContext {
    id: String,
    settings: ScanSettings,
    /// Set once when the scan stops; never cleared
    stop: CancellationToken,
    status: watch::Sender<ScanStatus>,
    events: EventTable,
    scope: Arc<dyn ScopeOracle>,
    factory: Arc<dyn EventFactory>,
    /// Events emitted by modules, waiting for distribution
    incoming: EventQueue<EmittedEvent>,
    main_pool: SharedPool,
    internal_pool: SharedPool,
    root_event: Arc<Event>,
    workers: DashMap<String, Weak<WorkerInner>>,
}

impl ScanContext {
    pub fn new(
        settings: ScanSettings,
        scope: Arc<dyn ScopeOracle>,
        factory: Arc<dyn EventFactory>,
    ) -> Arc<Self> {
        let id = format!("SCAN:{}", Uuid::new_v4());
        let events = EventTable::new();
        let root_event = Arc::new(Event::new(events.next_id(), types::SCAN, id.clone(), None));
        root_event.mark_resolved();
        events.insert(Arc::clone(&root_event));
        let (status, _) = watch::channel(ScanStatus::NotStarted);

        Arc::new(Self {
            id,
            stop: CancellationToken::new(),
            status,
            events,
            scope,
            factory,
            incoming: EventQueue::new(settings.dequeue_policy),
            main_pool: SharedPool::new(settings.max_threads),
            internal_pool: SharedPool::new(settings.max_event_handlers),
            root_event,
            workers: DashMap::new(),
            settings,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn scope_search_distance(&self) -> u32 {
        self.settings.scope_search_distance
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Request an abort. Workers exit without draining their queues.
    pub fn stop(&self) {
        let status = self.status();
        if !status.is_done() && status != ScanStatus::Cleaning {
            self.set_status(ScanStatus::Aborting);
        }
        self.stop.cancel();
    }

    pub fn status(&self) -> ScanStatus {
        *self.status.borrow()
    }

    pub fn set_status(&self, status: ScanStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(target: LOG_TARGET, "Scan status {previous} -> {status}");
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }

    pub fn scope(&self) -> &dyn ScopeOracle {
        self.scope.as_ref()
    }

    pub fn factory(&self) -> &dyn EventFactory {
        self.factory.as_ref()
    }

    /// The manager's queue of emitted events
    pub fn incoming(&self) -> &EventQueue<EmittedEvent> {
        &self.incoming
    }

    pub fn main_pool(&self) -> &SharedPool {
        &self.main_pool
    }

    pub fn internal_pool(&self) -> &SharedPool {
        &self.internal_pool
    }

    /// The `SCAN` event every target descends from
    pub fn root_event(&self) -> &Arc<Event> {
        &self.root_event
    }

    pub(crate) fn register_worker(&self, name: &str, worker: Weak<WorkerInner>) {
        self.workers.insert(name.to_string(), worker);
    }

    pub(crate) fn unregister_worker(&self, name: &str) {
        self.workers.remove(name);
    }

    /// Live workers registered with the scan
    pub fn workers(&self) -> Vec<ModuleWorker> {
        self.workers
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(ModuleWorker::from_inner)
            .collect()
    }

    /// True when every batching module other than `module` is idle, so none
    /// of them can produce the events `module` is waiting on to fill its
    /// batch. A lone batching module has nobody to wait on and is never in
    /// a stalemate.
    pub fn batch_stalemate(&self, module: &str) -> bool {
        let others: Vec<_> = self
            .workers()
            .into_iter()
            .filter(|worker| worker.name() != module && worker.settings().batch_size > 1)
            .collect();
        !others.is_empty() && others.iter().all(|worker| !worker.running())
    }

    /// Run `future`, logging any error or panic instead of propagating it
    pub async fn catch<T, F>(&self, label: &str, future: F) -> Option<T>
    where
        F: Future<Output = ModuleResult<T>>,
    {
        catch(LOG_TARGET, label, future).await
    }
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Await `future` and turn errors and panics into log records.
///
/// Cancellation is logged at debug, everything else at error.
pub async fn catch<T, F>(target: &str, label: &str, future: F) -> Option<T>
where
    F: Future<Output = ModuleResult<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) if e.is_cancelled() => {
            debug!(target: target, "{label}: {e}");
            None
        }
        Ok(Err(e)) => {
            error!(target: target, "Error in {label}: {e}");
            None
        }
        Err(panic) => {
            error!(target: target, "Panic in {label}: {}", panic_message(panic.as_ref()));
            None
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
