//! Module Worker
//!
//! A [`ModuleWorker`] wraps one [`ScanModule`] for the lifetime of a scan. It
//! owns the module's incoming queue and task pools, tracks the sticky error
//! state, and is the handle passed to every module hook.
//!
//! Admission lives in `admission.rs`, the worker loop in `dispatch.rs` and
//! event emission in `emit.rs`.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::{ModuleError, ModuleResult};
use super::options::ModuleOptions;
use super::settings::ModuleSettings;
use super::status::{EventCounts, ModuleStatus};
use super::traits::{ScanModule, SetupStatus};
use crate::event::Event;
use crate::pool::BoundedPool;
use crate::queue::EventQueue;
use crate::scan::context::{catch, panic_message, ScanContext};

/// Deferred cleanup registered by a module
pub type CleanupCallback = Box<dyn FnOnce() -> BoxFuture<'static, ModuleResult<()>> + Send>;

/// Lifecycle of a worker's incoming queue
pub(super) enum IncomingQueue {
    /// Not created yet
    Uninit,
    Active(Arc<EventQueue<Arc<Event>>>),
    /// Drained by the error state; never recreated
    Disabled,
}

/// Shared state behind a [`ModuleWorker`] handle
pub struct WorkerInner {
    pub(super) name: String,
    pub(super) log_target: String,
    pub(super) module: Arc<dyn ScanModule>,
    pub(super) settings: ModuleSettings,
    pub(super) options: ModuleOptions,
    pub(super) watched: HashSet<String>,
    pub(super) ctx: Arc<ScanContext>,
    /// Sticky; set once by `set_error_state`
    pub(super) errored: AtomicBool,
    pub(super) queue: Mutex<IncomingQueue>,
    /// Signalled whenever an event is queued
    pub(super) event_received: Notify,
    pub(super) main_pool: BoundedPool,
    pub(super) internal_pool: BoundedPool,
    /// When the last batch was flushed; `None` until the first check
    pub(super) last_batch: Mutex<Option<Instant>>,
    pub(super) request_failures: AtomicUsize,
    pub(super) cleaned_up: AtomicBool,
    pub(super) cleanup_callbacks: Mutex<Vec<CleanupCallback>>,
}

/// Cloneable handle to a module's worker
#[derive(Clone)]
pub struct ModuleWorker {
    pub(super) inner: Arc<WorkerInner>,
}

impl ModuleWorker {
    /// Create a worker and register it with the scan
    pub fn new(
        module: Arc<dyn ScanModule>,
        settings: ModuleSettings,
        options: ModuleOptions,
        ctx: Arc<ScanContext>,
    ) -> Self {
        let info = module.info();
        let name = info.name.clone();
        let watched = info.watched_events.iter().cloned().collect();
        let main_pool = BoundedPool::new(
            format!("{name}.main"),
            settings.max_threads,
            ctx.main_pool().clone(),
            ctx.stop_token().clone(),
        );
        let internal_pool = BoundedPool::new(
            format!("{name}.internal"),
            settings.max_event_handlers,
            ctx.internal_pool().clone(),
            ctx.stop_token().clone(),
        );

        let inner = Arc::new(WorkerInner {
            log_target: format!("scancore::modules::{name}"),
            name,
            module,
            settings,
            options,
            watched,
            ctx,
            errored: AtomicBool::new(false),
            queue: Mutex::new(IncomingQueue::Uninit),
            event_received: Notify::new(),
            main_pool,
            internal_pool,
            last_batch: Mutex::new(None),
            request_failures: AtomicUsize::new(0),
            cleaned_up: AtomicBool::new(false),
            cleanup_callbacks: Mutex::new(Vec::new()),
        });
        inner.ctx.register_worker(&inner.name, Arc::downgrade(&inner));
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<WorkerInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Log target of this module, `scancore::modules::<name>`
    pub fn log_target(&self) -> &str {
        &self.inner.log_target
    }

    pub fn settings(&self) -> &ModuleSettings {
        &self.inner.settings
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.inner.options
    }

    pub fn module(&self) -> &Arc<dyn ScanModule> {
        &self.inner.module
    }

    pub fn ctx(&self) -> &Arc<ScanContext> {
        &self.inner.ctx
    }

    pub fn watched_events(&self) -> &HashSet<String> {
        &self.inner.watched
    }

    pub fn errored(&self) -> bool {
        self.inner.errored.load(Ordering::Acquire)
    }

    /// The incoming queue, created on first use. `None` once disabled.
    pub(super) fn incoming_queue(&self) -> Option<Arc<EventQueue<Arc<Event>>>> {
        let mut state = self.inner.queue.lock();
        Self::activate(&mut state, &self.inner.ctx)
    }

    pub(super) fn activate(
        state: &mut IncomingQueue,
        ctx: &ScanContext,
    ) -> Option<Arc<EventQueue<Arc<Event>>>> {
        match state {
            IncomingQueue::Active(queue) => Some(Arc::clone(queue)),
            IncomingQueue::Disabled => None,
            IncomingQueue::Uninit => {
                let queue = Arc::new(EventQueue::new(ctx.settings().dequeue_policy));
                *state = IncomingQueue::Active(Arc::clone(&queue));
                Some(queue)
            }
        }
    }

    /// Events waiting in this module's queue
    pub fn num_incoming(&self) -> usize {
        match &*self.inner.queue.lock() {
            IncomingQueue::Active(queue) => queue.qsize(),
            _ => 0,
        }
    }

    /// Events emitted by this module that the manager has not distributed yet
    pub fn outgoing_depth(&self) -> usize {
        self.inner.ctx.incoming().module_depth(&self.inner.name)
    }

    /// Put the worker in its sticky error state.
    ///
    /// Returns `true` only on the transition. The incoming queue is drained
    /// and disabled; tasks already dispatched keep running.
    pub fn set_error_state(&self, message: Option<&str>) -> bool {
        let mut state = self.inner.queue.lock();
        if self.inner.errored.swap(true, Ordering::AcqRel) {
            return false;
        }
        let target = self.log_target();
        if let Some(message) = message {
            warn!(target: target, "{message}");
        }
        debug!(target: target, "Setting error state for module {}", self.name());
        if let IncomingQueue::Active(queue) = &*state {
            let dropped = queue.drain().len();
            debug!(target: target, "Emptied event queue ({dropped} events)");
        }
        *state = IncomingQueue::Disabled;
        true
    }

    /// Run the module's setup hook
    pub async fn setup(&self) -> SetupStatus {
        let target = self.log_target();
        debug!(target: target, "Setting up module {}", self.name());
        let outcome = AssertUnwindSafe(self.inner.module.setup(self))
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(Ok(SetupStatus::HardFail(message))) => {
                self.set_error_state(None);
                SetupStatus::HardFail(message)
            }
            Ok(Ok(status)) => status,
            Ok(Err(ModuleError::Wordlist(message))) => {
                self.set_error_state(None);
                SetupStatus::SoftFail(message)
            }
            Ok(Err(e)) => {
                self.set_error_state(None);
                SetupStatus::HardFail(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(target: target, "Panic during setup of {}: {message}", self.name());
                self.set_error_state(None);
                SetupStatus::HardFail(message)
            }
        };
        debug!(target: target, "Finished setting up module {}: {status:?}", self.name());
        status
    }

    /// Snapshot of queue depths, pool usage and error state
    pub fn status(&self) -> ModuleStatus {
        ModuleStatus::new(
            EventCounts {
                incoming: self.num_incoming(),
                outgoing: self.outgoing_depth(),
            },
            self.inner.main_pool.num_tasks(),
            self.inner.internal_pool.num_tasks(),
            self.errored(),
        )
    }

    /// Whether the module has queued events or tasks in flight
    pub fn running(&self) -> bool {
        self.status().running
    }

    /// Resolve once both pools have no task in flight
    pub async fn wait_idle(&self) {
        self.inner.main_pool.wait_idle().await;
        self.inner.internal_pool.wait_idle().await;
    }

    /// Await `future` under this module's log target, logging failures
    pub async fn catch<T, F>(&self, label: &str, future: F) -> Option<T>
    where
        F: Future<Output = ModuleResult<T>>,
    {
        let label = format!("{}.{label}", self.name());
        catch(self.log_target(), &label, future).await
    }

    pub async fn finish(&self) {
        self.catch("finish", self.inner.module.finish(self)).await;
    }

    pub async fn report(&self) {
        self.catch("report", self.inner.module.report(self)).await;
    }

    /// `finish` as an owned future, for pool submission
    pub(super) fn finish_task(&self) -> BoxFuture<'static, ()> {
        let worker = self.clone();
        async move { worker.finish().await }.boxed()
    }

    /// Register a callback to run after the module's cleanup hook
    pub fn add_cleanup_callback<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ModuleResult<()>> + Send + 'static,
    {
        self.inner
            .cleanup_callbacks
            .lock()
            .push(Box::new(move || callback().boxed()));
    }

    /// Run the cleanup hook and registered callbacks. Only the first call
    /// does anything.
    pub async fn cleanup(&self) {
        if self.inner.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        self.catch("cleanup", self.inner.module.cleanup(self)).await;
        let callbacks = std::mem::take(&mut *self.inner.cleanup_callbacks.lock());
        for callback in callbacks {
            self.catch("cleanup callback", callback()).await;
        }
    }

    /// Spawn the worker loop
    pub fn start(&self) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move { worker.run().await })
    }
}

impl fmt::Debug for ModuleWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleWorker")
            .field("name", &self.inner.name)
            .field("errored", &self.errored())
            .field("settings", &self.inner.settings)
            .finish()
    }
}
