//! Event emission and module-side helpers

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};
use tokio::task::JoinHandle;

use super::error::ModuleResult;
use super::worker::ModuleWorker;
use crate::event::{EmitOptions, EmitOutcome, EmittedEvent, Event, EventRequest};
use crate::scan::context::POLL_INTERVAL;

impl ModuleWorker {
    /// Build an event attributed to this module.
    ///
    /// Validation failures are logged at warn and yield `Ok(None)`, unless
    /// the request asked for them to be raised.
    pub fn make_event(&self, request: EventRequest, source: &Event) -> ModuleResult<Option<Event>> {
        let id = self.ctx().events().next_id();
        match self.ctx().factory().make_event(id, &request, source) {
            Ok(event) => Ok(Some(event.with_module(self.name(), self.settings().priority))),
            Err(e) if request.raise_error => Err(e.into()),
            Err(e) => {
                warn!(target: self.log_target(), "{e}");
                Ok(None)
            }
        }
    }

    /// Emit an event caused by `source` with default options
    pub async fn emit_event(&self, request: EventRequest, source: &Arc<Event>) -> ModuleResult<EmitOutcome> {
        self.emit_event_with(request, source, EmitOptions::default()).await
    }

    /// Emit an event caused by `source`.
    ///
    /// Events that are probably out of scope have their priority lowered by
    /// their scope distance. The event is handed to the manager only after
    /// `source` resolves, with its scope distance recomputed from the source.
    pub async fn emit_event_with(
        &self,
        request: EventRequest,
        source: &Arc<Event>,
        options: EmitOptions,
    ) -> ModuleResult<EmitOutcome> {
        let Some(mut event) = self.make_event(request, source)? else {
            return Ok(EmitOutcome::Dropped);
        };

        let distance = event.scope_distance();
        if distance > 0 {
            let scope = self.ctx().scope();
            let in_scope = scope.in_scope(&event) && !scope.blacklisted(&event);
            if !in_scope {
                let penalty = u8::try_from(distance).unwrap_or(u8::MAX);
                event.set_module_priority(event.module_priority().saturating_add(penalty));
            }
        }

        loop {
            if self.ctx().is_stopping() {
                debug!(target: self.log_target(), "Scan stopped before {} resolved", source.id());
                return Ok(EmitOutcome::Aborted);
            }
            if source.wait_resolved(POLL_INTERVAL).await {
                break;
            }
        }
        event.set_scope_distance(source.scope_distance().saturating_add(1));

        let event = Arc::new(event);
        self.ctx()
            .incoming()
            .put(EmittedEvent::new(Arc::clone(&event), options));
        Ok(EmitOutcome::Queued(event))
    }

    /// Run background work on the module's main pool.
    ///
    /// Waits for a free slot; errors and panics inside `future` are logged.
    pub async fn submit_task<F>(&self, future: F) -> ModuleResult<JoinHandle<()>>
    where
        F: Future<Output = ModuleResult<()>> + Send + 'static,
    {
        let worker = self.clone();
        let handle = self
            .inner
            .main_pool
            .submit(
                async move {
                    worker.catch("submit_task", future).await;
                },
                None,
            )
            .await?;
        Ok(handle)
    }

    /// Await a request, counting consecutive failures.
    ///
    /// `None` counts as a failed request. Once the count reaches the module's
    /// `failed_request_abort_threshold` the module enters error state.
    pub async fn request_with_fail_count<T, F>(&self, request: F) -> Option<T>
    where
        F: Future<Output = Option<T>>,
    {
        let response = request.await;
        let failures = if response.is_some() {
            self.inner.request_failures.store(0, Ordering::Release);
            0
        } else {
            self.inner.request_failures.fetch_add(1, Ordering::AcqRel) + 1
        };
        if failures >= self.settings().failed_request_abort_threshold {
            self.set_error_state(Some(&format!(
                "Setting error state due to {failures} failed HTTP requests"
            )));
        }
        response
    }
}
