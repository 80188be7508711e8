//! Worker loop
//!
//! Pulls events from the module's queue and dispatches them, one at a time or
//! in batches, until the scan stops.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::debug;
use tokio::time::Instant;

use super::error::ModuleResult;
use super::settings::ModuleType;
use super::worker::ModuleWorker;
use crate::event::Event;
use crate::scan::context::{panic_message, ScanStatus, POLL_INTERVAL};

impl ModuleWorker {
    /// Run the worker loop until the scan stops.
    ///
    /// An unexpected error or panic at loop level puts the module in error
    /// state; cancellation exits quietly.
    pub(super) async fn run(&self) {
        let target = self.log_target();
        match AssertUnwindSafe(self.run_loop()).catch_unwind().await {
            Ok(Ok(())) => debug!(target: target, "Worker loop for {} exited", self.name()),
            Ok(Err(e)) if e.is_cancelled() => debug!(target: target, "Scan cancelled, {e}"),
            Ok(Err(e)) => {
                self.set_error_state(Some(&format!("Error in module {}: {e}", self.name())));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.set_error_state(Some(&format!("Panic in module {}: {message}", self.name())));
            }
        }
    }

    async fn run_loop(&self) -> ModuleResult<()> {
        let stop = self.ctx().stop_token().clone();
        let batch_size = self.settings().batch_size;

        while !stop.is_cancelled() {
            // hold back while our emitted events pile up in the manager
            if let Some(cap) = self.settings().qsize {
                if self.outgoing_depth() >= cap {
                    self.wait_for_event().await;
                    continue;
                }
            }

            if batch_size > 1 {
                let force = self.force_batch();
                if !self.handle_batch(force).await? {
                    self.wait_for_event().await;
                }
                continue;
            }

            let Some(queue) = self.incoming_queue() else {
                debug!(target: self.log_target(), "Event queue is disabled, stopping");
                return Ok(());
            };
            if let Ok(event) = queue.get(POLL_INTERVAL).await {
                self.dispatch(event).await?;
            }
        }
        Ok(())
    }

    /// Dispatch a single event according to the module type
    async fn dispatch(&self, event: Arc<Event>) -> ModuleResult<()> {
        debug!(
            target: self.log_target(),
            "Got {event} from {}",
            event.module().unwrap_or("scan")
        );
        if event.is_finished() {
            self.inner
                .internal_pool
                .submit(self.finish_task(), None)
                .await?;
            return Ok(());
        }
        match self.settings().module_type {
            ModuleType::Output => self.postcheck_and_handle(event).await,
            ModuleType::Scan => {
                let worker = self.clone();
                self.inner
                    .internal_pool
                    .submit(async move { worker.postcheck_and_handle(event).await }, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Flush a batch if one is due. Returns `true` if work was submitted.
    pub(super) async fn handle_batch(&self, force: bool) -> ModuleResult<bool> {
        let batch_size = self.settings().batch_size;
        let queued = self.num_incoming();
        if queued == 0 || !(force || queued >= batch_size) {
            return Ok(false);
        }
        self.reset_batch_idle();

        let (events, finish) = self.events_waiting(batch_size);
        let mut checked = Vec::with_capacity(events.len());
        for event in events {
            match self.postcheck(&event).await {
                Ok(()) => checked.push(event),
                Err(reason) => {
                    debug!(target: self.log_target(), "Not accepting {event} because {reason}")
                }
            }
        }

        let on_finish = finish.then(|| self.finish_task());
        if !checked.is_empty() && !self.errored() {
            debug!(target: self.log_target(), "Handling batch of {} events", checked.len());
            let worker = self.clone();
            self.inner
                .internal_pool
                .submit(
                    async move {
                        let module = Arc::clone(worker.module());
                        worker
                            .catch("handle_batch", module.handle_batch(&worker, checked))
                            .await;
                    },
                    on_finish,
                )
                .await?;
            return Ok(true);
        }
        if let Some(finish) = on_finish {
            self.inner.internal_pool.submit(finish, None).await?;
            return Ok(true);
        }
        Ok(!checked.is_empty())
    }

    /// Take up to `batch_size` events off the queue, noting any `FINISHED`
    fn events_waiting(&self, batch_size: usize) -> (Vec<Arc<Event>>, bool) {
        let mut events = Vec::with_capacity(batch_size);
        let mut finish = false;
        let Some(queue) = self.incoming_queue() else {
            return (events, finish);
        };
        while events.len() < batch_size {
            match queue.get_nowait() {
                Ok(event) if event.is_finished() => finish = true,
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        (events, finish)
    }

    /// Whether a partial batch should be flushed now
    fn force_batch(&self) -> bool {
        if self.batch_idle() >= self.settings().batch_wait {
            return true;
        }
        if self.ctx().status() == ScanStatus::Finishing {
            return true;
        }
        self.ctx().batch_stalemate(self.name())
    }

    /// Time since the last batch was flushed
    fn batch_idle(&self) -> Duration {
        let now = Instant::now();
        let mut last = self.inner.last_batch.lock();
        now.duration_since(*last.get_or_insert(now))
    }

    fn reset_batch_idle(&self) {
        *self.inner.last_batch.lock() = Some(Instant::now());
    }

    /// Sleep until an event is queued, the poll interval passes or the scan stops
    async fn wait_for_event(&self) {
        let stop = self.ctx().stop_token();
        tokio::select! {
            _ = self.inner.event_received.notified() => {}
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = stop.cancelled() => {}
        }
    }
}
