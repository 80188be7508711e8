//! Event admission
//!
//! Two gates stand between the manager and a module's handlers. The precheck
//! runs when an event is offered to the module's queue; the postcheck runs
//! right before the event is dispatched, once its scope distance is final.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error};

use super::builtin::speculate::SPECULATE;
use super::traits::FilterVerdict;
use super::worker::{IncomingQueue, ModuleWorker};
use crate::event::{types, Event, TARGET_TAG};
use crate::scan::context::panic_message;

const NOT_WATCHED: &str = "its type is not in watched_events";

/// Outcome of an admission check
pub type Admission = Result<(), String>;

impl ModuleWorker {
    /// Offer an event to this module.
    ///
    /// Returns `true` if the event was queued. Rejections are logged at debug,
    /// except for unwatched types.
    pub fn queue_event(&self, event: Arc<Event>) -> bool {
        let target = self.log_target();
        let mut state = self.inner.queue.lock();
        if matches!(*state, IncomingQueue::Disabled) {
            debug!(target: target, "Not in an acceptable state to queue {event}");
            return false;
        }
        if let Err(reason) = self.precheck(&event) {
            if reason != NOT_WATCHED {
                debug!(target: target, "Not accepting {event} because {reason}");
            }
            return false;
        }
        let Some(queue) = Self::activate(&mut state, &self.inner.ctx) else {
            return false;
        };
        queue.put(event);
        drop(state);
        self.inner.event_received.notify_one();
        true
    }

    /// Checks applied when an event is offered to the queue
    pub fn precheck(&self, event: &Event) -> Admission {
        if event.is_finished() {
            return Ok(());
        }
        if self.errored() {
            return Err("module is in error state".to_string());
        }
        let watched = self.watched_events();
        if !watched.contains(types::ANY) && !watched.contains(event.event_type()) {
            return Err(NOT_WATCHED.to_string());
        }
        if self.settings().target_only && !event.has_tag(TARGET_TAG) {
            return Err("it did not meet target_only filter criteria".to_string());
        }
        // an IP speculated from a range we already consume would be scanned twice
        if event.event_type() == types::IP_ADDRESS
            && event.module() == Some(SPECULATE)
            && self.name() != SPECULATE
            && watched.contains(types::IP_RANGE)
            && watched.contains(types::IP_ADDRESS)
            && self.ctx().events().source_type(event).as_deref() == Some(types::IP_RANGE)
        {
            return Err("module consumes IP ranges directly".to_string());
        }
        Ok(())
    }

    /// Checks applied right before dispatch, including the module's own filter
    pub async fn postcheck(&self, event: &Event) -> Admission {
        if event.is_finished() {
            return Ok(());
        }
        let settings = self.settings();
        let distance = event.scope_distance();
        if settings.in_scope_only && distance > 0 {
            return Err("it did not meet in_scope_only filter criteria".to_string());
        }
        if let Some(modifier) = settings.scope_distance_modifier {
            let search_distance = self.ctx().scope_search_distance();
            let max_distance = settings.max_scope_distance(search_distance);
            if distance < 0 {
                return Err(format!("its scope_distance ({distance}) is invalid."));
            }
            if distance > max_distance {
                return Err(format!(
                    "its scope_distance ({distance}) exceeds the maximum allowed by the scan \
                     ({search_distance}) + the module ({modifier}) == {max_distance}"
                ));
            }
        }

        let verdict = AssertUnwindSafe(self.inner.module.filter_event(self, event))
            .catch_unwind()
            .await;
        match verdict {
            Ok(Ok(FilterVerdict { accepted: true, .. })) => Ok(()),
            Ok(Ok(FilterVerdict { reason, .. })) => Err(match reason {
                Some(reason) => format!("it did not meet custom filter criteria: {reason}"),
                None => "it did not meet custom filter criteria".to_string(),
            }),
            Ok(Err(e)) if e.is_cancelled() => Err("Scan cancelled".to_string()),
            Ok(Err(e)) => {
                error!(target: self.log_target(), "Error in filter_event({event}): {e}");
                Err(format!("filter_event failed: {e}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(target: self.log_target(), "Panic in filter_event({event}): {message}");
                Err(format!("filter_event failed: {message}"))
            }
        }
    }

    /// Postcheck `event` and, if accepted, hand it to `handle_event`
    pub(super) async fn postcheck_and_handle(&self, event: Arc<Event>) {
        if let Err(reason) = self.postcheck(&event).await {
            debug!(target: self.log_target(), "Not accepting {event} because {reason}");
            return;
        }
        self.catch("handle_event", self.inner.module.handle_event(self, event))
            .await;
    }
}
