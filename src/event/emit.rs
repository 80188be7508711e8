//! Emission envelope
//!
//! What a module hands to the manager when it raises an event, and what it
//! gets back.

use std::fmt;
use std::sync::Arc;

use super::model::Event;

/// Predicate evaluated by the manager before distribution
pub type AbortIf = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Callback invoked after the event has been distributed
pub type OnSuccess = Arc<dyn Fn(&Arc<Event>) + Send + Sync>;

/// Per-emission options forwarded to the manager
#[derive(Clone, Default)]
pub struct EmitOptions {
    /// Drop the event at distribution time if this returns true
    pub abort_if: Option<AbortIf>,
    pub on_success: Option<OnSuccess>,
}

impl EmitOptions {
    pub fn abort_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.abort_if = Some(Arc::new(predicate));
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Event>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for EmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitOptions")
            .field("abort_if", &self.abort_if.is_some())
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

/// A finalized event waiting in the manager's incoming queue
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub event: Arc<Event>,
    pub options: EmitOptions,
}

impl EmittedEvent {
    pub fn new(event: Arc<Event>, options: EmitOptions) -> Self {
        Self { event, options }
    }
}

/// Result of [`ModuleWorker::emit_event`](crate::module::ModuleWorker::emit_event)
#[derive(Debug, Clone)]
pub enum EmitOutcome {
    /// Handed to the manager
    Queued(Arc<Event>),
    /// Construction failed validation; already logged
    Dropped,
    /// The scan stopped while waiting for the parent to resolve
    Aborted,
}

impl EmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EmitOutcome::Queued(_))
    }

    pub fn event(&self) -> Option<&Arc<Event>> {
        match self {
            EmitOutcome::Queued(event) => Some(event),
            _ => None,
        }
    }
}
