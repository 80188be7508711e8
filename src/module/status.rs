//! Module status snapshots

use serde::{Deserialize, Serialize};

/// Events held for or by a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    /// Waiting in the module's own queue
    pub incoming: usize,
    /// Emitted by the module, not yet distributed
    pub outgoing: usize,
}

/// Tasks in flight on the module's pools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub main_pool: usize,
    pub internal_pool: usize,
    pub total: usize,
}

/// Read-only view of a module worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub events: EventCounts,
    pub tasks: TaskCounts,
    pub errored: bool,
    /// True while any count above is non-zero
    pub running: bool,
}

impl ModuleStatus {
    pub fn new(events: EventCounts, main_pool: usize, internal_pool: usize, errored: bool) -> Self {
        let tasks = TaskCounts {
            main_pool,
            internal_pool,
            total: main_pool + internal_pool,
        };
        let running = tasks.total > 0 || events.incoming > 0 || events.outgoing > 0;
        Self {
            events,
            tasks,
            errored,
            running,
        }
    }
}
