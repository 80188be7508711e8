//! Built-in Modules

pub mod collector;
pub mod speculate;
pub mod stdout;

use std::sync::Arc;

pub use collector::{Collector, EventStream};
pub use speculate::{Speculate, SPECULATE};
pub use stdout::Stdout;

use super::ScanModule;

/// Names accepted by [`load`]
pub const AVAILABLE: &[&str] = &[SPECULATE, "stdout"];

/// Instantiate a built-in module by name
pub fn load(name: &str) -> Option<Arc<dyn ScanModule>> {
    match name {
        SPECULATE => Some(Arc::new(Speculate::new())),
        "stdout" => Some(Arc::new(Stdout::new())),
        _ => None,
    }
}
