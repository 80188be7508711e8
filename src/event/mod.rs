//! Event Model
//!
//! Events are the unit of work exchanged between modules. This module defines
//! the event itself, the scan-wide table that resolves parent links, the
//! factory collaborator that validates new events, and the envelope used to
//! hand emitted events to the manager.

pub mod emit;
pub mod error;
pub mod factory;
pub mod model;
pub mod table;

pub use emit::{EmitOptions, EmitOutcome, EmittedEvent};
pub use error::{ValidationError, ValidationResult};
pub use factory::{DefaultEventFactory, EventFactory, EventRequest};
pub use model::{types, Event, EventId, EventRecord, DEFAULT_PRIORITY, TARGET_TAG};
pub use table::EventTable;
