//! Module Execution Engine
//!
//! Everything that runs a single scan module: the [`ScanModule`] trait modules
//! implement, their typed settings and options, and the [`ModuleWorker`] that
//! queues, filters and dispatches events to them.

pub mod admission;
pub mod builtin;
mod dispatch;
mod emit;
pub mod error;
pub mod options;
pub mod settings;
pub mod status;
pub mod traits;
pub mod worker;

pub use admission::Admission;
pub use error::{ModuleError, ModuleResult};
pub use options::{ModuleOptions, OptionKind, OptionSpec, OptionValue};
pub use settings::{configure, ModuleSettings, ModuleType};
pub use status::{EventCounts, ModuleStatus, TaskCounts};
pub use traits::{FilterVerdict, ModuleInfo, ScanModule, SetupStatus};
pub use worker::{CleanupCallback, ModuleWorker};
