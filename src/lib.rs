//! scancore
//!
//! Module execution engine for reconnaissance scans. Modules watch event
//! types, handle the events distributed to them and emit new events, which
//! the scan manager dedupes, scopes and fans out to the other modules.
//!
//! ```no_run
//! use std::sync::Arc;
//! use scancore::module::builtin::{Collector, Speculate};
//! use scancore::scan::{ScanConfig, Scanner};
//!
//! # async fn scan() -> Result<(), scancore::scan::ScanError> {
//! let (collector, _events) = Collector::new();
//! let scanner = Scanner::builder(ScanConfig::new(["10.0.0.0/30"]))
//!     .module(Arc::new(Speculate::new()))
//!     .module(Arc::new(collector))
//!     .build()?;
//! let summary = scanner.run().await?;
//! println!("{} events", summary.events_distributed);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod event;
pub mod logging;
pub mod module;
pub mod net;
pub mod pool;
pub mod queue;
pub mod scan;
pub mod scope;
