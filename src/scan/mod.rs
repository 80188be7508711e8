//! Scan Engine
//!
//! Scan-wide context, the dispatcher that distributes emitted events, and
//! the orchestrator that runs a scan from setup to cleanup.

pub mod context;
pub mod error;
pub mod manager;
pub mod scanner;

pub use context::{catch, panic_message, ScanContext, ScanSettings, ScanStatus, POLL_INTERVAL};
pub use error::{ScanError, ScanResult};
pub use manager::ScanManager;
pub use scanner::{ScanConfig, ScanSummary, Scanner, ScannerBuilder};
