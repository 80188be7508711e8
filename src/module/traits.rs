//! Core Module Traits
//!
//! A scan module is business logic plugged into the engine through
//! [`ScanModule`]. Every hook receives the module's [`ModuleWorker`] handle,
//! which gives access to event emission, task submission and the scan.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::error::ModuleResult;
use super::options::OptionSpec;
use super::settings::ModuleSettings;
use super::worker::ModuleWorker;
use crate::event::{types, Event};

/// Static description of a module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    /// Unique module name
    pub name: String,
    pub description: String,
    /// Event types delivered to the module; `"*"` means all
    pub watched_events: Vec<String>,
    /// Event types the module may emit
    pub produced_events: Vec<String>,
    /// Schema of module-specific options
    pub options: Vec<OptionSpec>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            watched_events: Vec::new(),
            produced_events: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn watches<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watched_events.extend(event_types.into_iter().map(Into::into));
        self
    }

    pub fn watches_all(self) -> Self {
        self.watches([types::ANY])
    }

    pub fn produces<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produced_events.extend(event_types.into_iter().map(Into::into));
        self
    }

    pub fn option(mut self, spec: OptionSpec) -> Self {
        self.options.push(spec);
        self
    }
}

/// Outcome of module setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStatus {
    Success,
    /// The module is skipped but the scan continues
    SoftFail(String),
    /// The module is disabled and put in error state
    HardFail(String),
}

impl SetupStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SetupStatus::Success)
    }
}

/// Verdict of a module's custom event filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl FilterVerdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

impl From<bool> for FilterVerdict {
    fn from(accepted: bool) -> Self {
        Self {
            accepted,
            reason: None,
        }
    }
}

impl From<(bool, &str)> for FilterVerdict {
    fn from((accepted, reason): (bool, &str)) -> Self {
        Self {
            accepted,
            reason: Some(reason.to_string()),
        }
    }
}

impl From<(bool, String)> for FilterVerdict {
    fn from((accepted, reason): (bool, String)) -> Self {
        Self {
            accepted,
            reason: Some(reason),
        }
    }
}

/// Interface implemented by every scan module.
///
/// All hooks except [`info`](ScanModule::info) have defaults. Hooks run
/// behind the engine's error and panic catcher, so a failing hook is logged
/// and never takes the worker down.
#[async_trait]
pub trait ScanModule: Send + Sync {
    /// Get module metadata
    fn info(&self) -> &ModuleInfo;

    /// Default engine settings, before configuration overrides
    fn settings(&self) -> ModuleSettings {
        ModuleSettings::default()
    }

    /// Prepare the module before any event is delivered
    async fn setup(&self, _worker: &ModuleWorker) -> ModuleResult<SetupStatus> {
        Ok(SetupStatus::Success)
    }

    /// Handle a single event (used when `batch_size` is 1)
    async fn handle_event(&self, _worker: &ModuleWorker, _event: Arc<Event>) -> ModuleResult<()> {
        Ok(())
    }

    /// Handle a batch of events (used when `batch_size` is above 1).
    ///
    /// Defaults to calling [`handle_event`](ScanModule::handle_event) for each event.
    async fn handle_batch(&self, worker: &ModuleWorker, events: Vec<Arc<Event>>) -> ModuleResult<()> {
        for event in events {
            self.handle_event(worker, event).await?;
        }
        Ok(())
    }

    /// Custom admission filter applied right before dispatch
    async fn filter_event(&self, _worker: &ModuleWorker, _event: &Event) -> ModuleResult<FilterVerdict> {
        Ok(FilterVerdict::accept())
    }

    /// Called once the scan has run out of work
    async fn finish(&self, _worker: &ModuleWorker) -> ModuleResult<()> {
        Ok(())
    }

    /// Final summary step, before cleanup
    async fn report(&self, _worker: &ModuleWorker) -> ModuleResult<()> {
        Ok(())
    }

    /// Release resources. Runs exactly once and may not emit events.
    async fn cleanup(&self, _worker: &ModuleWorker) -> ModuleResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_verdict_conversions() {
        assert_eq!(FilterVerdict::from(true), FilterVerdict::accept());
        let verdict = FilterVerdict::from((false, "not interesting"));
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason.as_deref(), Some("not interesting"));
        assert_eq!(
            FilterVerdict::from((false, "x".to_string())),
            FilterVerdict::reject("x")
        );
    }

    #[test]
    fn test_module_info_builder() {
        let info = ModuleInfo::new("probe", "test module")
            .watches(["DNS_NAME", "IP_ADDRESS"])
            .produces(["URL"]);
        assert_eq!(info.watched_events, vec!["DNS_NAME", "IP_ADDRESS"]);
        assert_eq!(info.produced_events, vec!["URL"]);
        assert_eq!(ModuleInfo::new("all", "").watches_all().watched_events, vec!["*"]);
    }
}
