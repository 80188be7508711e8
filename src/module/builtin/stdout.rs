//! Stdout Module
//!
//! Output module printing each event as a text line or a JSON record.

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::Event;
use crate::module::{
    ModuleError, ModuleInfo, ModuleResult, ModuleSettings, ModuleWorker, OptionKind, OptionSpec,
    OptionValue, ScanModule, SetupStatus,
};

pub struct Stdout {
    info: ModuleInfo,
}

impl Default for Stdout {
    fn default() -> Self {
        Self::new()
    }
}

impl Stdout {
    pub fn new() -> Self {
        let info = ModuleInfo::new("stdout", "Print events to standard output")
            .watches_all()
            .option(OptionSpec::new(
                "format",
                OptionKind::Str,
                OptionValue::Str("text".to_string()),
                "Output format: text or json",
            ))
            .option(OptionSpec::new(
                "event_types",
                OptionKind::List,
                OptionValue::List(Vec::new()),
                "Only print these event types (all when empty)",
            ));
        Self { info }
    }

    fn render(worker: &ModuleWorker, event: &Event) -> ModuleResult<String> {
        if worker.options().get_str("format") == Some("json") {
            return serde_json::to_string(&event.record())
                .map_err(|e| ModuleError::handler(format!("Failed to serialize {event}: {e}")));
        }
        Ok(format!(
            "[{}]\t{}\t{}",
            event.event_type(),
            event.data(),
            event.module().unwrap_or("TARGET")
        ))
    }
}

#[async_trait]
impl ScanModule for Stdout {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn settings(&self) -> ModuleSettings {
        ModuleSettings::output()
    }

    async fn setup(&self, worker: &ModuleWorker) -> ModuleResult<SetupStatus> {
        match worker.options().get_str("format") {
            Some("text") | Some("json") => Ok(SetupStatus::Success),
            other => Ok(SetupStatus::HardFail(format!(
                "Unsupported output format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    async fn handle_event(&self, worker: &ModuleWorker, event: Arc<Event>) -> ModuleResult<()> {
        let wanted = worker.options().get_list("event_types").unwrap_or(&[]);
        if !wanted.is_empty() && !wanted.iter().any(|t| t == event.event_type()) {
            return Ok(());
        }
        println!("{}", Self::render(worker, &event)?);
        Ok(())
    }
}
