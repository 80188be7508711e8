//! Collector Module
//!
//! Output module that forwards every event it receives into a stream, for
//! library users who want the scan results in-process.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::event::Event;
use crate::module::{ModuleInfo, ModuleResult, ModuleSettings, ModuleWorker, ScanModule};

/// Stream of events seen by a [`Collector`]. Ends after the scan's cleanup.
pub type EventStream = UnboundedReceiverStream<Arc<Event>>;

pub struct Collector {
    info: ModuleInfo,
    sender: Mutex<Option<mpsc::UnboundedSender<Arc<Event>>>>,
}

impl Collector {
    /// Create a collector named `collector`
    pub fn new() -> (Self, EventStream) {
        Self::named("collector")
    }

    pub fn named(name: impl Into<String>) -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let collector = Self {
            info: ModuleInfo::new(name, "Forward every event into an in-process stream").watches_all(),
            sender: Mutex::new(Some(sender)),
        };
        (collector, UnboundedReceiverStream::new(receiver))
    }
}

#[async_trait]
impl ScanModule for Collector {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn settings(&self) -> ModuleSettings {
        ModuleSettings::output()
    }

    async fn handle_event(&self, _worker: &ModuleWorker, event: Arc<Event>) -> ModuleResult<()> {
        if let Some(sender) = self.sender.lock().as_ref() {
            // receiver gone means nobody is listening any more
            let _ = sender.send(event);
        }
        Ok(())
    }

    async fn cleanup(&self, _worker: &ModuleWorker) -> ModuleResult<()> {
        self.sender.lock().take();
        Ok(())
    }
}
