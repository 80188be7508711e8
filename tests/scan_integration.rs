// End-to-end scans through the public API
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use scancore::event::{types, Event, EventRequest};
use scancore::module::builtin::{Collector, EventStream, Speculate};
use scancore::module::{ModuleInfo, ModuleResult, ModuleSettings, ModuleWorker, ScanModule};
use scancore::scan::{ScanConfig, ScanStatus, Scanner};

/// Emits two subdomains for every target host, and one more when finishing
struct Subdomains {
    info: ModuleInfo,
    finished_once: AtomicBool,
}

impl Subdomains {
    fn new() -> Self {
        Self {
            info: ModuleInfo::new("subdomains", "guess subdomains")
                .watches([types::DNS_NAME])
                .produces([types::DNS_NAME]),
            finished_once: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ScanModule for Subdomains {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn settings(&self) -> ModuleSettings {
        ModuleSettings {
            target_only: true,
            ..ModuleSettings::default()
        }
    }

    async fn handle_event(&self, worker: &ModuleWorker, event: Arc<Event>) -> ModuleResult<()> {
        for prefix in ["www", "api", "www"] {
            let request = EventRequest::new(format!("{prefix}.{}", event.data()));
            worker.emit_event(request, &event).await?;
        }
        Ok(())
    }

    async fn finish(&self, worker: &ModuleWorker) -> ModuleResult<()> {
        if !self.finished_once.swap(true, Ordering::SeqCst) {
            let root = Arc::clone(worker.ctx().root_event());
            worker
                .emit_event(EventRequest::new("late.example.com"), &root)
                .await?;
        }
        Ok(())
    }
}

async fn collect(events: EventStream) -> Vec<(String, String)> {
    events
        .map(|event| (event.event_type().to_string(), event.data().to_string()))
        .collect()
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_speculate_expands_target_range() {
    let (collector, events) = Collector::new();
    let scanner = Scanner::builder(ScanConfig::new(["10.0.0.0/30"]))
        .module(Arc::new(Speculate::new()))
        .module(Arc::new(collector))
        .build()
        .unwrap();

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.status, ScanStatus::Finished);
    assert_eq!(summary.events_emitted, 3);
    assert_eq!(summary.events_distributed, 3);

    let mut seen = collect(events).await;
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (types::IP_ADDRESS.to_string(), "10.0.0.1".to_string()),
            (types::IP_ADDRESS.to_string(), "10.0.0.2".to_string()),
            (types::IP_RANGE.to_string(), "10.0.0.0/30".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_max_hosts_limits_expansion() {
    let (collector, events) = Collector::new();
    let config = ScanConfig::new(["10.0.0.0/30"]).module_option("speculate", "max_hosts", "2");
    let scanner = Scanner::builder(config)
        .module(Arc::new(Speculate::new()))
        .module(Arc::new(collector))
        .build()
        .unwrap();

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.events_distributed, 1);
    assert_eq!(collect(events).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dedupe_scope_and_finish_rounds() {
    let (collector, events) = Collector::new();
    let mut config = ScanConfig::new(["example.com"]);
    config.blacklist = vec!["api.example.com".to_string()];
    let scanner = Scanner::builder(config)
        .module(Arc::new(Subdomains::new()))
        .module(Arc::new(collector))
        .build()
        .unwrap();

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.status, ScanStatus::Finished);
    // target, www twice, api, late
    assert_eq!(summary.events_emitted, 5);
    // target, www, late
    assert_eq!(summary.events_distributed, 3);

    let mut seen: Vec<String> = collect(events).await.into_iter().map(|(_, data)| data).collect();
    seen.sort();
    assert_eq!(seen, vec!["example.com", "late.example.com", "www.example.com"]);
    assert!(summary.modules.values().all(|status| !status.errored));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_targets_are_skipped() {
    let (collector, events) = Collector::new();
    let scanner = Scanner::builder(ScanConfig::new(["example.com", "!!!"]))
        .module(Arc::new(collector))
        .build()
        .unwrap();

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.events_emitted, 1);
    assert_eq!(collect(events).await.len(), 1);
}
