// Configuration file to scan, through the library API
use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use tokio_stream::StreamExt;

use scancore::config::ConfigManager;
use scancore::module::builtin::{Collector, Speculate};
use scancore::queue::DequeuePolicy;
use scancore::scan::{ScanStatus, Scanner};

const CONFIG: &str = r#"
[scan]
targets = ["10.0.0.0/30", "10.0.1.0/24"]
blacklist = ["10.0.0.2"]
scope_search_distance = 1
max_threads = 8
dequeue_policy = "strict"

[modules.speculate]
max_hosts = 4
priority = 2

[modules.unloaded]
anything = "ignored"
"#;

fn load(content: &str) -> ConfigManager {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("scancore.toml");
    fs::write(&config_path, content).expect("Failed to write config file");
    ConfigManager::load_from_file(config_path).expect("Failed to load config")
}

#[test]
fn test_config_file_to_scan_config() {
    let config = load(CONFIG);
    let scan = config.get_scan_config().unwrap();

    assert_eq!(scan.targets, vec!["10.0.0.0/30", "10.0.1.0/24"]);
    assert_eq!(scan.blacklist, vec!["10.0.0.2"]);
    assert!(scan.whitelist.is_empty());
    assert_eq!(scan.settings.scope_search_distance, 1);
    assert_eq!(scan.settings.max_threads, 8);
    assert_eq!(scan.settings.dequeue_policy, DequeuePolicy::Strict);
    assert_eq!(scan.modules["speculate"]["max_hosts"], "4");
    assert_eq!(scan.modules["speculate"]["priority"], "2");
}

#[test]
fn test_invalid_scan_settings_are_rejected() {
    assert!(load("[scan]\nmax_threads = 0\n").get_scan_config().is_err());
    assert!(load("[scan]\ndequeue_policy = \"random\"\n").get_scan_config().is_err());
}

#[test]
fn test_unknown_module_option_fails_build() {
    let config = load("[scan]\ntargets = [\"example.com\"]\n\n[modules.speculate]\nmax_ports = 3\n");
    let scan = config.get_scan_config().unwrap();
    assert!(Scanner::builder(scan)
        .module(Arc::new(Speculate::new()))
        .build()
        .is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configured_scan_runs() {
    let config = load(CONFIG);
    let (collector, events) = Collector::new();
    let scanner = Scanner::builder(config.get_scan_config().unwrap())
        .module(Arc::new(Speculate::new()))
        .module(Arc::new(collector))
        .build()
        .unwrap();

    let speculate = scanner.workers().iter().find(|w| w.name() == "speculate").cloned().unwrap();
    assert_eq!(speculate.settings().priority, 2);

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.status, ScanStatus::Finished);

    let mut seen: Vec<String> = events.map(|event| event.data().to_string()).collect().await;
    seen.sort();
    // the /24 exceeds max_hosts and 10.0.0.2 is blacklisted
    assert_eq!(seen, vec!["10.0.0.0/30", "10.0.0.1", "10.0.1.0/24"]);
}
