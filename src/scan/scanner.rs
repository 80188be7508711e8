//! Scan orchestration
//!
//! [`Scanner`] owns one scan from module setup to cleanup: it seeds the
//! targets, runs the worker loops and the dispatcher, detects when the scan
//! has run out of work and drives the finish rounds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::context::{ScanContext, ScanSettings, ScanStatus, POLL_INTERVAL};
use super::error::{ScanError, ScanResult};
use super::manager::ScanManager;
use crate::event::{DefaultEventFactory, EventFactory};
use crate::module::{configure, ModuleStatus, ModuleWorker, ScanModule, SetupStatus};
use crate::scope::{ScopeOracle, TargetScope};

const LOG_TARGET: &str = "scancore::scan";

/// Consecutive idle polls before the scan counts as out of work
const IDLE_CHECKS: usize = 3;

/// How long cleanup waits for handlers still in flight after the stop
const CLEANUP_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to build a scan, apart from the module instances
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub settings: ScanSettings,
    pub targets: Vec<String>,
    /// Defaults to the targets when empty
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    /// Raw per-module overrides, keyed by module name then setting or option
    pub modules: HashMap<String, HashMap<String, String>>,
}

impl ScanConfig {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set one raw override for a module
    pub fn module_option(
        mut self,
        module: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// Builder for [`Scanner`]
pub struct ScannerBuilder {
    config: ScanConfig,
    modules: Vec<Arc<dyn ScanModule>>,
    scope: Option<Arc<dyn ScopeOracle>>,
    factory: Option<Arc<dyn EventFactory>>,
}

impl ScannerBuilder {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            modules: Vec::new(),
            scope: None,
            factory: None,
        }
    }

    pub fn module(mut self, module: Arc<dyn ScanModule>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules<I>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ScanModule>>,
    {
        self.modules.extend(modules);
        self
    }

    /// Replace the default [`TargetScope`]
    pub fn scope(mut self, scope: Arc<dyn ScopeOracle>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Replace the default [`DefaultEventFactory`]
    pub fn factory(mut self, factory: Arc<dyn EventFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate module configuration and create the workers
    pub fn build(self) -> ScanResult<Scanner> {
        if self.modules.is_empty() {
            return Err(ScanError::NoModules);
        }

        let mut names = HashSet::new();
        for module in &self.modules {
            let name = &module.info().name;
            if !names.insert(name.as_str()) {
                return Err(ScanError::configuration(format!("module '{name}' is loaded twice")));
            }
        }
        for name in self.config.modules.keys() {
            if !names.contains(name.as_str()) {
                debug!(target: LOG_TARGET, "Ignoring configuration for module '{name}', which is not loaded");
            }
        }

        let no_overrides = HashMap::new();
        let mut configured = Vec::with_capacity(self.modules.len());
        for module in self.modules {
            let name = module.info().name.clone();
            let overrides = self.config.modules.get(&name).unwrap_or(&no_overrides);
            let (settings, options) = configure(module.settings(), &module.info().options, overrides)
                .map_err(|e| ScanError::module(&name, e))?;
            configured.push((module, settings, options));
        }

        let scope = self.scope.unwrap_or_else(|| {
            let whitelist = if self.config.whitelist.is_empty() {
                &self.config.targets
            } else {
                &self.config.whitelist
            };
            Arc::new(TargetScope::new(whitelist, &self.config.blacklist))
        });
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultEventFactory::new()));
        let ctx = ScanContext::new(self.config.settings, scope, factory);

        let workers = configured
            .into_iter()
            .map(|(module, settings, options)| {
                ModuleWorker::new(module, settings, options, Arc::clone(&ctx))
            })
            .collect();

        Ok(Scanner {
            ctx,
            targets: self.config.targets,
            workers,
        })
    }
}

/// Final numbers of a completed scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub status: ScanStatus,
    /// Events handed to the dispatcher, targets included
    pub events_emitted: u64,
    pub events_distributed: u64,
    pub modules: BTreeMap<String, ModuleStatus>,
}

/// A configured scan, ready to run once
pub struct Scanner {
    ctx: Arc<ScanContext>,
    targets: Vec<String>,
    workers: Vec<ModuleWorker>,
}

impl Scanner {
    pub fn builder(config: ScanConfig) -> ScannerBuilder {
        ScannerBuilder::new(config)
    }

    pub fn context(&self) -> &Arc<ScanContext> {
        &self.ctx
    }

    pub fn workers(&self) -> &[ModuleWorker] {
        &self.workers
    }

    /// Request the scan to stop. Workers exit without draining; cleanup
    /// still runs.
    pub fn stop(&self) {
        info!(target: LOG_TARGET, "Stopping scan {}", self.ctx.id());
        self.ctx.stop();
    }

    /// Run the scan to completion
    pub async fn run(&self) -> ScanResult<ScanSummary> {
        if self.ctx.status() != ScanStatus::NotStarted {
            return Err(ScanError::configuration(format!(
                "scan {} has already been started",
                self.ctx.id()
            )));
        }
        info!(target: LOG_TARGET, "Starting scan {}", self.ctx.id());
        self.ctx.set_status(ScanStatus::Starting);

        let ready = self.setup_modules().await;
        if ready.is_empty() {
            error!(target: LOG_TARGET, "No modules remain after setup");
            self.ctx.set_status(ScanStatus::Failed);
            self.cleanup_modules().await;
            return Err(ScanError::NoModules);
        }
        let names: Vec<&str> = ready.iter().map(ModuleWorker::name).collect();
        info!(target: LOG_TARGET, "Loaded {} modules: {}", names.len(), names.join(", "));

        let manager = Arc::new(ScanManager::new(Arc::clone(&self.ctx), ready));
        for target in &self.targets {
            if let Err(e) = manager.emit_target(target) {
                warn!(target: LOG_TARGET, "{e}");
            }
        }

        let handles: Vec<_> = manager.workers().iter().map(ModuleWorker::start).collect();
        let dispatcher = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run().await })
        };
        if !self.ctx.is_stopping() {
            self.ctx.set_status(ScanStatus::Running);
        }

        let completed = self.wait_until_idle(&manager).await && self.finish(&manager).await;
        if completed {
            for worker in manager.workers() {
                worker.report().await;
            }
        }

        self.ctx.set_status(ScanStatus::Cleaning);
        self.ctx.stop_token().cancel();
        for handle in handles.into_iter().chain(std::iter::once(dispatcher)) {
            if let Err(e) = handle.await {
                error!(target: LOG_TARGET, "Scan task failed: {e}");
            }
        }
        for worker in manager.workers() {
            if tokio::time::timeout(CLEANUP_GRACE, worker.wait_idle()).await.is_err() {
                warn!(target: LOG_TARGET, "Module {} still has tasks running", worker.name());
            }
        }
        let modules = manager.modules_status();
        self.cleanup_modules().await;

        let status = if completed {
            ScanStatus::Finished
        } else {
            ScanStatus::Aborted
        };
        self.ctx.set_status(status);
        info!(
            target: LOG_TARGET,
            "Scan {} {status}: {} events emitted, {} distributed",
            self.ctx.id(),
            manager.events_received(),
            manager.events_distributed()
        );

        Ok(ScanSummary {
            scan_id: self.ctx.id().to_string(),
            status,
            events_emitted: manager.events_received(),
            events_distributed: manager.events_distributed(),
            modules,
        })
    }

    /// Run every module's setup concurrently and keep the ones that succeed
    async fn setup_modules(&self) -> Vec<ModuleWorker> {
        let outcomes = join_all(self.workers.iter().map(|worker| async move {
            let status = worker.setup().await;
            (worker.clone(), status)
        }))
        .await;

        let mut ready = Vec::with_capacity(outcomes.len());
        for (worker, status) in outcomes {
            let target = worker.log_target();
            match status {
                SetupStatus::Success if !worker.errored() => {
                    ready.push(worker);
                    continue;
                }
                SetupStatus::Success => {
                    warn!(target: target, "Module {} entered error state during setup", worker.name())
                }
                SetupStatus::SoftFail(message) => {
                    warn!(target: target, "Setup soft-failed for {}: {message}", worker.name())
                }
                SetupStatus::HardFail(message) => {
                    error!(target: target, "Setup hard-failed for {}: {message}", worker.name())
                }
            }
            self.ctx.unregister_worker(worker.name());
        }
        ready
    }

    /// Poll until the manager reports no work for consecutive checks.
    ///
    /// Returns `false` if the scan was stopped first.
    async fn wait_until_idle(&self, manager: &ScanManager) -> bool {
        let stop = self.ctx.stop_token();
        let mut idle_checks = 0;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            if manager.running() {
                idle_checks = 0;
                continue;
            }
            idle_checks += 1;
            if idle_checks >= IDLE_CHECKS {
                return true;
            }
        }
    }

    /// Broadcast `FINISHED` until a round produces no new events
    async fn finish(&self, manager: &ScanManager) -> bool {
        self.ctx.set_status(ScanStatus::Finishing);
        loop {
            let before = manager.events_received();
            manager.broadcast_finished();
            if !self.wait_until_idle(manager).await {
                return false;
            }
            if manager.events_received() == before {
                return true;
            }
            debug!(target: LOG_TARGET, "Finish round produced new events, finishing again");
        }
    }

    async fn cleanup_modules(&self) {
        join_all(self.workers.iter().map(ModuleWorker::cleanup)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::builtin::{Collector, Speculate};
    use crate::module::{ModuleError, ModuleInfo, ModuleResult, OptionKind, OptionSpec, OptionValue};
    use async_trait::async_trait;

    struct Broken {
        info: ModuleInfo,
    }

    #[async_trait]
    impl ScanModule for Broken {
        fn info(&self) -> &ModuleInfo {
            &self.info
        }

        async fn setup(&self, _worker: &ModuleWorker) -> ModuleResult<SetupStatus> {
            Err(ModuleError::setup("no credentials"))
        }
    }

    fn broken() -> Arc<dyn ScanModule> {
        Arc::new(Broken {
            info: ModuleInfo::new("broken", "always fails setup")
                .option(OptionSpec::new("api_key", OptionKind::Str, OptionValue::Str(String::new()), "API key")),
        })
    }

    #[test]
    fn test_build_requires_modules() {
        let err = Scanner::builder(ScanConfig::new(["example.com"])).build().err().unwrap();
        assert!(matches!(err, ScanError::NoModules));
    }

    #[test]
    fn test_build_rejects_duplicate_modules() {
        let err = Scanner::builder(ScanConfig::new(["example.com"]))
            .module(Arc::new(Speculate::new()))
            .module(Arc::new(Speculate::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn test_build_validates_module_options() {
        let config = ScanConfig::new(["example.com"]).module_option("speculate", "max_hosts", "lots");
        let err = Scanner::builder(config)
            .module(Arc::new(Speculate::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::Module { ref name, .. } if name == "speculate"));

        let config = ScanConfig::new(["example.com"]).module_option("speculate", "max_hostz", "4");
        assert!(Scanner::builder(config)
            .module(Arc::new(Speculate::new()))
            .build()
            .is_err());

        let config = ScanConfig::new(["example.com"])
            .module_option("speculate", "max_hosts", "4")
            .module_option("speculate", "priority", "2");
        let scanner = Scanner::builder(config)
            .module(Arc::new(Speculate::new()))
            .build()
            .unwrap();
        let worker = &scanner.workers()[0];
        assert_eq!(worker.options().get_int("max_hosts"), Some(4));
        assert_eq!(worker.settings().priority, 2);
    }

    #[tokio::test]
    async fn test_run_fails_when_every_module_fails_setup() {
        let scanner = Scanner::builder(ScanConfig::new(["example.com"]))
            .module(broken())
            .build()
            .unwrap();
        let err = scanner.run().await.unwrap_err();
        assert!(matches!(err, ScanError::NoModules));
        assert_eq!(scanner.context().status(), ScanStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_skips_failed_modules_and_finishes() {
        let (collector, _events) = Collector::new();
        let scanner = Scanner::builder(ScanConfig::new(["example.com"]))
            .module(broken())
            .module(Arc::new(collector))
            .build()
            .unwrap();

        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.status, ScanStatus::Finished);
        assert_eq!(summary.events_emitted, 1);
        assert_eq!(summary.events_distributed, 1);
        assert!(summary.modules.contains_key("collector"));
        assert!(!summary.modules.contains_key("broken"));

        let err = scanner.run().await.unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stop_aborts_scan() {
        struct Endless {
            info: ModuleInfo,
        }

        #[async_trait]
        impl ScanModule for Endless {
            fn info(&self) -> &ModuleInfo {
                &self.info
            }

            async fn handle_event(
                &self,
                worker: &ModuleWorker,
                _event: Arc<crate::event::Event>,
            ) -> ModuleResult<()> {
                worker.ctx().stop_token().cancelled().await;
                Ok(())
            }
        }

        let scanner = Arc::new(
            Scanner::builder(ScanConfig::new(["example.com"]))
                .module(Arc::new(Endless {
                    info: ModuleInfo::new("endless", "never finishes").watches_all(),
                }))
                .build()
                .unwrap(),
        );
        let runner = Arc::clone(&scanner);
        let run = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        scanner.stop();
        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.status, ScanStatus::Aborted);
        assert_eq!(scanner.context().status(), ScanStatus::Aborted);
    }
}
