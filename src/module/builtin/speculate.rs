//! Speculate Module
//!
//! Derives cheap follow-up events without touching the network: individual
//! addresses from small IP ranges, and hosts from URLs.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::event::{types, EmitOutcome, Event, EventRequest};
use crate::module::{
    ModuleError, ModuleInfo, ModuleResult, ModuleSettings, ModuleWorker, OptionKind, OptionSpec,
    OptionValue, ScanModule,
};
use crate::net;

/// Name of the speculate module
pub const SPECULATE: &str = "speculate";

const DEFAULT_MAX_HOSTS: i64 = 256;

pub struct Speculate {
    info: ModuleInfo,
}

impl Default for Speculate {
    fn default() -> Self {
        Self::new()
    }
}

impl Speculate {
    pub fn new() -> Self {
        let info = ModuleInfo::new(
            SPECULATE,
            "Derive IP addresses from ranges and hosts from URLs",
        )
        .watches([types::IP_RANGE, types::URL])
        .produces([types::IP_ADDRESS, types::DNS_NAME])
        .option(OptionSpec::new(
            "max_hosts",
            OptionKind::Int,
            OptionValue::Int(DEFAULT_MAX_HOSTS),
            "Largest range (in addresses) expanded into individual IPs",
        ));
        Self { info }
    }

    async fn expand_range(&self, worker: &ModuleWorker, event: &Arc<Event>) -> ModuleResult<()> {
        let network = net::parse_network(event.data()).map_err(ModuleError::handler)?;
        let max_hosts = worker
            .options()
            .get_int("max_hosts")
            .unwrap_or(DEFAULT_MAX_HOSTS)
            .max(0) as u128;
        let size = net::address_count(&network);
        if size > max_hosts {
            debug!(
                target: worker.log_target(),
                "Not expanding {network}: {size} addresses exceeds max_hosts ({max_hosts})"
            );
            return Ok(());
        }
        for ip in net::hosts_v4(&network) {
            let request = EventRequest::typed(ip.to_string(), types::IP_ADDRESS);
            if let EmitOutcome::Aborted = worker.emit_event(request, event).await? {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ScanModule for Speculate {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn settings(&self) -> ModuleSettings {
        ModuleSettings {
            priority: 4,
            scope_shepherding: false,
            ..ModuleSettings::default()
        }
    }

    async fn handle_event(&self, worker: &ModuleWorker, event: Arc<Event>) -> ModuleResult<()> {
        match event.event_type() {
            types::IP_RANGE => self.expand_range(worker, &event).await,
            types::URL => {
                if let Some(host) = event.host() {
                    worker.emit_event(EventRequest::new(host), &event).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
