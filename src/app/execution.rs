//! Scan execution

use anyhow::{Context, Result};
use std::sync::Arc;
use log::{debug, info, warn};
use crate::{cli, config};
use crate::module::builtin;
use crate::scan::Scanner;
use super::initialization::{build_scan_config, load_modules, module_names};
use super::report;

/// Print the built-in modules
pub fn list_modules() -> Result<()> {
    let names: Vec<String> = builtin::AVAILABLE.iter().map(|name| name.to_string()).collect();
    let modules = load_modules(&names)?;
    print!("{}", report::format_module_list(&modules));
    Ok(())
}

/// Build and run a scan, stopping it on Ctrl-C
pub async fn run_scan(args: &cli::Args, config_manager: &config::ConfigManager) -> Result<()> {
    let scan_config = build_scan_config(args, config_manager)?;
    let modules = load_modules(&module_names(args, config_manager))?;
    debug!("Scan configuration: {:?}", scan_config);

    let scanner = Arc::new(
        Scanner::builder(scan_config)
            .modules(modules)
            .build()
            .context("Failed to configure scan")?,
    );

    let interrupt = {
        let scanner = Arc::clone(&scanner);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Interrupted, stopping scan");
                    scanner.stop();
                }
                Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
            }
        })
    };

    let result = scanner.run().await;
    interrupt.abort();
    let summary = result.context("Scan failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary).context("Failed to serialize scan summary")?);
    } else {
        info!("{}", report::format_summary(&summary));
    }
    if args.status {
        print!("{}", report::format_module_status(&summary));
    }
    Ok(())
}
