//! Application initialization and configuration

use anyhow::{Context, Result};
use std::sync::Arc;
use log::{debug, LevelFilter};
use crate::{cli, config, logging};
use crate::module::{builtin, ScanModule};
use crate::scan::ScanConfig;

/// Modules run when neither the command line nor the configuration names any
pub const DEFAULT_MODULES: &[&str] = &[builtin::SPECULATE, "stdout"];

pub fn load_configuration(args: &cli::Args) -> Result<config::ConfigManager> {
    if let Some(config_file) = &args.config_file {
        debug!("Loading configuration from explicit file: {}", config_file.display());
        config::ConfigManager::load_from_file(config_file.clone())
    } else {
        config::ConfigManager::load()
    }
}

pub fn configure_logging(args: &cli::Args, config: &config::ConfigManager) -> Result<logging::LogConfig> {
    let console_level = if args.debug {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        config.get_log_level("logging", "level")?.unwrap_or(LevelFilter::Info)
    };

    let format = if args.log_format != "text" {
        args.log_format.parse::<logging::LogFormat>()
            .map_err(|e| anyhow::anyhow!(e))?
    } else {
        match config.get_value("logging", "format") {
            Some(format) => format.parse::<logging::LogFormat>()
                .map_err(|e| anyhow::anyhow!(e))
                .context("Invalid logging.format in config")?,
            None => logging::LogFormat::Text,
        }
    };

    let log_file_path = args.log_file.clone()
        .or_else(|| config.get_path("logging", "file"));

    let file_log_level = match &args.log_file_level {
        Some(level) => Some(logging::parse_log_level(level)?),
        None => config.get_log_level("logging", "file_level")?,
    };

    let (destination, file_level) = match (log_file_path, file_log_level) {
        (Some(path), level) => (logging::LogDestination::Both(path), Some(level.unwrap_or(console_level))),
        (None, None) => (logging::LogDestination::Console, None),
        (None, Some(_)) => return Err(anyhow::anyhow!("Log file level specified without log file")),
    };

    Ok(logging::LogConfig {
        console_level,
        file_level,
        format,
        destination,
    })
}

/// Merge the configuration file with the command line.
///
/// Command line lists replace the configured ones; `--option` overrides are
/// applied on top of the `[modules.<name>]` sections.
pub fn build_scan_config(args: &cli::Args, config: &config::ConfigManager) -> Result<ScanConfig> {
    let mut scan = config.get_scan_config()?;

    if !args.targets.is_empty() {
        scan.targets = args.targets.clone();
    }
    if !args.whitelist.is_empty() {
        scan.whitelist = args.whitelist.clone();
    }
    if !args.blacklist.is_empty() {
        scan.blacklist = args.blacklist.clone();
    }
    if let Some(distance) = args.scope_distance {
        scan.settings.scope_search_distance = distance;
    }
    for option in args.module_overrides()? {
        scan.modules
            .entry(option.module)
            .or_default()
            .insert(option.key, option.value);
    }

    if scan.targets.is_empty() {
        return Err(anyhow::anyhow!("No targets given. Use --target or set scan.targets in the configuration"));
    }
    Ok(scan)
}

/// Module names to run, from the command line, the configuration or the defaults
pub fn module_names(args: &cli::Args, config: &config::ConfigManager) -> Vec<String> {
    if !args.modules.is_empty() {
        return args.modules.clone();
    }
    let configured = config.get_list("scan", "modules");
    if !configured.is_empty() {
        return configured;
    }
    DEFAULT_MODULES.iter().map(|name| name.to_string()).collect()
}

/// Instantiate built-in modules by name
pub fn load_modules(names: &[String]) -> Result<Vec<Arc<dyn ScanModule>>> {
    names
        .iter()
        .map(|name| {
            builtin::load(name).ok_or_else(|| anyhow::anyhow!(
                "Unknown module '{}'. Available modules: {}", name, builtin::AVAILABLE.join(", ")
            ))
        })
        .collect()
}
