use clap::{Parser, ArgAction};
use anyhow::Result;
use std::path::PathBuf;
use log::debug;

/// Module execution engine for reconnaissance scans
#[derive(Parser, Debug)]
#[command(name = "scancore")]
#[command(about = "Runs scan modules over a set of targets, distributing the events they discover between them")]
#[command(version)]
pub struct Args {
    /// Scan targets: host names, IP addresses or CIDR ranges - supports comma-separated values
    #[arg(short = 't', long = "target", value_name = "TARGET", action = ArgAction::Append)]
    pub targets: Vec<String>,

    /// Scope whitelist (defaults to the targets) - supports comma-separated values
    #[arg(short = 'w', long = "whitelist", value_name = "HOST", action = ArgAction::Append)]
    pub whitelist: Vec<String>,

    /// Scope blacklist - supports comma-separated values
    #[arg(short = 'b', long = "blacklist", value_name = "HOST", action = ArgAction::Append)]
    pub blacklist: Vec<String>,

    /// Modules to run - supports comma-separated values
    #[arg(short = 'm', long = "module", value_name = "MODULE", action = ArgAction::Append)]
    pub modules: Vec<String>,

    /// Module setting or option override, as MODULE.KEY=VALUE
    #[arg(short = 'c', long = "option", value_name = "MODULE.KEY=VALUE", action = ArgAction::Append)]
    pub options: Vec<String>,

    /// How many hops past the targets modules may look
    #[arg(long = "scope-distance", value_name = "N")]
    pub scope_distance: Option<u32>,

    /// List the built-in modules and exit
    #[arg(long = "list-modules")]
    pub list_modules: bool,

    /// Print the scan summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Print a table of module statuses when the scan ends
    #[arg(long)]
    pub status: bool,

    /// Verbose output (debug level logging)
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (error level logging only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug output (trace level logging)
    #[arg(long)]
    pub debug: bool,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log file path for file output
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log level for file output (independent of console level)
    #[arg(long, value_name = "LEVEL")]
    pub log_file_level: Option<String>,

    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,
}

/// One `MODULE.KEY=VALUE` override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOverride {
    pub module: String,
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for ModuleOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid option '{}'. Expected MODULE.KEY=VALUE", s))?;
        let (module, key) = name
            .trim()
            .split_once('.')
            .filter(|(module, key)| !module.is_empty() && !key.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Invalid option '{}'. Expected MODULE.KEY=VALUE", s))?;
        Ok(Self {
            module: module.to_string(),
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl Args {
    /// Split comma-separated values in the list arguments
    pub fn apply_enhanced_parsing(mut self) -> Self {
        self.targets = split_values(self.targets);
        self.whitelist = split_values(self.whitelist);
        self.blacklist = split_values(self.blacklist);
        self.modules = split_values(self.modules);
        self
    }

    /// Parsed `--option` overrides
    pub fn module_overrides(&self) -> Result<Vec<ModuleOverride>> {
        self.options.iter().map(|option| option.parse()).collect()
    }
}

fn split_values(values: Vec<String>) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .collect()
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    let args = Args::parse().apply_enhanced_parsing();
    debug!("Parsed CLI arguments: {:?}", args);
    args
}

/// Validate CLI argument combinations
pub fn validate_args(args: &Args) -> Result<()> {
    let log_flags_count = [args.verbose, args.quiet, args.debug]
        .iter()
        .filter(|&&flag| flag)
        .count();

    if log_flags_count > 1 {
        return Err(anyhow::anyhow!(
            "Conflicting log level flags: only one of --verbose, --quiet, or --debug may be specified"
        ));
    }

    match args.log_format.to_lowercase().as_str() {
        "text" | "json" => {},
        _ => return Err(anyhow::anyhow!(
            "Invalid log format '{}'. Valid options: text, json", args.log_format
        )),
    }

    if let Some(ref level) = args.log_file_level {
        match level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {},
            _ => return Err(anyhow::anyhow!(
                "Invalid log file level '{}'. Valid levels: error, warn, info, debug, trace", level
            )),
        }
    }

    if args.log_file_level.is_some() && args.log_file.is_none() {
        return Err(anyhow::anyhow!(
            "--log-file-level requires --log-file to be specified"
        ));
    }

    args.module_overrides()?;
    Ok(())
}
