//! Module Settings
//!
//! Engine-level knobs every module carries, independent of its own options.
//! Modules supply defaults through [`ScanModule::settings`](super::ScanModule::settings)
//! and configuration may override them per module.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ModuleError, ModuleResult};
use super::options::{parse_bool, ModuleOptions, OptionSpec};
use crate::event::DEFAULT_PRIORITY;
use crate::queue::{MAX_PRIORITY, MIN_PRIORITY};

/// How the worker dispatches events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// Handlers run concurrently on the module's internal pool
    #[default]
    Scan,
    /// Handlers run inline in the worker loop, preserving arrival order
    Output,
}

impl FromStr for ModuleType {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scan" => Ok(ModuleType::Scan),
            "output" => Ok(ModuleType::Output),
            _ => Err(ModuleError::configuration(format!(
                "invalid module_type '{s}'. Valid options: scan, output"
            ))),
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleType::Scan => write!(f, "scan"),
            ModuleType::Output => write!(f, "output"),
        }
    }
}

/// Per-module engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Capacity of the pool used by `submit_task`
    pub max_threads: usize,
    /// Capacity of the pool used for handler dispatch
    pub max_event_handlers: usize,
    pub batch_size: usize,
    /// Idle time after which a partial batch is flushed
    pub batch_wait: Duration,
    /// Added to the scan's search distance; `None` disables distance filtering
    pub scope_distance_modifier: Option<i32>,
    pub in_scope_only: bool,
    pub target_only: bool,
    /// Priority of emitted events, 1 (most urgent) to 5
    pub priority: u8,
    /// Cap on events this module may have waiting in the manager's queue
    pub qsize: Option<usize>,
    pub failed_request_abort_threshold: usize,
    /// Receive events already distributed once
    pub accept_dupes: bool,
    /// Drop duplicates emitted by this module before distribution
    pub suppress_dupes: bool,
    /// Pull in-scope events emitted by this module to distance 0
    pub scope_shepherding: bool,
    pub module_type: ModuleType,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            max_threads: 10,
            max_event_handlers: 1,
            batch_size: 1,
            batch_wait: Duration::from_secs(10),
            scope_distance_modifier: Some(-1),
            in_scope_only: false,
            target_only: false,
            priority: DEFAULT_PRIORITY,
            qsize: None,
            failed_request_abort_threshold: 5,
            accept_dupes: false,
            suppress_dupes: true,
            scope_shepherding: true,
            module_type: ModuleType::Scan,
        }
    }
}

impl ModuleSettings {
    /// Settings for an output module: inline dispatch, no distance filter
    pub fn output() -> Self {
        Self {
            module_type: ModuleType::Output,
            scope_distance_modifier: None,
            ..Self::default()
        }
    }

    /// Largest scope distance this module accepts
    pub fn max_scope_distance(&self, scope_search_distance: u32) -> i32 {
        if self.in_scope_only || self.target_only {
            return 0;
        }
        let search = i32::try_from(scope_search_distance).unwrap_or(i32::MAX);
        search
            .saturating_add(self.scope_distance_modifier.unwrap_or(0))
            .max(0)
    }

    /// Apply one configuration override.
    ///
    /// Returns `Ok(false)` if `key` is not an engine setting, leaving it for
    /// the module's own options.
    pub fn apply(&mut self, key: &str, raw: &str) -> ModuleResult<bool> {
        let raw = raw.trim();
        match key {
            "max_threads" => self.max_threads = parse_positive(key, raw)?,
            "max_event_handlers" => self.max_event_handlers = parse_positive(key, raw)?,
            "batch_size" => self.batch_size = parse_positive(key, raw)?,
            "batch_wait" => {
                let seconds: f64 = parse_number(key, raw)?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(invalid(key, raw));
                }
                self.batch_wait = Duration::from_secs_f64(seconds);
            }
            "scope_distance_modifier" => {
                self.scope_distance_modifier = if is_none(raw) {
                    None
                } else {
                    Some(parse_number(key, raw)?)
                }
            }
            "in_scope_only" => self.in_scope_only = parse_flag(key, raw)?,
            "target_only" => self.target_only = parse_flag(key, raw)?,
            "priority" => {
                let priority: u8 = parse_number(key, raw)?;
                if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                    return Err(ModuleError::configuration(format!(
                        "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"
                    )));
                }
                self.priority = priority;
            }
            "qsize" => {
                self.qsize = if is_none(raw) {
                    None
                } else {
                    Some(parse_number::<usize>(key, raw)?).filter(|cap| *cap > 0)
                }
            }
            "failed_request_abort_threshold" => {
                self.failed_request_abort_threshold = parse_positive(key, raw)?
            }
            "accept_dupes" => self.accept_dupes = parse_flag(key, raw)?,
            "suppress_dupes" => self.suppress_dupes = parse_flag(key, raw)?,
            "scope_shepherding" => self.scope_shepherding = parse_flag(key, raw)?,
            "module_type" => self.module_type = raw.parse()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Resolve a module's settings and options from its defaults and the
/// configured overrides.
///
/// Keys that are neither engine settings nor declared options are rejected.
pub fn configure(
    defaults: ModuleSettings,
    schema: &[OptionSpec],
    overrides: &HashMap<String, String>,
) -> ModuleResult<(ModuleSettings, ModuleOptions)> {
    let mut settings = defaults;
    let mut options = ModuleOptions::from_schema(schema);

    let mut keys: Vec<&String> = overrides.keys().collect();
    keys.sort();
    for key in keys {
        let raw = &overrides[key];
        if !settings.apply(key, raw)? {
            options.set(schema, key, raw)?;
        }
    }
    Ok((settings, options))
}

fn invalid(key: &str, raw: &str) -> ModuleError {
    ModuleError::configuration(format!("invalid value '{raw}' for setting '{key}'"))
}

fn is_none(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("none")
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> ModuleResult<T> {
    raw.parse().map_err(|_| invalid(key, raw))
}

fn parse_positive(key: &str, raw: &str) -> ModuleResult<usize> {
    match parse_number::<usize>(key, raw)? {
        0 => Err(invalid(key, raw)),
        value => Ok(value),
    }
}

fn parse_flag(key: &str, raw: &str) -> ModuleResult<bool> {
    parse_bool(raw).ok_or_else(|| invalid(key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::options::{OptionKind, OptionValue};

    #[test]
    fn test_max_scope_distance() {
        let settings = ModuleSettings::default();
        assert_eq!(settings.max_scope_distance(1), 0);

        let wide = ModuleSettings {
            scope_distance_modifier: Some(2),
            ..ModuleSettings::default()
        };
        assert_eq!(wide.max_scope_distance(1), 3);

        let negative = ModuleSettings {
            scope_distance_modifier: Some(-5),
            ..ModuleSettings::default()
        };
        assert_eq!(negative.max_scope_distance(2), 0);

        let in_scope = ModuleSettings {
            in_scope_only: true,
            scope_distance_modifier: Some(2),
            ..ModuleSettings::default()
        };
        assert_eq!(in_scope.max_scope_distance(3), 0);
    }

    #[test]
    fn test_apply_engine_settings() {
        let mut settings = ModuleSettings::default();
        assert!(settings.apply("batch_size", "5").unwrap());
        assert!(settings.apply("batch_wait", "2.5").unwrap());
        assert!(settings.apply("scope_distance_modifier", "none").unwrap());
        assert!(settings.apply("qsize", "100").unwrap());
        assert!(settings.apply("module_type", "Output").unwrap());
        assert!(!settings.apply("max_hosts", "16").unwrap());

        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.batch_wait, Duration::from_millis(2500));
        assert_eq!(settings.scope_distance_modifier, None);
        assert_eq!(settings.qsize, Some(100));
        assert_eq!(settings.module_type, ModuleType::Output);

        assert!(settings.apply("priority", "9").is_err());
        assert!(settings.apply("max_threads", "0").is_err());
        assert!(settings.apply("in_scope_only", "maybe").is_err());
    }

    #[test]
    fn test_configure_splits_settings_and_options() {
        let schema = vec![OptionSpec::new(
            "max_hosts",
            OptionKind::Int,
            OptionValue::Int(256),
            "",
        )];
        let overrides: HashMap<String, String> = [
            ("priority".to_string(), "2".to_string()),
            ("max_hosts".to_string(), "16".to_string()),
        ]
        .into_iter()
        .collect();

        let (settings, options) = configure(ModuleSettings::default(), &schema, &overrides).unwrap();
        assert_eq!(settings.priority, 2);
        assert_eq!(options.get_int("max_hosts"), Some(16));

        let bad: HashMap<String, String> =
            [("unknown".to_string(), "1".to_string())].into_iter().collect();
        assert!(configure(ModuleSettings::default(), &schema, &bad).is_err());
    }
}
