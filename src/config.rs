use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use anyhow::{Context, Result};
use toml::Value;
use log::{debug, info};
use crate::queue::DequeuePolicy;
use crate::scan::{ScanConfig, ScanSettings};

/// Configuration storage - section_name -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

/// Prefix of per-module sections, e.g. `[modules.speculate]`
const MODULE_SECTION_PREFIX: &str = "modules.";

/// Configuration manager
pub struct ConfigManager {
    config: Configuration,
    config_file_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a new ConfigManager from a Configuration (primarily for testing)
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            config_file_path: None,
        }
    }

    /// Load configuration using discovery hierarchy
    pub fn load() -> Result<Self> {
        debug!("Starting configuration discovery");

        for path in discover_config_files() {
            debug!("Attempting to load config from: {}", path.display());
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        info!("No configuration file found, using empty configuration");
        Ok(Self::from_config(Configuration::new()))
    }

    /// Load configuration from explicit file path
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        debug!("Loading configuration from file: {}", path.display());

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = parse_toml_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded configuration from: {}", path.display());
        Ok(Self {
            config,
            config_file_path: Some(path),
        })
    }

    /// Path of the loaded file, if any
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Get value from configuration
    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        self.config.get(section).and_then(|s| s.get(key))
    }

    /// Get boolean value with type conversion
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow::anyhow!("Invalid boolean value for {}.{}: {}", section, key, value)),
            },
            None => Ok(None),
        }
    }

    /// Get log level value with type conversion
    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    /// Get path value with type conversion
    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(PathBuf::from)
    }

    /// Get a list value; TOML arrays are stored comma-joined
    pub fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get_value(section, key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get scan settings from the `[scan]` section
    pub fn get_scan_settings(&self) -> Result<ScanSettings> {
        let mut settings = ScanSettings::default();

        if let Some(distance) = self.get_value("scan", "scope_search_distance") {
            settings.scope_search_distance = distance.parse()
                .with_context(|| format!("Invalid scope_search_distance value in config: {}", distance))?;
        }

        if let Some(max_threads) = self.get_value("scan", "max_threads") {
            settings.max_threads = parse_capacity(max_threads)
                .with_context(|| format!("Invalid max_threads value in config: {}", max_threads))?;
        }

        if let Some(handlers) = self.get_value("scan", "max_event_handlers") {
            settings.max_event_handlers = parse_capacity(handlers)
                .with_context(|| format!("Invalid max_event_handlers value in config: {}", handlers))?;
        }

        if let Some(policy) = self.get_value("scan", "dequeue_policy") {
            settings.dequeue_policy = policy.parse::<DequeuePolicy>()
                .with_context(|| format!("Invalid dequeue_policy value in config: {}", policy))?;
        }

        Ok(settings)
    }

    /// Raw overrides for every `[modules.<name>]` section
    pub fn module_overrides(&self) -> HashMap<String, HashMap<String, String>> {
        self.config
            .iter()
            .filter_map(|(section, values)| {
                section
                    .strip_prefix(MODULE_SECTION_PREFIX)
                    .map(|name| (name.to_string(), values.clone()))
            })
            .collect()
    }

    /// Assemble a scan configuration: settings, target lists and module overrides
    pub fn get_scan_config(&self) -> Result<ScanConfig> {
        Ok(ScanConfig {
            settings: self.get_scan_settings()?,
            targets: self.get_list("scan", "targets"),
            whitelist: self.get_list("scan", "whitelist"),
            blacklist: self.get_list("scan", "blacklist"),
            modules: self.module_overrides(),
        })
    }
}

fn parse_capacity(value: &str) -> Result<usize> {
    match value.parse::<usize>()? {
        0 => Err(anyhow::anyhow!("must be at least 1")),
        capacity => Ok(capacity),
    }
}

/// Discover configuration files in order of precedence
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Environment variable $SCANCORE_CONFIG
    if let Ok(env_path) = env::var("SCANCORE_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    // 2. XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("scancore").join("config.toml"));
    }

    // 3. Home directory
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".scancore.toml"));
    }

    // 4. Project local
    paths.push(PathBuf::from("./.scancore.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}

/// Parse TOML content to string-based configuration
fn parse_toml_config(content: &str) -> Result<Configuration> {
    let toml_value: Value = content.parse()
        .context("Failed to parse TOML content")?;

    let mut config = Configuration::new();

    if let Value::Table(table) = toml_value {
        flatten_toml_table(&table, String::new(), &mut config);
    }

    debug!("Parsed configuration: {:?}", config);
    Ok(config)
}

/// Recursively flatten TOML tables into section.subsection format
fn flatten_toml_table(table: &toml::Table, prefix: String, config: &mut Configuration) {
    for (key, value) in table {
        let section_name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Table(subtable) => {
                if subtable.values().all(|v| !matches!(v, Value::Table(_))) {
                    // leaf table: a configuration section
                    let section_map = subtable
                        .iter()
                        .map(|(subkey, subvalue)| (subkey.clone(), toml_value_to_string(subvalue)))
                        .collect();
                    config.insert(section_name, section_map);
                } else {
                    flatten_toml_table(subtable, section_name, config);
                }
            }
            _ => {
                let mut section_map = HashMap::new();
                section_map.insert("value".to_string(), toml_value_to_string(value));
                config.insert(section_name, section_map);
            }
        }
    }
}

/// Convert TOML Value to string representation
fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(toml_value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Table(_) | Value::Datetime(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_toml_value_to_string_conversion() {
        assert_eq!(toml_value_to_string(&Value::String("test".to_string())), "test");
        assert_eq!(toml_value_to_string(&Value::Integer(42)), "42");
        assert_eq!(toml_value_to_string(&Value::Float(2.5)), "2.5");
        assert_eq!(toml_value_to_string(&Value::Boolean(true)), "true");
        let array = Value::Array(vec![Value::String("a.com".into()), Value::String("b.com".into())]);
        assert_eq!(toml_value_to_string(&array), "a.com,b.com");
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[modules.speculate]
max_hosts = 16
priority = 2

[modules.stdout]
event_types = ["DNS_NAME", "IP_ADDRESS"]
"#;

        let config = parse_toml_config(toml_content).unwrap();

        assert_eq!(config["logging"]["level"], "debug");
        assert_eq!(config["logging"]["format"], "json");
        assert_eq!(config["modules.speculate"]["max_hosts"], "16");
        assert_eq!(config["modules.speculate"]["priority"], "2");
        assert_eq!(config["modules.stdout"]["event_types"], "DNS_NAME,IP_ADDRESS");
    }

    #[test]
    fn test_config_manager_type_conversion() {
        let mut config = Configuration::new();

        let mut section = HashMap::new();
        section.insert("enabled".to_string(), "true".to_string());
        section.insert("invalid-bool".to_string(), "maybe".to_string());
        section.insert("level".to_string(), "info".to_string());
        section.insert("invalid-level".to_string(), "invalid".to_string());
        section.insert("file".to_string(), "/tmp/test".to_string());
        section.insert("targets".to_string(), "example.com, 10.0.0.0/24,".to_string());
        config.insert("base".to_string(), section);

        let manager = ConfigManager::from_config(config);

        assert_eq!(manager.get_bool("base", "enabled").unwrap(), Some(true));
        assert!(manager.get_bool("base", "invalid-bool").is_err());
        assert!(manager.get_bool("base", "missing").unwrap().is_none());

        assert_eq!(manager.get_log_level("base", "level").unwrap(), Some(log::LevelFilter::Info));
        assert!(manager.get_log_level("base", "invalid-level").is_err());
        assert!(manager.get_log_level("base", "missing").unwrap().is_none());

        assert_eq!(manager.get_path("base", "file").unwrap(), PathBuf::from("/tmp/test"));
        assert_eq!(manager.get_list("base", "targets"), vec!["example.com", "10.0.0.0/24"]);
        assert!(manager.get_list("base", "missing").is_empty());
    }

    #[test]
    fn test_scan_settings_default() {
        let manager = ConfigManager::from_config(Configuration::new());
        assert_eq!(manager.get_scan_settings().unwrap(), ScanSettings::default());
        assert!(manager.module_overrides().is_empty());
    }

    #[test]
    fn test_scan_config_from_toml() {
        let toml_content = r#"
[scan]
scope_search_distance = 2
max_threads = 8
dequeue_policy = "strict"
targets = ["example.com", "10.0.0.0/30"]
blacklist = ["admin.example.com"]

[modules.speculate]
max_hosts = 4
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, toml_content).unwrap();

        let manager = ConfigManager::load_from_file(temp_file.path().to_path_buf()).unwrap();
        assert_eq!(manager.config_file_path().unwrap(), temp_file.path());

        let scan = manager.get_scan_config().unwrap();
        assert_eq!(scan.settings.scope_search_distance, 2);
        assert_eq!(scan.settings.max_threads, 8);
        assert_eq!(scan.settings.dequeue_policy, DequeuePolicy::Strict);
        assert_eq!(scan.targets, vec!["example.com", "10.0.0.0/30"]);
        assert!(scan.whitelist.is_empty());
        assert_eq!(scan.blacklist, vec!["admin.example.com"]);
        assert_eq!(scan.modules["speculate"]["max_hosts"], "4");
    }

    #[test]
    fn test_scan_settings_invalid_values() {
        for (key, value) in [
            ("scope_search_distance", "-1"),
            ("max_threads", "0"),
            ("max_event_handlers", "many"),
            ("dequeue_policy", "fifo"),
        ] {
            let mut section = HashMap::new();
            section.insert(key.to_string(), value.to_string());
            let mut config = Configuration::new();
            config.insert("scan".to_string(), section);

            let manager = ConfigManager::from_config(config);
            assert!(manager.get_scan_settings().is_err(), "{key} = {value}");
        }
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, "[scan\nmax_threads = ").unwrap();
        let err = ConfigManager::load_from_file(temp_file.path().to_path_buf()).err().unwrap();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
