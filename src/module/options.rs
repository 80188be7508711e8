//! Typed Module Options
//!
//! Modules declare their options as a schema of [`OptionSpec`]s. Raw values
//! from configuration are parsed against that schema when the scan is built,
//! so hooks only ever see well-typed [`OptionValue`]s.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::error::{ModuleError, ModuleResult};

/// Declared type of a module option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    Str,
    /// Comma separated list of strings
    List,
}

impl OptionKind {
    /// Parse a raw configuration string into a value of this kind
    pub fn parse(&self, raw: &str) -> Option<OptionValue> {
        let raw = raw.trim();
        match self {
            OptionKind::Bool => parse_bool(raw).map(OptionValue::Bool),
            OptionKind::Int => raw.parse().ok().map(OptionValue::Int),
            OptionKind::Float => raw.parse().ok().map(OptionValue::Float),
            OptionKind::Str => Some(OptionValue::Str(raw.to_string())),
            OptionKind::List => Some(OptionValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKind::Bool => "bool",
            OptionKind::Int => "int",
            OptionKind::Float => "float",
            OptionKind::Str => "string",
            OptionKind::List => "list",
        };
        write!(f, "{name}")
    }
}

/// A parsed option value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

/// Declaration of one module option
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSpec {
    pub name: String,
    pub kind: OptionKind,
    pub default: OptionValue,
    pub description: String,
}

impl OptionSpec {
    pub fn new(
        name: impl Into<String>,
        kind: OptionKind,
        default: OptionValue,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
            description: description.into(),
        }
    }
}

/// Option values for one module, seeded from schema defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleOptions {
    values: BTreeMap<String, OptionValue>,
}

impl ModuleOptions {
    /// Options holding every declared default
    pub fn from_schema(schema: &[OptionSpec]) -> Self {
        Self {
            values: schema
                .iter()
                .map(|spec| (spec.name.clone(), spec.default.clone()))
                .collect(),
        }
    }

    /// Parse and store `raw` for option `key`, validated against `schema`
    pub fn set(&mut self, schema: &[OptionSpec], key: &str, raw: &str) -> ModuleResult<()> {
        let spec = schema
            .iter()
            .find(|spec| spec.name == key)
            .ok_or_else(|| ModuleError::configuration(format!("unknown option '{key}'")))?;
        let value = spec.kind.parse(raw).ok_or_else(|| {
            ModuleError::configuration(format!(
                "invalid value '{raw}' for option '{key}' (expected {})",
                spec.kind
            ))
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(OptionValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(OptionValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(OptionValue::Float(value)) => Some(*value),
            Some(OptionValue::Int(value)) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(OptionValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        match self.get(key) {
            Some(OptionValue::List(values)) => Some(values),
            _ => None,
        }
    }
}

/// Boolean parsing shared by settings and options
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
