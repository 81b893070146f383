/*!
 * Descriptor Types
 * Raw, unvalidated shape of an ecosystem file as it arrives from disk
 */

use super::ConfigResult;
use crate::core::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Prefix marking a profile-specific environment section
pub const PROFILE_PREFIX: &str = "env_";

/// Environment section as written: values may be strings, numbers or booleans
pub type EnvSection = BTreeMap<String, Value>;

/// A whole ecosystem file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcosystemDescriptor {
    #[serde(default)]
    pub apps: Vec<AppDescriptor>,
}

impl EcosystemDescriptor {
    /// Interpret a JSON document as an ecosystem.
    ///
    /// Accepts `{"apps": [...]}`, a bare array of apps, or a single app object.
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        let entries = match value {
            Value::Object(mut map) if map.contains_key("apps") => match map.remove("apps") {
                Some(Value::Array(items)) => items,
                _ => return Err(ConfigError::Parse("`apps` must be an array".to_string())),
            },
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(ConfigError::Parse(format!(
                    "expected an object or array, found {}",
                    json_kind(&other)
                )))
            }
        };

        let apps = entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                AppDescriptor::deserialize(entry)
                    .map_err(|e| ConfigError::Parse(format!("apps[{}]: {}", idx, e)))
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self { apps })
    }

    /// Parse a JSON string
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(value)
    }
}

/// `args` may be a single command line or an explicit list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgsField {
    Line(String),
    List(Vec<String>),
}

/// One app entry, exactly as written
///
/// Every field is optional here; presence and ranges are checked by the
/// loader so errors can name the app and the field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub name: Option<String>,
    #[serde(alias = "command")]
    pub script: Option<String>,
    pub interpreter: Option<String>,
    pub args: Option<ArgsField>,
    pub cwd: Option<PathBuf>,
    pub instances: Option<i64>,
    pub autorestart: Option<bool>,
    pub watch: Option<bool>,
    pub max_memory_restart: Option<Value>,
    pub env: Option<EnvSection>,
    pub error_file: Option<String>,
    pub out_file: Option<String>,
    pub log_file: Option<String>,
    pub merge_logs: Option<bool>,
    pub time: Option<bool>,
    pub max_restarts: Option<i64>,
    /// Milliseconds
    pub min_uptime: Option<u64>,
    /// Milliseconds
    pub restart_delay: Option<u64>,
    /// Milliseconds
    pub exp_backoff_restart_delay: Option<u64>,
    /// Milliseconds
    pub kill_timeout: Option<u64>,
    pub stop_exit_codes: Option<Vec<i32>>,

    /// Profile sections (`env_<profile>`) and anything unrecognized
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AppDescriptor {
    /// Minimal descriptor for programmatic use
    pub fn new(name: impl Into<String>, script: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            name: Some(name.into()),
            script: Some(script.into()),
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }

    /// Name used in error messages before validation
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "<unnamed>",
        }
    }

    /// Profile names declared by this app (`env_production` -> `production`)
    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.extra
            .keys()
            .filter_map(|key| key.strip_prefix(PROFILE_PREFIX))
            .filter(|name| !name.is_empty())
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
