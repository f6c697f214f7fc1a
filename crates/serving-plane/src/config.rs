use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::static_config::{StaticConfigItem, STATIC_CONFIG_TABLE};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    values: HashMap<String, String>,
}

impl SystemConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .map(str::to_string)
            .or_else(|| default_value(key))
            .unwrap_or_default()
    }

    pub fn get_number(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(parse_number)
            .or_else(|| default_value(key).and_then(|value| parse_number(&value)))
            .unwrap_or_default()
    }

    /// Negative values clamp to zero.
    pub fn get_u64(&self, key: &str) -> u64 {
        self.get_number(key).max(0) as u64
    }

    pub fn get_millis(&self, key: &str) -> Duration {
        Duration::from_millis(self.get_u64(key))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .and_then(parse_bool)
            .or_else(|| default_value(key).and_then(|value| parse_bool(&value)))
            .unwrap_or(false)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let item = config_item(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        check_literal(item, value)?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for key {0}: expected {1}")]
    TypeMismatch(String, String),
    #[error("config io error: {0}")]
    Io(String),
}

pub struct SystemConfigLoader;

impl SystemConfigLoader {
    pub fn from_str(input: &str) -> Result<SystemConfig, ConfigError> {
        let value: toml::Value =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut values = HashMap::new();
        let mut errors = Vec::new();
        flatten_values(&mut values, String::new(), &value, &mut errors);
        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }
        Ok(SystemConfig { values })
    }

    /// Reads a TOML file; a missing file yields the defaults.
    pub fn from_path(path: &Path) -> Result<SystemConfig, ConfigError> {
        if !path.exists() {
            return Ok(SystemConfig::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_str(&raw)
    }

    /// Applies `SERVING_*` overrides taken from `lookup` on top of `config`.
    pub fn apply_overrides<F>(mut config: SystemConfig, lookup: F) -> Result<SystemConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for item in STATIC_CONFIG_TABLE {
            if let Some(value) = lookup(&item.env_var()) {
                check_literal(item, &value)?;
                config.values.insert(item.key.to_string(), value);
            }
        }
        Ok(config)
    }

    pub fn from_env(config: SystemConfig) -> Result<SystemConfig, ConfigError> {
        Self::apply_overrides(config, |name| std::env::var(name).ok())
    }

    /// A commented TOML document listing every key with its default.
    pub fn default_document() -> String {
        let mut sections: Vec<(&str, Vec<&StaticConfigItem>)> = Vec::new();
        for item in STATIC_CONFIG_TABLE {
            let section = item.key.split('.').next().unwrap_or_default();
            match sections.iter_mut().find(|(name, _)| *name == section) {
                Some((_, items)) => items.push(item),
                None => sections.push((section, vec![item])),
            }
        }
        let mut out = String::new();
        for (section, items) in sections {
            out.push_str(&format!("[{section}]\n"));
            for item in items {
                let name = item.key.split_once('.').map(|(_, name)| name).unwrap_or(item.key);
                out.push_str(&format!("# {}\n", item.description));
                match item.value_type {
                    "string" => out.push_str(&format!("{name} = {:?}\n", item.default_value)),
                    _ => out.push_str(&format!("{name} = {}\n", item.default_value)),
                }
            }
            out.push('\n');
        }
        out
    }
}

fn flatten_values(
    output: &mut HashMap<String, String>,
    prefix: String,
    value: &toml::Value,
    errors: &mut Vec<ConfigError>,
) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let new_prefix = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_values(output, new_prefix, nested, errors);
            }
        }
        toml::Value::String(value) => {
            insert_checked(output, &prefix, value.to_string(), "string", errors);
        }
        toml::Value::Integer(value) => {
            insert_checked(output, &prefix, value.to_string(), "number", errors);
        }
        toml::Value::Boolean(value) => {
            insert_checked(output, &prefix, value.to_string(), "boolean", errors);
        }
        _ => {
            errors.push(ConfigError::TypeMismatch(prefix, "string|number|boolean".to_string()));
        }
    }
}

fn insert_checked(
    output: &mut HashMap<String, String>,
    key: &str,
    value: String,
    expected_type: &str,
    errors: &mut Vec<ConfigError>,
) {
    let Some(item) = config_item(key) else {
        errors.push(ConfigError::UnknownKey(key.to_string()));
        return;
    };
    if item.value_type != expected_type {
        errors.push(ConfigError::TypeMismatch(key.to_string(), item.value_type.to_string()));
        return;
    }
    output.insert(key.to_string(), value);
}

fn check_literal(item: &StaticConfigItem, value: &str) -> Result<(), ConfigError> {
    let valid = match item.value_type {
        "number" => parse_number(value).is_some(),
        "boolean" => parse_bool(value).is_some(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::TypeMismatch(
            item.key.to_string(),
            item.value_type.to_string(),
        ))
    }
}

fn config_item(key: &str) -> Option<&'static StaticConfigItem> {
    STATIC_CONFIG_TABLE.iter().find(|item| item.key == key)
}

fn default_value(key: &str) -> Option<String> {
    config_item(key).map(|item| item.default_value.to_string())
}

fn parse_number(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
