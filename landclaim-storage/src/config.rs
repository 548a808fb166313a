//! Key/value configuration consumed by backend constructors.
//!
//! A backend reads its settings from a source section and writes whatever it
//! resolved (defaults, legacy values) into a separate target section. The
//! caller decides whether and where the target gets persisted.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

pub const DATA_FOLDER: &str = "DataFolder";
pub const HOST: &str = "Host";
pub const PORT: &str = "Port";
pub const DATABASE: &str = "Database";
pub const USERNAME: &str = "Username";
pub const PASSWORD: &str = "Password";
pub const TABLE_PREFIX: &str = "TablePrefix";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSection {
    values: BTreeMap<String, Value>,
}

impl ConfigSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a section from a JSON object file. A missing file is an empty
    /// section.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let values: BTreeMap<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("Config {} is not a JSON object", path.display()))?;
        Ok(Self { values })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value for the key. Numbers and booleans are rendered as text.
    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Port-like value; accepts numbers and numeric strings.
    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u16::try_from(v).ok()).unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_coercion() {
        let cfg = ConfigSection::new()
            .with(HOST, "db.internal")
            .with(PORT, "6543")
            .with(DATABASE, 12);

        assert_eq!(cfg.get_str(HOST, "localhost"), "db.internal");
        assert_eq!(cfg.get_u16(PORT, 5432), 6543);
        assert_eq!(cfg.get_str(DATABASE, "landclaim"), "12");
        assert_eq!(cfg.get_str(USERNAME, ""), "");
        assert_eq!(cfg.get_u16("Missing", 5432), 5432);
    }

    #[test]
    fn test_bad_port_falls_back() {
        let cfg = ConfigSection::new().with(PORT, 700_000);
        assert_eq!(cfg.get_u16(PORT, 5432), 5432);
    }

    #[test]
    fn test_missing_file_is_empty_and_save_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        assert_eq!(ConfigSection::load(&path).unwrap(), ConfigSection::new());

        let cfg = ConfigSection::new().with(USERNAME, "gp").with(PORT, 5432);
        cfg.save(&path).unwrap();
        assert_eq!(ConfigSection::load(&path).unwrap(), cfg);
    }
}
