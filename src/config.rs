//! Configuration file
//!
//! ```json
//! {
//!   "host": "127.0.0.1",
//!   "port": 6379,
//!   "command": "ZRANGEBYSCORE articles 0 1700000000 WITHSCORES",
//!   "schema": { "columns": ["referrer", "time", "tags"], "multi_value_column": "tags" },
//!   "filters": [
//!     { "mode": "count", "include": { "referrer": "google" } },
//!     { "mode": "group", "column": "tags", "limit": 5, "exclude": "||video" }
//!   ]
//! }
//! ```
//!
//! Every field is optional; command-line values take precedence.

use crate::filter::FilterConfig;
use crate::schema::{Schema, SchemaConfig};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TallyConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

impl TallyConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn schema(&self) -> Result<Schema> {
        self.schema.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMode;
    use std::io::Write;

    #[test]
    fn test_full_config() {
        let json = r#"{
            "host": "redis.local",
            "port": 6380,
            "command": "ZRANGE log 0 -1",
            "timeout_ms": 250,
            "schema": { "columns": ["a", "b", "c"], "multi_value_column": "c" },
            "filters": [
                { "mode": "count" },
                { "mode": "group", "column": "c", "limit": -1 }
            ]
        }"#;
        let config = TallyConfig::from_json(json).unwrap();
        assert_eq!(config.host.as_deref(), Some("redis.local"));
        assert_eq!(config.port, Some(6380));
        assert_eq!(config.timeout_ms, Some(250));
        assert_eq!(config.filters.len(), 2);
        assert_eq!(config.filters[1].mode, FilterMode::Group);
        assert_eq!(config.filters[1].limit, -1);
        let schema = config.schema().unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.multi_value_column(), Some(2));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TallyConfig::from_json("{}").unwrap();
        assert!(config.filters.is_empty());
        assert_eq!(config.schema().unwrap(), Schema::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(TallyConfig::from_json(r#"{ "hots": "x" }"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "filters": [{{ "mode": "count" }}] }}"#).unwrap();
        let config = TallyConfig::load(file.path()).unwrap();
        assert_eq!(config.filters.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(TallyConfig::load("/nonexistent/zset-tally.json").is_err());
    }
}
