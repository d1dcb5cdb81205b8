//! Fetch and source configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DataError;

/// Cache and fetch policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// How long a cached page is served without a refetch
    #[serde(with = "duration_str")]
    pub freshness: Duration,

    /// Maximum number of cached pages
    pub max_entries: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(30),
            max_entries: 256,
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if self.max_entries == 0 {
            return Err(DataError::Config("max_entries must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Where conjunction pages come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A conjunction backend reached over HTTP
    Http {
        base_url: String,
        #[serde(default, with = "duration_str::option")]
        timeout: Option<Duration>,
    },
    /// A local SQLite database
    Sqlite { path: PathBuf },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Http {
            base_url: "http://localhost:8000".to_string(),
            timeout: None,
        }
    }
}

/// Durations written as human-readable strings such as `"30s"` or `"2m 30s"`
mod duration_str {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
            match duration {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| humantime::parse_duration(&text).map_err(D::Error::custom))
                .transpose()
        }
    }
}
