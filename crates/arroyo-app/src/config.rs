//! Application configuration loaded from a JSON file

use std::path::Path;

use anyhow::{bail, Context, Result};
use arroyo_core::TableVariant;
use arroyo_data::{FetchConfig, SourceConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub variant: TableVariant,
    /// Overrides the variant's default page size
    pub page_size: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            variant: TableVariant::Comparison,
            page_size: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fetch.validate()?;
        if let Some(page_size) = self.page_size {
            let max = self.variant.config().max_page_size;
            if page_size == 0 || page_size > max {
                bail!("page_size must be between 1 and {}", max);
            }
        }
        Ok(())
    }
}
