use crate::parser::ParseOptions;
use crate::printer::PrintOptions;
use serde::Deserialize;
use std::path::PathBuf;

/// Parser and printer settings loaded from TOML.
///
/// ```toml
/// [parse]
/// require-complete = true
/// max-depth = 64
///
/// [print]
/// format = "compact"
/// ascii-only = true
/// ```
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ArborConfig {
    #[serde(default)]
    pub parse: ParseOptions,
    #[serde(default)]
    pub print: PrintOptions,
}

impl ArborConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config = Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        log::debug!("loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let config: ArborConfig = toml::from_str(content)?;
        if config.parse.max_depth == 0 {
            anyhow::bail!("parse.max-depth must be at least 1");
        }
        Ok(config)
    }
}
