//! Optional TOML config overlay: both binaries accept `--config <file>`
//! pointing at a TOML file using `serde` + `toml`, so a run can be checked
//! into version control instead of retyped on the command line. CLI flags
//! override config file values where both set one (resolved in `cli.rs`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Config-file counterpart of `DestinationCli`. Every field is optional so
/// a config can set only the values a run wants to pin, leaving the rest
/// to CLI flags or built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DestinationFileConfig {
    #[serde(default)]
    pub sources: Vec<String>,
    pub listen_port: Option<u16>,
    pub age_record_dir: Option<String>,
    pub policy: Option<String>,
    pub transport: Option<String>,
    pub strict: Option<bool>,
    pub running_period: Option<f64>,
    pub poll_interval: Option<f64>,
    pub window_period: Option<f64>,
}

/// Config-file counterpart of `SourceCli`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceFileConfig {
    #[serde(default)]
    pub sensors: Vec<String>,
    pub listen_port: Option<u16>,
    pub destination: Option<String>,
    pub source_id: Option<u8>,
    pub policy: Option<String>,
    pub transport: Option<String>,
    pub max_payload: Option<usize>,
    pub sync_alpha: Option<f64>,
    pub sync_interval: Option<f64>,
    pub sync_rounds: Option<u32>,
}

impl DestinationFileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}

impl SourceFileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_config_parses_partial_toml() {
        let cfg: DestinationFileConfig = toml::from_str(
            r#"
            sources = ["1:position", "2:inertial"]
            policy = "maf"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sources, vec!["1:position".to_string(), "2:inertial".to_string()]);
        assert_eq!(cfg.policy.as_deref(), Some("maf"));
        assert_eq!(cfg.listen_port, None);
    }
}
