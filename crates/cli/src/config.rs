use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tidemark_core::DiffMode;

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "tidemark.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    #[serde(default)]
    pub replay: ReplaySettings,
    #[serde(default)]
    pub taps: TapSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySettings {
    /// Fold adjacent text fragments in the timeline view.
    #[serde(default = "default_true")]
    pub consolidate: bool,
    /// Pair tool calls with their results in the timeline view.
    #[serde(default = "default_true")]
    pub pair_tools: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            consolidate: true,
            pair_tools: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub diff_mode: DiffMode,
}

impl Default for TapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            diff_mode: DiffMode::FirstTwo,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Get the config directory path (~/.config/tidemark/)
pub fn config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("Could not determine home directory")?;
    Ok(PathBuf::from(home).join(".config").join("tidemark"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn parse_config(content: &str) -> Result<CliConfig> {
    toml::from_str(content).context("Failed to parse config")
}

/// Resolve configuration: an explicit path must exist; otherwise the default
/// location is used when present, and built-in defaults when it is not.
pub fn load_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Ok(path) if path.exists() => path,
            _ => return Ok(CliConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config at {}", path.display()))
}

/// Print the resolved configuration as TOML.
pub fn show_config(config: &CliConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    print!("{rendered}");
    Ok(())
}
