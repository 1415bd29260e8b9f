#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use loom_link::ReduceOptions;
use serde::Deserialize;
use tracing::debug;

use crate::WeaveError;

pub const CONFIG_FILE: &str = "loom.toml";

fn enabled() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReduceConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "enabled")]
    pub inline_forwarders: bool,
    #[serde(default = "enabled")]
    pub discard_unreferenced: bool,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inline_forwarders: true,
            discard_unreferenced: true,
        }
    }
}

impl ReduceConfig {
    pub fn options(&self) -> ReduceOptions {
        if !self.enabled {
            return ReduceOptions::disabled();
        }
        ReduceOptions {
            inline_forwarders: self.inline_forwarders,
            discard_unreferenced: self.discard_unreferenced,
        }
    }
}

/// Settings the weaving pipeline itself consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeaveOptions {
    pub reduce: ReduceConfig,
}

impl WeaveOptions {
    pub fn unreduced() -> Self {
        Self {
            reduce: ReduceConfig {
                enabled: false,
                ..ReduceConfig::default()
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Contents of `loom.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoomConfig {
    #[serde(default)]
    pub reduce: ReduceConfig,
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl LoomConfig {
    pub fn parse(text: &str) -> Result<Self, WeaveError> {
        toml::from_str(text).map_err(|e| WeaveError::config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, WeaveError> {
        let text = fs::read_to_string(path)
            .map_err(|e| WeaveError::config(format!("failed to read {}: {e}", path.display())))?;
        let mut config: Self =
            toml::from_str(&text).map_err(|e| WeaveError::config(format!("{}: {e}", path.display())))?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// An explicit path wins; otherwise `loom.toml` beside the fixture; otherwise defaults.
    pub fn discover(explicit: Option<&Path>, fixture: &Path) -> Result<Self, WeaveError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let beside = fixture
            .parent()
            .map(|dir| dir.join(CONFIG_FILE))
            .filter(|p| p.is_file());
        match beside {
            Some(path) => {
                debug!(path = %path.display(), "using config beside fixture");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn weave_options(&self) -> WeaveOptions {
        WeaveOptions { reduce: self.reduce }
    }
}
