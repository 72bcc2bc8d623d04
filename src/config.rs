//! Configuration for a preparation run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PrepareError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sample rate of every emitted WAV file (Hz)
    pub sample_rate: u32,
    /// Name of the substitution profile applied to transcriptions
    pub subs: String,
    /// Extra substitution profiles, by name
    pub substitutions: BTreeMap<String, Vec<Substitution>>,
    /// How segments are placed under `marytts/`
    pub link_mode: LinkMode,
    pub write_textgrid: bool,
    /// Tier name used inside the TextGrid files
    pub tier_name: String,
    /// How far a clip may run past the end of its audio before it is an error
    pub clip_tolerance_ms: u32,
    /// Reuse `Wave/<stem>.wav` from an earlier run when its rate matches
    pub reuse_wave: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    Symlink,
    Copy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            subs: "default".to_string(),
            substitutions: BTreeMap::new(),
            link_mode: LinkMode::Symlink,
            write_textgrid: true,
            tier_name: "sentences".to_string(),
            clip_tolerance_ms: 50,
            reuse_wave: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PrepareError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| PrepareError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PrepareError::Config("sample_rate must be positive".into()));
        }
        if self.tier_name.trim().is_empty() {
            return Err(PrepareError::Config("tier_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn clip_tolerance_secs(&self) -> f64 {
        f64::from(self.clip_tolerance_ms) / 1000.0
    }
}
