// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Defaults loaded from `lowire.yaml`.  Every field is optional; CLI flags
/// always win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub reasoning: Option<bool>,
    pub max_turns: Option<u32>,
    pub budget_tokens: Option<u64>,
}

/// Load configuration from `path`, or from the default search locations
/// (`./lowire.yaml`, then `~/.config/lowire/config.yaml`).  A missing file
/// yields the empty config.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let candidate: Option<PathBuf> = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_locations().into_iter().find(|p| p.exists()),
    };
    let Some(file) = candidate else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read config file {}", file.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", file.display()))
}

fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("lowire.yaml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("lowire").join("config.yaml"));
    }
    paths
}
