// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::{RetryPolicy, SPP_UUID};
use crate::plan::{Phase, DEFAULT_BATCH_SIZE};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Robot link settings.
    pub link: LinkConfig,

    /// Plan settings.
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Name the robot was bonded under.
    pub device_name: String,

    /// RFCOMM service to connect to.
    pub service_uuid: Uuid,

    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,

    /// Fixed delay before each reconnection attempt.
    pub backoff_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: "HC-06".to_string(),
            service_uuid: SPP_UUID,
            max_retries: 3,
            backoff_ms: 1500,
        }
    }
}

impl LinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Commands per batch; must match the robot's queue size.
    pub batch_size: usize,

    /// Which task the plan drives.
    pub phase: Phase,

    /// Plan JSON to drive once connected.
    pub path: Option<PathBuf>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            phase: Phase::Exploration,
            path: None,
        }
    }
}

impl Config {
    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("robotap")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = Self::config_dir();
        std::fs::create_dir_all(&config_dir)?;
        Self::load_from(&config_dir.join("config.toml"))
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
