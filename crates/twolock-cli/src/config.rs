use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// How stress consumers take items off the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerMode {
    /// Each consumer performs a fixed number of `wait_and_pop` calls.
    Quota,
    /// Consumers pop until the queue is closed and drained.
    Close,
}

impl Default for ConsumerMode {
    fn default() -> Self {
        Self::Quota
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default = "StressConfig::default_producers")]
    pub producers: usize,
    #[serde(default = "StressConfig::default_consumers")]
    pub consumers: usize,
    #[serde(default = "StressConfig::default_items_per_producer")]
    pub items_per_producer: usize,
    /// Pause between two pushes of the same producer, in microseconds.
    #[serde(default)]
    pub pause_us: u64,
    #[serde(default)]
    pub mode: ConsumerMode,
}

impl StressConfig {
    fn default_producers() -> usize {
        5
    }

    fn default_consumers() -> usize {
        5
    }

    fn default_items_per_producer() -> usize {
        10
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn total_items(&self) -> usize {
        self.producers * self.items_per_producer
    }

    pub fn validate(&self) -> Result<()> {
        if self.producers == 0 {
            bail!("producers must be at least 1");
        }
        if self.consumers == 0 {
            bail!("consumers must be at least 1");
        }
        if self.items_per_producer == 0 {
            bail!("items_per_producer must be at least 1");
        }
        if self.producers.checked_mul(self.items_per_producer).is_none() {
            bail!("producers * items_per_producer overflows");
        }
        Ok(())
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            producers: Self::default_producers(),
            consumers: Self::default_consumers(),
            items_per_producer: Self::default_items_per_producer(),
            pause_us: 0,
            mode: ConsumerMode::default(),
        }
    }
}
