use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::FeedConfig;
use crate::gesture::GestureConfig;
use crate::matches::MatchQueueConfig;
use crate::pool::{HttpSourceConfig, PoolConfig};
use crate::preload::PreloadConfig;
use crate::retry::RetryPolicy;
use crate::swipe::SwipeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub pool: PoolSection,
    pub retry: RetrySection,
    pub swipe: SwipeSection,
    pub matches: MatchesSection,
    pub preload: PreloadSection,
    pub gesture: GestureSection,
    pub source: SourceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub batch_size: usize,
    pub preload_threshold: usize,
    pub fetch_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            batch_size: 10,
            preload_threshold: 3,
            fetch_timeout_ms: 15000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_retries: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            jitter_ms: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwipeSection {
    pub submit_timeout_ms: u64,
}

impl Default for SwipeSection {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchesSection {
    pub batch_size: usize,
    pub stagger_ms: u64,
    pub reschedule_ms: u64,
}

impl Default for MatchesSection {
    fn default() -> Self {
        Self {
            batch_size: 3,
            stagger_ms: 800,
            reschedule_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadSection {
    pub priority_count: usize,
}

impl Default for PreloadSection {
    fn default() -> Self {
        Self { priority_count: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureSection {
    pub threshold_px: f64,
    pub damping: f64,
    pub max_factor: f64,
}

impl Default for GestureSection {
    fn default() -> Self {
        Self {
            threshold_px: 100.0,
            damping: 0.5,
            max_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout_ms: 15000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            pool: PoolSection::default(),
            retry: RetrySection::default(),
            swipe: SwipeSection::default(),
            matches: MatchesSection::default(),
            preload: PreloadSection::default(),
            gesture: GestureSection::default(),
            source: SourceSection::default(),
        }
    }
}

impl From<&PoolSection> for PoolConfig {
    fn from(section: &PoolSection) -> Self {
        Self {
            batch_size: section.batch_size,
            preload_threshold: section.preload_threshold,
            fetch_timeout: Duration::from_millis(section.fetch_timeout_ms),
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        RetryPolicy::new(
            Duration::from_millis(section.base_delay_ms),
            Duration::from_millis(section.max_delay_ms),
            Duration::from_millis(section.jitter_ms),
            section.max_retries,
        )
    }
}

impl From<&SwipeSection> for SwipeConfig {
    fn from(section: &SwipeSection) -> Self {
        Self {
            submit_timeout: Duration::from_millis(section.submit_timeout_ms),
        }
    }
}

impl From<&MatchesSection> for MatchQueueConfig {
    fn from(section: &MatchesSection) -> Self {
        Self {
            batch_size: section.batch_size,
            stagger: Duration::from_millis(section.stagger_ms),
            reschedule_delay: Duration::from_millis(section.reschedule_ms),
        }
    }
}

impl From<&PreloadSection> for PreloadConfig {
    fn from(section: &PreloadSection) -> Self {
        Self {
            priority_count: section.priority_count,
        }
    }
}

impl From<&GestureSection> for GestureConfig {
    fn from(section: &GestureSection) -> Self {
        Self {
            threshold: section.threshold_px,
            damping: section.damping,
            max_factor: section.max_factor,
        }
    }
}

impl From<&SourceSection> for HttpSourceConfig {
    fn from(section: &SourceSection) -> Self {
        Self {
            base_url: section.base_url.clone(),
            request_timeout: Duration::from_millis(section.request_timeout_ms),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Runtime configuration for the engine
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            pool: (&self.pool).into(),
            retry: (&self.retry).into(),
            swipe: (&self.swipe).into(),
            matches: (&self.matches).into(),
            preload: (&self.preload).into(),
            gesture: (&self.gesture).into(),
        }
    }

    /// Default log filter; `RUST_LOG` still takes precedence
    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn source_config(&self) -> HttpSourceConfig {
        (&self.source).into()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}
