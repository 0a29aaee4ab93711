//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Condition polling settings
    #[serde(default)]
    pub polling: Polling,

    /// Batch run settings
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Ambient timeout for condition waits
    #[serde(default = "default_wait")]
    pub wait_secs: f64,

    /// Ambient timeout for a whole step (0 = same as `wait_secs`)
    #[serde(default)]
    pub step_secs: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wait_secs: default_wait(),
            step_secs: 0.0,
        }
    }
}

fn default_wait() -> f64 {
    10.0
}

/// Polling cadence
#[derive(Debug, Deserialize, Clone)]
pub struct Polling {
    /// Frames between two evaluations of a condition
    #[serde(default = "default_interval_frames")]
    pub interval_frames: u32,

    /// Length of one scheduler frame in milliseconds
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_frames: default_interval_frames(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

fn default_interval_frames() -> u32 {
    10
}
fn default_frame_interval() -> u64 {
    16
}

/// Batch run configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Seconds to wait between two test cases
    #[serde(default = "default_gap")]
    pub gap_secs: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            gap_secs: default_gap(),
        }
    }
}

fn default_gap() -> f64 {
    0.5
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let wait = seconds("timeouts.wait_secs", self.timeouts.wait_secs)?;
        if wait.is_zero() {
            return Err(super::Error::Config(format!(
                "timeouts.wait_secs must be positive, got {}",
                self.timeouts.wait_secs
            )));
        }
        seconds("timeouts.step_secs", self.timeouts.step_secs)?;
        if self.polling.interval_frames == 0 {
            return Err(super::Error::Config(
                "polling.interval_frames must be at least 1".to_string(),
            ));
        }
        seconds("batch.gap_secs", self.batch.gap_secs)?;
        Ok(())
    }

    /// Resolve the settings the engine runs with
    ///
    /// Values are checked by [`Config::load_from`]; anything out of range on
    /// a hand-built config falls back to the default.
    pub fn engine(&self) -> EngineConfig {
        let wait_timeout = Duration::try_from_secs_f64(self.timeouts.wait_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_wait()));
        let step_timeout = Duration::try_from_secs_f64(self.timeouts.step_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(wait_timeout);
        let case_gap = Duration::try_from_secs_f64(self.batch.gap_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_gap()));

        EngineConfig {
            wait_timeout,
            step_timeout,
            poll_interval_frames: self.polling.interval_frames.max(1),
            frame_interval: Duration::from_millis(self.polling.frame_interval_ms.max(1)),
            case_gap,
        }
    }
}

/// Check that a seconds setting converts to a [`Duration`]
fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        super::Error::Config(format!(
            "{} must be a non-negative number of seconds in range, got {}",
            key, value
        ))
    })
}

/// Ambient engine settings, resolved into durations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Default timeout for a single condition wait
    pub wait_timeout: Duration,
    /// Default timeout for a whole step when it declares none
    pub step_timeout: Duration,
    /// Frames between two condition evaluations
    pub poll_interval_frames: u32,
    /// Length of one scheduler frame
    pub frame_interval: Duration,
    /// Gap between consecutive cases of a batch
    pub case_gap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default().engine()
    }
}

impl EngineConfig {
    /// Override the wait (and default step) timeout
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        if self.step_timeout == self.wait_timeout {
            self.step_timeout = timeout;
        }
        self.wait_timeout = timeout;
        self
    }

    /// Override the poll cadence
    pub fn with_poll_interval_frames(mut self, frames: u32) -> Self {
        self.poll_interval_frames = frames.max(1);
        self
    }

    /// Override the gap between batch cases
    pub fn with_case_gap(mut self, gap: Duration) -> Self {
        self.case_gap = gap;
        self
    }
}
