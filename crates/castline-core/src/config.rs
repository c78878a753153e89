//! Castline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CastlineError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CastlineConfig {
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl CastlineConfig {
    /// Load config from the default path (~/.castline/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path. The pacing section is validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CastlineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CastlineError::Config(format!("Failed to parse config: {e}")))?;
        config.pacing.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CastlineError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Castline home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".castline")
    }
}

/// Pacing, scheduling, and retry bounds for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_min_message_delay")]
    pub min_message_delay_secs: u64,
    #[serde(default = "default_max_message_delay")]
    pub max_message_delay_secs: u64,
    #[serde(default = "default_min_cycle_minutes")]
    pub min_cycle_minutes: u64,
    #[serde(default = "default_max_cycle_minutes")]
    pub max_cycle_minutes: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base of the exponential backoff for unclassified send failures.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    /// How long a slow-mode suppression lasts if no cycle clears it first.
    #[serde(default = "default_slow_mode_suppression")]
    pub slow_mode_suppression_secs: u64,
}

fn default_min_message_delay() -> u64 { 5 }
fn default_max_message_delay() -> u64 { 15 }
fn default_min_cycle_minutes() -> u64 { 60 }
fn default_max_cycle_minutes() -> u64 { 120 }
fn default_max_retry_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 5 }
fn default_slow_mode_suppression() -> u64 { 300 }

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_message_delay_secs: default_min_message_delay(),
            max_message_delay_secs: default_max_message_delay(),
            min_cycle_minutes: default_min_cycle_minutes(),
            max_cycle_minutes: default_max_cycle_minutes(),
            max_retry_attempts: default_max_retry_attempts(),
            backoff_base_secs: default_backoff_base(),
            slow_mode_suppression_secs: default_slow_mode_suppression(),
        }
    }
}

impl PacingConfig {
    /// All values must be positive and each min strictly below its max.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("min_message_delay_secs", self.min_message_delay_secs),
            ("max_message_delay_secs", self.max_message_delay_secs),
            ("min_cycle_minutes", self.min_cycle_minutes),
            ("max_cycle_minutes", self.max_cycle_minutes),
            ("max_retry_attempts", u64::from(self.max_retry_attempts)),
            ("backoff_base_secs", self.backoff_base_secs),
            ("slow_mode_suppression_secs", self.slow_mode_suppression_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CastlineError::Config(format!("{name} must be positive")));
            }
        }
        if self.min_message_delay_secs >= self.max_message_delay_secs {
            return Err(CastlineError::Config(format!(
                "min_message_delay_secs ({}) must be less than max_message_delay_secs ({})",
                self.min_message_delay_secs, self.max_message_delay_secs
            )));
        }
        if self.min_cycle_minutes >= self.max_cycle_minutes {
            return Err(CastlineError::Config(format!(
                "min_cycle_minutes ({}) must be less than max_cycle_minutes ({})",
                self.min_cycle_minutes, self.max_cycle_minutes
            )));
        }
        Ok(())
    }

    pub fn message_delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.min_message_delay_secs),
            Duration::from_secs(self.max_message_delay_secs),
        )
    }

    pub fn cycle_delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.min_cycle_minutes.saturating_mul(60)),
            Duration::from_secs(self.max_cycle_minutes.saturating_mul(60)),
        )
    }

    /// Backoff before retry number `attempt + 1`: `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_secs(self.backoff_base_secs.saturating_mul(1u64 << exp))
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String { "sqlite".into() }
fn default_store_path() -> String { "~/.castline/castline.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let pacing = PacingConfig::default();
        assert!(pacing.validate().is_ok());
        assert_eq!(pacing.max_retry_attempts, 3);
        assert_eq!(pacing.min_message_delay_secs, 5);
        assert_eq!(pacing.max_cycle_minutes, 120);
    }

    #[test]
    fn test_validate_rejects_inverted_and_zero() {
        let mut pacing = PacingConfig::default();
        pacing.min_message_delay_secs = 15;
        assert!(pacing.validate().is_err());

        let mut pacing = PacingConfig::default();
        pacing.min_cycle_minutes = 120;
        assert!(pacing.validate().is_err());

        let mut pacing = PacingConfig::default();
        pacing.max_retry_attempts = 0;
        let err = pacing.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_backoff_doubles() {
        let pacing = PacingConfig::default();
        assert_eq!(pacing.backoff(1), Duration::from_secs(5));
        assert_eq!(pacing.backoff(2), Duration::from_secs(10));
        assert_eq!(pacing.backoff(3), Duration::from_secs(20));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CastlineConfig = toml::from_str(
            r#"
            [pacing]
            max_retry_attempts = 5

            [store]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.pacing.max_retry_attempts, 5);
        assert_eq!(config.pacing.min_cycle_minutes, 60);
        assert_eq!(config.store.backend, "memory");
    }

    #[test]
    fn test_load_from_rejects_invalid_pacing() {
        let dir = std::env::temp_dir().join("castline-config-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[pacing]\nmin_message_delay_secs = 20\nmax_message_delay_secs = 10\n",
        )
        .unwrap();
        assert!(CastlineConfig::load_from(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_huge_cycle_minutes_saturate() {
        let pacing = PacingConfig {
            max_cycle_minutes: u64::MAX,
            ..PacingConfig::default()
        };
        assert!(pacing.validate().is_ok());
        let (min, max) = pacing.cycle_delay_bounds();
        assert_eq!(min, Duration::from_secs(60 * 60));
        assert_eq!(max, Duration::from_secs(u64::MAX));
    }
}
