//! Pipeline configuration
//!
//! Centralized, user-configurable settings for the cache layers, the decode
//! strategy thresholds and the prefetch windows. Configuration can be
//! created programmatically, loaded from environment variables, or loaded
//! from a small TOML file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Eviction policy for the remote-file disk cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least recently accessed entries evicted first
    Lru,
    /// Least frequently accessed entries evicted first
    Lfu,
    /// Largest entries evicted first
    SizeBased,
    /// Oldest entries evicted first
    TimeBased,
}

impl EvictionPolicy {
    /// Policy name as used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::SizeBased => "size",
            EvictionPolicy::TimeBased => "time",
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "size" => Ok(EvictionPolicy::SizeBased),
            "time" => Ok(EvictionPolicy::TimeBased),
            other => Err(ConfigError::InvalidValue(format!(
                "eviction_policy: {other}"
            ))),
        }
    }
}

/// Configuration for the image pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Global memory budget in bytes (sole arbiter of total bytes)
    pub pool_budget: usize,

    /// Hot decoded-artifact cache limit in bytes
    pub hot_cache_size: usize,

    /// Remote-file disk cache limit in bytes
    pub remote_cache_size: u64,

    /// Directory for the remote-file disk cache
    pub remote_cache_dir: PathBuf,

    /// TTL for remote cache entries in seconds
    pub remote_ttl_secs: u64,

    /// Eviction policy for the remote cache
    pub remote_eviction_policy: EvictionPolicy,

    /// Occupancy fraction restored by remote-cache eviction
    pub remote_headroom: f64,

    /// Pixel count at or above which an image is ultra-high-pixel
    pub ultra_pixel_threshold: u64,

    /// Pixel count at or above which an image is high-pixel
    pub high_pixel_threshold: u64,

    /// File size at or above which a request is large-file
    pub large_file_threshold: u64,

    /// File size at or above which memory-mapped decode is preferred
    pub mmap_threshold: u64,

    /// File size at or above which the accelerated decoder is preferred
    /// over fast direct decode
    pub accelerated_min_bytes: u64,

    /// Target pixel area above which the 50% progressive stage is emitted
    pub progressive_stage_threshold: u64,

    /// Overscale factor applied per decode category
    pub overscale_ultra: f64,
    pub overscale_high: f64,
    pub overscale_large: f64,
    pub overscale_normal: f64,

    /// Forward prefetch window width at rest
    pub forward_window: usize,

    /// Backward prefetch window width at rest
    pub backward_window: usize,

    /// Extra indices kept resident on each side beyond the prefetch window
    pub retention_margin: usize,

    /// Debounce delay for slow navigation, in milliseconds
    pub slow_debounce_ms: u64,

    /// Occurrences of a repeated failure logged before suppression
    pub suppress_after: u64,

    /// Explicit decode-strategy override ("fast", "accelerated", "mmap")
    pub strategy_override: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_budget: 512 * 1024 * 1024,
            hot_cache_size: 256 * 1024 * 1024,
            remote_cache_size: 1024 * 1024 * 1024,
            remote_cache_dir: Self::default_cache_dir(),
            remote_ttl_secs: 3600,
            remote_eviction_policy: EvictionPolicy::Lru,
            remote_headroom: 0.8,
            ultra_pixel_threshold: 150_000_000,
            high_pixel_threshold: 50_000_000,
            large_file_threshold: 60 * 1024 * 1024,
            mmap_threshold: 100 * 1024 * 1024,
            accelerated_min_bytes: 1024 * 1024,
            progressive_stage_threshold: 1920 * 1080,
            overscale_ultra: 1.0,
            overscale_high: 1.2,
            overscale_large: 1.5,
            overscale_normal: 2.0,
            forward_window: 3,
            backward_window: 1,
            retention_margin: 2,
            slow_debounce_ms: 15,
            suppress_after: 1,
            strategy_override: None,
        }
    }
}

impl PipelineConfig {
    /// Sets the global pool budget in megabytes
    pub fn with_pool_mb(mut self, mb: usize) -> Self {
        self.pool_budget = mb * 1024 * 1024;
        self
    }

    /// Sets the hot cache size in megabytes
    pub fn with_hot_mb(mut self, mb: usize) -> Self {
        self.hot_cache_size = mb * 1024 * 1024;
        self
    }

    /// Sets the remote cache size in megabytes
    pub fn with_remote_mb(mut self, mb: u64) -> Self {
        self.remote_cache_size = mb * 1024 * 1024;
        self
    }

    /// Sets the remote cache directory
    pub fn with_remote_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.remote_cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Sets the remote cache TTL in seconds
    pub fn with_ttl_secs(mut self, secs: u64) -> Self {
        self.remote_ttl_secs = secs;
        self
    }

    /// Sets the remote cache eviction policy
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.remote_eviction_policy = policy;
        self
    }

    /// Sets the prefetch window widths
    pub fn with_windows(mut self, forward: usize, backward: usize) -> Self {
        self.forward_window = forward;
        self.backward_window = backward;
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/lightbox/network_cache
    /// - Linux: ~/.cache/lightbox/network_cache
    /// - Windows: %LOCALAPPDATA%\lightbox\network_cache
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("lightbox").join("network_cache")
        } else {
            PathBuf::from("cache/network_cache")
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Recognized variables:
    /// - `LIGHTBOX_POOL_BUDGET_MB`
    /// - `LIGHTBOX_HOT_CACHE_MB`
    /// - `LIGHTBOX_REMOTE_CACHE_MB`
    /// - `LIGHTBOX_REMOTE_CACHE_DIR`
    /// - `LIGHTBOX_REMOTE_TTL_SECS`
    /// - `LIGHTBOX_EVICTION_POLICY` (lru / lfu / size / time)
    /// - `LIGHTBOX_STRATEGY` (fast / accelerated / mmap)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LIGHTBOX_POOL_BUDGET_MB") {
            config.pool_budget = parse_mb(&val, "LIGHTBOX_POOL_BUDGET_MB")?;
        }
        if let Ok(val) = std::env::var("LIGHTBOX_HOT_CACHE_MB") {
            config.hot_cache_size = parse_mb(&val, "LIGHTBOX_HOT_CACHE_MB")?;
        }
        if let Ok(val) = std::env::var("LIGHTBOX_REMOTE_CACHE_MB") {
            config.remote_cache_size = parse_mb(&val, "LIGHTBOX_REMOTE_CACHE_MB")? as u64;
        }
        if let Ok(val) = std::env::var("LIGHTBOX_REMOTE_CACHE_DIR") {
            config.remote_cache_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("LIGHTBOX_REMOTE_TTL_SECS") {
            config.remote_ttl_secs = val
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue("LIGHTBOX_REMOTE_TTL_SECS".into()))?;
        }
        if let Ok(val) = std::env::var("LIGHTBOX_EVICTION_POLICY") {
            config.remote_eviction_policy = val.parse()?;
        }
        if let Ok(val) = std::env::var("LIGHTBOX_STRATEGY") {
            config.strategy_override = Some(val);
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// pool_budget_mb = 512
    /// hot_cache_mb = 256
    /// remote_cache_mb = 1024
    /// remote_cache_dir = "/path/to/cache"
    /// remote_ttl_secs = 3600
    /// eviction_policy = "lru"
    /// forward_window = 3
    /// backward_window = 1
    /// slow_debounce_ms = 15
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string (flat key/value subset).
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "pool_budget_mb" => config.pool_budget = parse_mb(value, key)?,
                    "hot_cache_mb" => config.hot_cache_size = parse_mb(value, key)?,
                    "remote_cache_mb" => config.remote_cache_size = parse_mb(value, key)? as u64,
                    "remote_cache_dir" => config.remote_cache_dir = PathBuf::from(value),
                    "remote_ttl_secs" => {
                        config.remote_ttl_secs = value
                            .parse::<u64>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
                    }
                    "eviction_policy" => config.remote_eviction_policy = value.parse()?,
                    "forward_window" => {
                        config.forward_window = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
                    }
                    "backward_window" => {
                        config.backward_window = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
                    }
                    "slow_debounce_ms" => {
                        config.slow_debounce_ms = value
                            .parse::<u64>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
                    }
                    "suppress_after" => {
                        config.suppress_after = value
                            .parse::<u64>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
                    }
                    "strategy" => config.strategy_override = Some(value.to_string()),
                    _ => {} // Ignore unknown keys
                }
            }
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    fn to_toml(&self) -> String {
        let mut out = format!(
            "# Lightbox pipeline configuration\n\
             pool_budget_mb = {}\n\
             hot_cache_mb = {}\n\
             remote_cache_mb = {}\n\
             remote_cache_dir = \"{}\"\n\
             remote_ttl_secs = {}\n\
             eviction_policy = \"{}\"\n\
             forward_window = {}\n\
             backward_window = {}\n\
             slow_debounce_ms = {}\n\
             suppress_after = {}\n",
            self.pool_budget / (1024 * 1024),
            self.hot_cache_size / (1024 * 1024),
            self.remote_cache_size / (1024 * 1024),
            self.remote_cache_dir.display(),
            self.remote_ttl_secs,
            self.remote_eviction_policy.name(),
            self.forward_window,
            self.backward_window,
            self.slow_debounce_ms,
            self.suppress_after,
        );
        if let Some(strategy) = &self.strategy_override {
            out.push_str(&format!("strategy = \"{strategy}\"\n"));
        }
        out
    }
}

fn parse_mb(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map(|mb| mb * 1024 * 1024)
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing a configuration file
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.pool_budget, 512 * 1024 * 1024);
        assert_eq!(config.hot_cache_size, 256 * 1024 * 1024);
        assert_eq!(config.remote_cache_size, 1024 * 1024 * 1024);
        assert_eq!(config.remote_ttl_secs, 3600);
        assert_eq!(config.remote_eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.ultra_pixel_threshold, 150_000_000);
        assert_eq!(config.overscale_ultra, 1.0);
        assert_eq!(config.forward_window, 3);
        assert_eq!(config.backward_window, 1);
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::default()
            .with_pool_mb(128)
            .with_hot_mb(64)
            .with_remote_mb(256)
            .with_remote_dir("/custom/path")
            .with_ttl_secs(60)
            .with_eviction_policy(EvictionPolicy::Lfu)
            .with_windows(5, 2);

        assert_eq!(config.pool_budget, 128 * 1024 * 1024);
        assert_eq!(config.hot_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.remote_cache_size, 256 * 1024 * 1024);
        assert_eq!(config.remote_cache_dir, PathBuf::from("/custom/path"));
        assert_eq!(config.remote_ttl_secs, 60);
        assert_eq!(config.remote_eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.forward_window, 5);
        assert_eq!(config.backward_window, 2);
    }

    #[test]
    fn test_eviction_policy_parse() {
        assert_eq!("lru".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!("LFU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lfu);
        assert_eq!(
            "size".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::SizeBased
        );
        assert_eq!(
            "time".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::TimeBased
        );
        assert!("fifo".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[
            "LIGHTBOX_POOL_BUDGET_MB",
            "LIGHTBOX_HOT_CACHE_MB",
            "LIGHTBOX_REMOTE_CACHE_MB",
            "LIGHTBOX_REMOTE_CACHE_DIR",
            "LIGHTBOX_REMOTE_TTL_SECS",
            "LIGHTBOX_EVICTION_POLICY",
            "LIGHTBOX_STRATEGY",
        ]);

        env::set_var("LIGHTBOX_POOL_BUDGET_MB", "128");
        env::set_var("LIGHTBOX_HOT_CACHE_MB", "64");
        env::set_var("LIGHTBOX_REMOTE_CACHE_MB", "256");
        env::set_var("LIGHTBOX_REMOTE_CACHE_DIR", "/tmp/test-cache");
        env::set_var("LIGHTBOX_REMOTE_TTL_SECS", "120");
        env::set_var("LIGHTBOX_EVICTION_POLICY", "lfu");
        env::set_var("LIGHTBOX_STRATEGY", "mmap");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.pool_budget, 128 * 1024 * 1024);
        assert_eq!(config.hot_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.remote_cache_size, 256 * 1024 * 1024);
        assert_eq!(config.remote_cache_dir, PathBuf::from("/tmp/test-cache"));
        assert_eq!(config.remote_ttl_secs, 120);
        assert_eq!(config.remote_eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.strategy_override.as_deref(), Some("mmap"));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&["LIGHTBOX_POOL_BUDGET_MB"]);

        env::set_var("LIGHTBOX_POOL_BUDGET_MB", "not_a_number");
        assert!(PipelineConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&[
            "LIGHTBOX_POOL_BUDGET_MB",
            "LIGHTBOX_HOT_CACHE_MB",
            "LIGHTBOX_REMOTE_CACHE_MB",
            "LIGHTBOX_REMOTE_CACHE_DIR",
            "LIGHTBOX_REMOTE_TTL_SECS",
            "LIGHTBOX_EVICTION_POLICY",
            "LIGHTBOX_STRATEGY",
        ]);

        env::remove_var("LIGHTBOX_HOT_CACHE_MB");
        env::remove_var("LIGHTBOX_REMOTE_CACHE_MB");
        env::remove_var("LIGHTBOX_REMOTE_CACHE_DIR");
        env::remove_var("LIGHTBOX_REMOTE_TTL_SECS");
        env::remove_var("LIGHTBOX_EVICTION_POLICY");
        env::remove_var("LIGHTBOX_STRATEGY");
        env::set_var("LIGHTBOX_POOL_BUDGET_MB", "128");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.pool_budget, 128 * 1024 * 1024);
        assert_eq!(config.hot_cache_size, 256 * 1024 * 1024); // default
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PipelineConfig::default()
            .with_pool_mb(128)
            .with_hot_mb(64)
            .with_remote_dir("/tmp/cache")
            .with_eviction_policy(EvictionPolicy::SizeBased);

        let toml = config.to_toml();
        let parsed = PipelineConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Test configuration
            pool_budget_mb = 128
            hot_cache_mb = 64
            remote_cache_mb = 256
            remote_cache_dir = "/tmp/test"
            remote_ttl_secs = 60
            eviction_policy = "time"
            forward_window = 4
            backward_window = 2
            slow_debounce_ms = 20
            strategy = "fast"
        "#;

        let config = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(config.pool_budget, 128 * 1024 * 1024);
        assert_eq!(config.hot_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.remote_cache_size, 256 * 1024 * 1024);
        assert_eq!(config.remote_cache_dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.remote_ttl_secs, 60);
        assert_eq!(config.remote_eviction_policy, EvictionPolicy::TimeBased);
        assert_eq!(config.forward_window, 4);
        assert_eq!(config.backward_window, 2);
        assert_eq!(config.slow_debounce_ms, 20);
        assert_eq!(config.strategy_override.as_deref(), Some("fast"));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("pipeline.toml");

        let config = PipelineConfig::default().with_pool_mb(96);
        config.save_to_file(&config_path).unwrap();

        let loaded = PipelineConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);
    }
}
