//! Configuration for the geo filter engine
//!
//! The configuration is a plain serializable struct so it can be kept next to
//! the rest of the application settings in JSON or TOML.
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the loader treats requests that are still waiting for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Keep every submitted request, process them in submission order.
    Fifo,
    /// Keep only the newest waiting request, older waiting ones are canceled.
    #[default]
    LatestOnly,
}

/// Geo filter configuration
///
/// # Example
///
/// ```rust
/// use geopart_filter::{Config, QueuePolicy};
///
/// let json = r#"{
///     "grid_box_size": 2,
///     "include_geo_parts": false,
///     "queue_policy": "fifo"
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.grid_box_size, 2);
/// assert_eq!(config.queue_policy, QueuePolicy::Fifo);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Geo part grid box size in E2 units (1 = 0.01°), 1..=10
    #[serde(default = "Config::default_grid_box_size")]
    pub grid_box_size: i32,

    /// Select tours inside the geo parts (`true`) or outside of them (`false`)
    #[serde(default = "Config::default_true")]
    pub include_geo_parts: bool,

    /// Combine the external application filter with the geo filter
    #[serde(default = "Config::default_true")]
    pub use_app_filter: bool,

    /// Whether the geo filter contributes to tour lists
    #[serde(default)]
    pub filter_enabled: bool,

    /// Longitude width in cells below which every geo part is enumerated
    #[serde(default = "Config::default_narrow_width_threshold")]
    pub narrow_width_threshold: i32,

    #[serde(default)]
    pub queue_policy: QueuePolicy,

    /// Cooperative store deadline in milliseconds (None disables it)
    #[serde(default = "Config::default_query_timeout_ms")]
    pub query_timeout_ms: Option<u64>,

    #[serde(default = "Config::default_worker_thread_name")]
    pub worker_thread_name: String,
}

impl Config {
    pub const GRID_BOX_SIZE_MIN: i32 = 1;
    pub const GRID_BOX_SIZE_MAX: i32 = 10;

    const fn default_grid_box_size() -> i32 {
        1
    }

    const fn default_true() -> bool {
        true
    }

    const fn default_narrow_width_threshold() -> i32 {
        4
    }

    const fn default_query_timeout_ms() -> Option<u64> {
        Some(30_000)
    }

    fn default_worker_thread_name() -> String {
        "geo-filter-loader".to_string()
    }

    pub fn with_grid_box_size(mut self, size: i32) -> Self {
        assert!(
            (Self::GRID_BOX_SIZE_MIN..=Self::GRID_BOX_SIZE_MAX).contains(&size),
            "Grid box size must be between 1 and 10"
        );
        self.grid_box_size = size;
        self
    }

    pub fn with_include_geo_parts(mut self, include: bool) -> Self {
        self.include_geo_parts = include;
        self
    }

    pub fn with_app_filter(mut self, use_app_filter: bool) -> Self {
        self.use_app_filter = use_app_filter;
        self
    }

    pub fn with_filter_enabled(mut self, enabled: bool) -> Self {
        self.filter_enabled = enabled;
        self
    }

    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Get the store deadline as Duration
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !(Self::GRID_BOX_SIZE_MIN..=Self::GRID_BOX_SIZE_MAX).contains(&self.grid_box_size) {
            return Err(format!(
                "Grid box size must be between {} and {}",
                Self::GRID_BOX_SIZE_MIN,
                Self::GRID_BOX_SIZE_MAX
            ));
        }

        if self.narrow_width_threshold < 1 {
            return Err("Narrow width threshold must be at least one cell".to_string());
        }

        if self.query_timeout_ms == Some(0) {
            return Err("Query timeout must be positive or null".to_string());
        }

        if self.worker_thread_name.is_empty() {
            return Err("Worker thread name must not be empty".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grid_box_size: Self::default_grid_box_size(),
            include_geo_parts: true,
            use_app_filter: true,
            filter_enabled: false,
            narrow_width_threshold: Self::default_narrow_width_threshold(),
            queue_policy: QueuePolicy::default(),
            query_timeout_ms: Self::default_query_timeout_ms(),
            worker_thread_name: Self::default_worker_thread_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grid_box_size, 1);
        assert!(config.include_geo_parts);
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_json_rejects_invalid_grid_box() {
        let err = Config::from_json(r#"{"grid_box_size": 11}"#).unwrap_err();
        assert!(err.to_string().contains("Grid box size"));
    }

    #[test]
    fn test_null_timeout_disables_deadline() {
        let config = Config::from_json(r#"{"query_timeout_ms": null}"#).unwrap();
        assert_eq!(config.query_timeout(), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::default()
            .with_grid_box_size(5)
            .with_include_geo_parts(false)
            .with_queue_policy(QueuePolicy::Fifo);
        let json = config.to_json().unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    #[should_panic(expected = "Grid box size")]
    fn test_with_grid_box_size_panics_out_of_range() {
        let _ = Config::default().with_grid_box_size(0);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default().with_filter_enabled(true);
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}
