//! Configuration for tracking sessions and marker loading.
//!
//! Defaults reproduce the behaviour of the hiking planner: a 5 km snap
//! distance, the PCT as the default trail, and a silent fallback to the
//! built-in PCT markers when the real marker file cannot be loaded.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailMilesError};
use crate::markers::DEFAULT_TRAIL;

/// Options handed to the location provider for each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionOptions {
    /// Ask the provider for its most accurate fix.
    /// Default: true
    pub enable_high_accuracy: bool,

    /// How long a single position request may take before timing out.
    /// Default: 10000 ms
    pub timeout_ms: u64,

    /// Maximum age of a cached position the provider may return.
    /// Default: 30000 ms
    pub maximum_age_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 30_000,
        }
    }
}

/// Configuration for a [`TrackingSession`](crate::TrackingSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum distance between a position and its nearest marker for the
    /// marker's mile to count. Default: 5000.0 meters
    pub snap_distance_meters: f64,

    /// Trail loaded when tracking starts without markers, and the only trail
    /// allowed to fall back to built-in markers. Default: "PCT"
    pub default_trail: String,

    /// Fall back to the built-in marker set when loading the default trail
    /// fails. Default: true
    pub fallback_on_error: bool,

    /// Number of parsed trail marker sets kept in memory. Default: 4
    pub marker_cache_capacity: usize,

    /// Options for position requests
    pub position: PositionOptions,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            snap_distance_meters: 5000.0,
            default_trail: DEFAULT_TRAIL.to_string(),
            fallback_on_error: true,
            marker_cache_capacity: 4,
            position: PositionOptions::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)
            .map_err(|e| TrailMilesError::config(format!("invalid tracker config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_snap_distance(mut self, meters: f64) -> Self {
        self.snap_distance_meters = meters;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.snap_distance_meters.is_finite() || self.snap_distance_meters < 0.0 {
            return Err(TrailMilesError::config(format!(
                "snap distance must be a non-negative number of meters, got {}",
                self.snap_distance_meters
            )));
        }
        if self.default_trail.trim().is_empty() {
            return Err(TrailMilesError::config("default trail must not be empty"));
        }
        if self.marker_cache_capacity == 0 {
            return Err(TrailMilesError::config(
                "marker cache capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.snap_distance_meters, 5000.0);
        assert_eq!(config.default_trail, "PCT");
        assert!(config.fallback_on_error);
        assert_eq!(config.position.timeout_ms, 10_000);
        assert_eq!(config.position.maximum_age_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = TrackerConfig::from_json(r#"{"snap_distance_meters": 2000}"#).unwrap();
        assert_eq!(config.snap_distance_meters, 2000.0);
        assert_eq!(config.default_trail, "PCT");
        assert!(config.position.enable_high_accuracy);
    }

    #[test]
    fn test_rejects_negative_snap_distance() {
        let err = TrackerConfig::from_json(r#"{"snap_distance_meters": -1}"#).unwrap_err();
        assert!(matches!(err, TrailMilesError::Config { .. }));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            TrackerConfig::from_json("not json"),
            Err(TrailMilesError::Config { .. })
        ));
    }
}
