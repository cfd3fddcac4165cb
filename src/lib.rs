//! # Trail Miles
//!
//! GPS mile tracking for trail planning.
//!
//! This library provides:
//! - Nearest mile-marker matching with a snap-distance threshold
//! - A tracking session that turns a noisy position stream into sparse
//!   mile-change events
//! - A persisted, queryable log of mile changes per trail section
//!
//! ## Features
//!
//! - **`persistence`** (default) - SQLite-backed document store
//! - **`http`** - Fetch mile-marker GPX files over HTTP
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trail_miles::{markers, nearest_mile, GpsPoint};
//!
//! let markers = markers::pct_sample_markers();
//! let here = GpsPoint::new(32.5951, -116.4656);
//!
//! assert_eq!(nearest_mile(Some(&here), &markers, 5000.0), Some(0.0));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, ProviderErrorCode, Result, TrailMilesError};

// Tracker configuration
pub mod config;
pub use config::{PositionOptions, TrackerConfig};

// Geographic utilities (distance, nearest marker)
pub mod geo_utils;
pub use geo_utils::{closest_markers, haversine_distance, nearest_mile, EARTH_RADIUS_METERS};

// Spatial index over mile markers
pub mod spatial;
pub use spatial::MarkerIndex;

// Mile-marker reference data (built-in sets, GPX parsing, sources)
pub mod markers;
pub use markers::{FileMarkerSource, MarkerCatalog, MarkerSource, DEFAULT_TRAIL};

// Document store abstraction
pub mod store;
pub use store::{DocumentStore, MemoryStore};

// SQLite document store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Mile change log
pub mod mile_log;
pub use mile_log::{MileLog, MileLogEntry, MileLogStats, MileRange, NewLogEntry};

// Location providers
pub mod provider;
pub use provider::{ChannelProvider, LocationProvider, PositionFeed, PositionStream, WatchHandle};

// Tracking session
pub mod session;
pub use session::{MileChangeCallback, TrackingSession};

// HTTP marker source
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpMarkerSource;

/// Initialize logging for Android builds.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TrailMilesRust"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms; the host installs its own logger
}

// ============================================================================
// Core Types
// ============================================================================

/// Anything with a latitude and longitude in degrees.
pub trait LatLng {
    fn lat(&self) -> f64;
    fn lng(&self) -> f64;
}

/// A bare GPS coordinate.
///
/// # Example
/// ```
/// use trail_miles::GpsPoint;
/// let border = GpsPoint::new(32.5951, -116.4656);
/// assert!(border.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl LatLng for GpsPoint {
    fn lat(&self) -> f64 {
        self.latitude
    }

    fn lng(&self) -> f64 {
        self.longitude
    }
}

/// A reference point along a trail with a known distance from the start.
///
/// Mile values are not required to be unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MileMarker {
    pub mile: f64,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
}

impl MileMarker {
    pub fn new(mile: f64, lat: f64, lng: f64, name: impl Into<String>) -> Self {
        Self {
            mile,
            lat,
            lng,
            name: name.into(),
        }
    }
}

impl LatLng for MileMarker {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lng(&self) -> f64 {
        self.lng
    }
}

/// A single observation from a location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    /// Horizontal accuracy in meters, when the provider reports one
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl Position {
    pub fn new(lat: f64, lng: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            lat,
            lng,
            timestamp,
            accuracy: None,
        }
    }

    /// An observation stamped with the current time.
    pub fn now(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, Utc::now())
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

impl LatLng for Position {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lng(&self) -> f64 {
        self.lng
    }
}

/// Notification raised when the resolved mile of a session changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileChange {
    /// Newly resolved mile, `None` when the position left snap range
    pub mile: Option<f64>,
    pub previous_mile: Option<f64>,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

/// A marker together with its distance from some position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDistance {
    pub marker: MileMarker,
    pub distance_meters: f64,
}

/// Result of a one-shot position lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub position: Position,
    pub mile: Option<f64>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(32.5951, -116.4656).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_mile_change_serializes_camel_case() {
        let position = Position::now(32.5951, -116.4656).with_accuracy(10.0);
        let change = MileChange {
            mile: Some(1.0),
            previous_mile: None,
            timestamp: position.timestamp,
            position,
        };

        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["mile"], 1.0);
        assert!(json["previousMile"].is_null());
        assert_eq!(json["position"]["accuracy"], 10.0);
    }
}
