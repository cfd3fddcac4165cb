//! # Mile-Marker Reference Data
//!
//! Loading of per-trail mile markers:
//! - [`MarkerSource`] fetches raw GPX text for a trail (file system, HTTP)
//! - [`parse_gpx`] turns GPX waypoints into [`MileMarker`]s
//! - [`MarkerCatalog`] caches parsed sets per trail and applies the
//!   fallback policy: transport or parse failures for the default trail
//!   resolve to the built-in sample set, any other trail surfaces the error

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{Result, TrailMilesError};
use crate::{GpsPoint, MileMarker};

/// Trail used when none is specified, and the only trail with built-in markers.
pub const DEFAULT_TRAIL: &str = "PCT";

/// Source of raw GPX marker files keyed by trail id.
#[async_trait]
pub trait MarkerSource: Send + Sync {
    /// Fetch the GPX document for `trail_id`.
    async fn fetch(&self, trail_id: &str) -> Result<String>;
}

/// File name of the full marker set for a trail, e.g. `Full_PCT_Mile_Marker.gpx`.
pub fn marker_file_name(trail_id: &str) -> String {
    format!("Full_{}_Mile_Marker.gpx", trail_id.trim().to_uppercase())
}

/// Reads marker files from a local data directory.
#[derive(Debug, Clone)]
pub struct FileMarkerSource {
    dir: PathBuf,
}

impl FileMarkerSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, trail_id: &str) -> PathBuf {
        self.dir.join(marker_file_name(trail_id))
    }
}

#[async_trait]
impl MarkerSource for FileMarkerSource {
    async fn fetch(&self, trail_id: &str) -> Result<String> {
        let path = self.path_for(trail_id);
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            TrailMilesError::transport(format!("failed to read {}: {}", path.display(), e))
        })
    }
}

// ============================================================================
// Built-in data
// ============================================================================

/// Approximate PCT markers for miles 0-10 from the Mexican border.
pub fn pct_sample_markers() -> Vec<MileMarker> {
    vec![
        MileMarker::new(0.0, 32.5951, -116.4656, "Mexican Border"),
        MileMarker::new(1.0, 32.6023, -116.4703, "Mile 1"),
        MileMarker::new(2.0, 32.6095, -116.4750, "Mile 2"),
        MileMarker::new(3.0, 32.6167, -116.4797, "Mile 3"),
        MileMarker::new(4.0, 32.6239, -116.4844, "Mile 4"),
        MileMarker::new(5.0, 32.6311, -116.4891, "Mile 5"),
        MileMarker::new(6.0, 32.6383, -116.4938, "Mile 6"),
        MileMarker::new(7.0, 32.6455, -116.4985, "Mile 7"),
        MileMarker::new(8.0, 32.6527, -116.5032, "Mile 8"),
        MileMarker::new(9.0, 32.6599, -116.5079, "Mile 9"),
        MileMarker::new(10.0, 32.6671, -116.5126, "Mile 10"),
    ]
}

/// Built-in marker set for a trail, if one ships with the crate.
pub fn builtin_markers(trail_id: &str) -> Option<Vec<MileMarker>> {
    if trail_id.trim().eq_ignore_ascii_case(DEFAULT_TRAIL) {
        Some(pct_sample_markers())
    } else {
        None
    }
}

// ============================================================================
// GPX parsing
// ============================================================================

/// Extract the mile value from a waypoint label: the last number in it.
///
/// `"PCT Mile 0"` gives 0, `"2650.5"` gives 2650.5, `"Mile 12 (water)"`
/// gives 12. Labels without a number give `None`.
pub fn parse_mile_label(label: &str) -> Option<f64> {
    label
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.trim_matches('.').parse::<f64>().ok())
        .last()
}

/// Parse mile markers from GPX waypoints.
///
/// The mile comes from the waypoint name, falling back to its description.
/// Waypoints without a numeric label or with invalid coordinates are
/// skipped; a document with no usable waypoint is a parse error.
pub fn parse_gpx(text: &str) -> Result<Vec<MileMarker>> {
    let doc = gpx::read(text.as_bytes())?;
    let total = doc.waypoints.len();

    let mut markers = Vec::with_capacity(total);
    for waypoint in &doc.waypoints {
        let point = waypoint.point();
        let coord = GpsPoint::new(point.y(), point.x());
        if !coord.is_valid() {
            continue;
        }

        let name = waypoint.name.clone().unwrap_or_default();
        let mile = parse_mile_label(&name).or_else(|| {
            waypoint
                .description
                .as_deref()
                .and_then(parse_mile_label)
        });

        if let Some(mile) = mile {
            markers.push(MileMarker::new(mile, coord.latitude, coord.longitude, name));
        }
    }

    if markers.is_empty() {
        return Err(TrailMilesError::parse(format!(
            "no mile markers found among {} GPX waypoints",
            total
        )));
    }

    debug!(
        "[Markers] Parsed {} markers from {} waypoints",
        markers.len(),
        total
    );
    Ok(markers)
}

/// Parse the track points of a GPX document, in order.
pub fn parse_gpx_track(text: &str) -> Result<Vec<GpsPoint>> {
    let doc = gpx::read(text.as_bytes())?;

    let points: Vec<GpsPoint> = doc
        .tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter())
        .map(|wp| {
            let p = wp.point();
            GpsPoint::new(p.y(), p.x())
        })
        .filter(GpsPoint::is_valid)
        .collect();

    if points.is_empty() {
        return Err(TrailMilesError::parse("GPX document has no track points"));
    }
    Ok(points)
}

/// Markers sorted by mile ascending, for display and debugging.
pub fn sorted_by_mile(markers: &[MileMarker]) -> Vec<MileMarker> {
    let mut sorted = markers.to_vec();
    sorted.sort_by(|a, b| a.mile.total_cmp(&b.mile));
    sorted
}

// ============================================================================
// Catalog
// ============================================================================

/// Least-recently-used cache of parsed marker sets, keyed by trail id.
#[derive(Debug)]
struct TrailCache {
    capacity: usize,
    entries: HashMap<String, (Arc<Vec<MileMarker>>, u64)>,
    access_counter: u64,
}

impl TrailCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    fn get(&mut self, trail: &str) -> Option<Arc<Vec<MileMarker>>> {
        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(trail).map(|(markers, last_access)| {
            *last_access = counter;
            Arc::clone(markers)
        })
    }

    fn insert(&mut self, trail: String, markers: Arc<Vec<MileMarker>>) {
        if !self.entries.contains_key(&trail) && self.entries.len() >= self.capacity {
            // Linear scan is fine for a handful of trails
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, last_access))| *last_access)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.access_counter += 1;
        self.entries.insert(trail, (markers, self.access_counter));
    }

    fn contains(&self, trail: &str) -> bool {
        self.entries.contains_key(trail)
    }
}

fn normalize_trail(trail_id: &str) -> String {
    trail_id.trim().to_uppercase()
}

/// Loads and caches marker sets per trail.
pub struct MarkerCatalog {
    source: Option<Arc<dyn MarkerSource>>,
    default_trail: String,
    fallback_on_error: bool,
    cache: Mutex<TrailCache>,
}

impl MarkerCatalog {
    pub fn new(source: Option<Arc<dyn MarkerSource>>, config: &TrackerConfig) -> Self {
        Self {
            source,
            default_trail: normalize_trail(&config.default_trail),
            fallback_on_error: config.fallback_on_error,
            cache: Mutex::new(TrailCache::new(config.marker_cache_capacity)),
        }
    }

    /// Load the marker set for `trail_id`.
    ///
    /// Successful loads are cached. Fallback results are not, so a later
    /// call retries the real source.
    pub async fn load(&self, trail_id: &str) -> Result<Arc<Vec<MileMarker>>> {
        let key = normalize_trail(trail_id);

        if let Some(markers) = self.lock_cache().get(&key) {
            debug!("[Markers] Cache hit for {} ({} markers)", key, markers.len());
            return Ok(markers);
        }

        match self.fetch_and_parse(&key).await {
            Ok(markers) => {
                info!("[Markers] Loaded {} mile markers for {}", markers.len(), key);
                let markers = Arc::new(markers);
                self.lock_cache().insert(key, Arc::clone(&markers));
                Ok(markers)
            }
            Err(err)
                if err.is_recoverable_by_fallback()
                    && self.fallback_on_error
                    && key == self.default_trail =>
            {
                match builtin_markers(&key) {
                    Some(markers) => {
                        warn!(
                            "[Markers] Failed to load markers for {} ({}), using {} built-in markers",
                            key,
                            err,
                            markers.len()
                        );
                        Ok(Arc::new(markers))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Whether a fetched marker set for `trail_id` is cached.
    pub fn is_cached(&self, trail_id: &str) -> bool {
        self.lock_cache().contains(&normalize_trail(trail_id))
    }

    async fn fetch_and_parse(&self, trail_id: &str) -> Result<Vec<MileMarker>> {
        let source = self.source.as_ref().ok_or_else(|| {
            TrailMilesError::transport(format!("no marker source configured for {}", trail_id))
        })?;
        let text = source.fetch(trail_id).await?;
        parse_gpx(&text)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TrailCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
