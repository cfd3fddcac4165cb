//! Geographic utilities: great-circle distance and nearest-marker matching.
//!
//! All functions are pure and never fail: an absent position or an empty
//! marker list simply resolves to no match.

use crate::{LatLng, MarkerDistance, MileMarker};

/// Mean Earth radius used by the Haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (Haversine).
///
/// Symmetric, and exactly zero for identical points.
pub fn haversine_distance<A: LatLng + ?Sized, B: LatLng + ?Sized>(a: &A, b: &B) -> f64 {
    let phi1 = a.lat().to_radians();
    let phi2 = b.lat().to_radians();
    let d_phi = (b.lat() - a.lat()).to_radians();
    let d_lambda = (b.lng() - a.lng()).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Mile value of the marker nearest to `position`.
///
/// Returns `None` when there is no position, no markers, or the nearest
/// marker is farther than `snap_distance_meters`. Among equidistant markers
/// the first one in `markers` wins.
pub fn nearest_mile<P: LatLng + ?Sized>(
    position: Option<&P>,
    markers: &[MileMarker],
    snap_distance_meters: f64,
) -> Option<f64> {
    let position = position?;

    let (marker, distance) = nearest_marker(position, markers)?;
    if distance > snap_distance_meters {
        return None;
    }
    Some(marker.mile)
}

/// Nearest marker and its distance, without any threshold.
///
/// Markers at a non-finite distance (NaN coordinates) are ignored.
pub fn nearest_marker<'a, P: LatLng + ?Sized>(
    position: &P,
    markers: &'a [MileMarker],
) -> Option<(&'a MileMarker, f64)> {
    let mut best: Option<(&MileMarker, f64)> = None;

    for marker in markers {
        let distance = haversine_distance(position, marker);
        if !distance.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((marker, distance));
        }
    }

    best
}

/// The `count` markers closest to `position`, nearest first.
pub fn closest_markers<P: LatLng + ?Sized>(
    position: &P,
    markers: &[MileMarker],
    count: usize,
) -> Vec<MarkerDistance> {
    let mut ranked: Vec<MarkerDistance> = markers
        .iter()
        .map(|marker| MarkerDistance {
            marker: marker.clone(),
            distance_meters: haversine_distance(position, marker),
        })
        .collect();

    ranked.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
    ranked.truncate(count);
    ranked
}

/// Convert a distance in meters to an angle in degrees along a great circle.
pub fn meters_to_degrees(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_METERS).to_degrees()
}
