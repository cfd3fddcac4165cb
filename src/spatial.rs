//! # Marker Index
//!
//! R-tree over mile-marker coordinates. A full-trail GPX file carries a few
//! thousand markers and positions arrive about once a second, so the session
//! only measures Haversine distance to markers inside the envelope that can
//! possibly lie within the snap distance.
//!
//! Results match [`nearest_mile`](crate::nearest_mile), including the choice
//! of the earliest marker among equidistant ones.

use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};

use crate::geo_utils::{haversine_distance, meters_to_degrees, nearest_marker, EARTH_RADIUS_METERS};
use crate::{LatLng, MileMarker};

/// Indexed entry: `[lng, lat]` with the marker's position in the marker list.
type IndexedMarker = GeomWithData<[f64; 2], usize>;

/// Spatial index over a set of mile markers.
#[derive(Debug, Clone, Default)]
pub struct MarkerIndex {
    markers: Vec<MileMarker>,
    tree: RTree<IndexedMarker>,
}

impl MarkerIndex {
    pub fn new(markers: Vec<MileMarker>) -> Self {
        let entries: Vec<IndexedMarker> = markers
            .iter()
            .enumerate()
            .map(|(i, m)| GeomWithData::new([m.lng, m.lat], i))
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
            markers,
        }
    }

    pub fn markers(&self) -> &[MileMarker] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Nearest marker within `snap_distance_meters`, with its distance.
    pub fn nearest_within<P: LatLng + ?Sized>(
        &self,
        position: &P,
        snap_distance_meters: f64,
    ) -> Option<(&MileMarker, f64)> {
        if self.markers.is_empty() {
            return None;
        }

        let envelope = match search_envelope(position, snap_distance_meters) {
            Some(envelope) => envelope,
            None => {
                let (marker, distance) = nearest_marker(position, &self.markers)?;
                return (distance <= snap_distance_meters).then_some((marker, distance));
            }
        };

        // Tree order is arbitrary, so ties go to the lowest marker index
        let mut best: Option<(usize, f64)> = None;
        for entry in self.tree.locate_in_envelope(&envelope) {
            let distance = haversine_distance(position, &self.markers[entry.data]);
            if distance > snap_distance_meters {
                continue;
            }
            let better = match best {
                None => true,
                Some((i, d)) => distance < d || (distance == d && entry.data < i),
            };
            if better {
                best = Some((entry.data, distance));
            }
        }
        best.map(|(i, distance)| (&self.markers[i], distance))
    }

    /// Mile of the nearest marker within `snap_distance_meters`.
    pub fn nearest_mile<P: LatLng + ?Sized>(
        &self,
        position: &P,
        snap_distance_meters: f64,
    ) -> Option<f64> {
        self.nearest_within(position, snap_distance_meters)
            .map(|(marker, _)| marker.mile)
    }
}

/// Lat/lng box containing every point within `radius_meters` of `center`.
///
/// Returns `None` when the box would wrap the antimeridian or touch a pole,
/// or when the inputs are not finite, in which case callers scan every marker.
fn search_envelope<P: LatLng + ?Sized>(center: &P, radius_meters: f64) -> Option<AABB<[f64; 2]>> {
    if !radius_meters.is_finite() || !center.lat().is_finite() || !center.lng().is_finite() {
        return None;
    }

    // Angular radius of the search circle
    let c = radius_meters / EARTH_RADIUS_METERS;
    if c >= std::f64::consts::FRAC_PI_2 {
        return None;
    }
    let d_lat = meters_to_degrees(radius_meters);

    let max_abs_lat = center.lat().abs() + d_lat;
    if max_abs_lat >= 90.0 {
        return None;
    }

    // sin(dλ/2) <= sin(c/2) / cos(φmax) follows from the Haversine formula
    let ratio = (c / 2.0).sin() / max_abs_lat.to_radians().cos();
    if ratio >= 1.0 {
        return None;
    }
    // Small margin so markers exactly on the boundary survive rounding
    let d_lng = (2.0 * ratio.asin()).to_degrees() * 1.001 + 1e-9;
    let d_lat = d_lat * 1.001 + 1e-9;

    let min_lng = center.lng() - d_lng;
    let max_lng = center.lng() + d_lng;
    if min_lng < -180.0 || max_lng > 180.0 {
        return None;
    }

    Some(AABB::from_corners(
        [min_lng, center.lat() - d_lat],
        [max_lng, center.lat() + d_lat],
    ))
}
