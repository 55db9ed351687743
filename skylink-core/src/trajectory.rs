//! Trajectory: dead-reckoning prediction and per-step geofence annotation.

use serde::{Deserialize, Serialize};

use crate::geofence::{GeoPoint, ZoneSet};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default number of predicted steps.
pub const DEFAULT_STEPS: u32 = 10;

/// Default interval between predicted steps, in seconds.
pub const DEFAULT_INTERVAL_SECS: f64 = 60.0;

/// One timestamped position from a flight track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    pub point: GeoPoint,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

/// Ground speed and true heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Motion {
    pub speed_mps: f64,
    /// Degrees clockwise from north, in `[0, 360)`.
    pub heading_deg: f64,
}

impl Motion {
    /// Estimate motion from the last two track samples. `None` if time does not advance.
    pub fn from_samples(prev: &TrackSample, last: &TrackSample) -> Option<Self> {
        let dt = last.timestamp - prev.timestamp;
        if dt <= 0 {
            return None;
        }
        let d_lat = (last.point.latitude - prev.point.latitude).to_radians();
        let d_lon = (last.point.longitude - prev.point.longitude).to_radians();
        let mean_lat = ((last.point.latitude + prev.point.latitude) / 2.0).to_radians();
        let dx = d_lon * mean_lat.cos() * EARTH_RADIUS_M;
        let dy = d_lat * EARTH_RADIUS_M;
        Some(Self {
            speed_mps: dx.hypot(dy) / dt as f64,
            heading_deg: dx.atan2(dy).to_degrees().rem_euclid(360.0),
        })
    }
}

/// A predicted position with its restricted-zone classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub point: GeoPoint,
    /// 1-based step index.
    pub step_index: u32,
    pub restricted: bool,
}

impl TrajectoryPoint {
    /// Classify `point` against `zones` now. The flag is never carried over from another zone set.
    pub fn annotate(point: GeoPoint, step_index: u32, zones: &ZoneSet) -> Self {
        Self {
            point,
            step_index,
            restricted: zones.is_restricted(&point),
        }
    }
}

/// Great-circle dead reckoning: step `k` lies `speed * interval * k` meters along the heading.
pub fn predict(origin: GeoPoint, motion: Motion, steps: u32, interval_secs: f64) -> Vec<GeoPoint> {
    let lat = origin.latitude.to_radians();
    let lon = origin.longitude.to_radians();
    let heading = motion.heading_deg.to_radians();
    (1..=steps)
        .map(|k| {
            let angular = motion.speed_mps * interval_secs * f64::from(k) / EARTH_RADIUS_M;
            let new_lat =
                (lat.sin() * angular.cos() + lat.cos() * angular.sin() * heading.cos()).asin();
            let new_lon = lon
                + (heading.sin() * angular.sin() * lat.cos())
                    .atan2(angular.cos() - lat.sin() * new_lat.sin());
            GeoPoint::new(new_lat.to_degrees(), wrap_longitude(new_lon.to_degrees()))
        })
        .collect()
}

/// Normalize to `[-180, 180)`.
fn wrap_longitude(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

/// Classify each predicted point, numbering steps from 1.
pub fn annotate(points: &[GeoPoint], zones: &ZoneSet) -> Vec<TrajectoryPoint> {
    points
        .iter()
        .zip(1u32..)
        .map(|(p, step)| TrajectoryPoint::annotate(*p, step, zones))
        .collect()
}
