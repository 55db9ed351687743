//! Navigation backend bodies: tracked flights and their recent positions.

use serde::{Deserialize, Serialize};

use crate::geofence::GeoPoint;
use crate::trajectory::{Motion, TrackSample};

/// One recorded position of a flight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl TrackPoint {
    pub fn sample(&self) -> TrackSample {
        TrackSample {
            point: GeoPoint::new(self.lat, self.lon),
            timestamp: self.timestamp,
        }
    }
}

/// A tracked flight. The backend's own restricted flag is ignored; positions are classified locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub icao24: String,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Ground speed in m/s.
    #[serde(default)]
    pub velocity: Option<f64>,
    /// Degrees clockwise from north.
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub timestamps: Vec<TrackPoint>,
    /// `live` or `simulated`.
    #[serde(default)]
    pub source: Option<String>,
}

impl Flight {
    pub fn position(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.latitude?, self.longitude?))
    }

    /// Origin and motion for dead reckoning.
    ///
    /// The last two track samples win when time advances between them, and the origin is then
    /// the last sample. Otherwise the reported position, velocity and heading are used.
    pub fn projection(&self) -> Option<(GeoPoint, Motion)> {
        if let [.., prev, last] = self.timestamps.as_slice() {
            let last = last.sample();
            if let Some(motion) = Motion::from_samples(&prev.sample(), &last) {
                return Some((last.point, motion));
            }
        }
        let motion = Motion {
            speed_mps: self.velocity?,
            heading_deg: self.heading?.rem_euclid(360.0),
        };
        Some((self.position()?, motion))
    }
}

/// `GET /api/flights` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightList {
    pub flights: Vec<Flight>,
}

/// `GET /api/predict` response. Only the flight and its history are read; predictions are
/// recomputed locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPrediction {
    pub flight: Flight,
    #[serde(default)]
    pub historical_path: Vec<TrackPoint>,
}

impl FlightPrediction {
    /// Like [`Flight::projection`], using the returned history when the flight carries no track.
    pub fn projection(&self) -> Option<(GeoPoint, Motion)> {
        if self.flight.timestamps.len() >= 2 || self.historical_path.len() < 2 {
            return self.flight.projection();
        }
        let flight = Flight {
            timestamps: self.historical_path.clone(),
            ..self.flight.clone()
        };
        flight.projection()
    }
}
