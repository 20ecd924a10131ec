//! Geofence Geometry
//!
//! Spatial primitives behind tourist zone monitoring:
//!
//! - Points, polygons and circles in WGS84 lat/lng degrees
//! - Point-in-polygon membership (boundary counts as inside)
//! - Great-circle and point-to-zone distances in metres
//! - Radius search over an in-memory zone index
//! - Zone parsing from GeoJSON, coordinate arrays and coordinate strings
//!
//! Containment works in the plain lat/lng plane. Zones crossing the
//! antimeridian are not supported.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

pub mod index;
pub mod parse;
pub mod shape;

pub use index::GeofenceIndex;
pub use parse::{parse_coordinate_pairs, parse_coordinate_string, parse_geojson, CoordinateOrder};
pub use shape::{Polygon, Shape};

/// Mean Earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeofenceError {
    #[error("Invalid coordinate: lat {lat}, lng {lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("Polygon needs at least 3 distinct vertices, got {0}")]
    TooFewVertices(usize),
    #[error("Invalid radius: {0}")]
    InvalidRadius(f64),
    #[error("Unsupported geometry: {0}")]
    UnsupportedGeometry(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, GeofenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a point, rejecting anything outside [-90, 90] x [-180, 180]
    pub fn checked(lat: f64, lng: f64) -> Result<Self> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(GeofenceError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }

    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }
}

/// Haversine distance between two points in metres
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat * PI / 180.0;
    let lat2 = b.lat * PI / 180.0;
    let dlat = (b.lat - a.lat) * PI / 180.0;
    let dlng = (b.lng - a.lng) * PI / 180.0;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());

    EARTH_RADIUS_M * c
}

/// Axis-aligned box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox {
            min_lat: first.lat,
            min_lng: first.lng,
            max_lat: first.lat,
            max_lng: first.lng,
        };
        for p in iter {
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.min_lng = bbox.min_lng.min(p.lng);
            bbox.max_lat = bbox.max_lat.max(p.lat);
            bbox.max_lng = bbox.max_lng.max(p.lng);
        }
        Some(bbox)
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lng >= self.min_lng && p.lng <= self.max_lng
    }

    /// Grow the box by `meters` on every side. Conservative near the poles.
    pub fn expand_m(&self, meters: f64) -> Self {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        let widest_lat = self.min_lat.abs().max(self.max_lat.abs()) + dlat;
        let cos = widest_lat.min(90.0).to_radians().cos();

        let (min_lng, max_lng) = if cos < 1e-9 {
            (-180.0, 180.0)
        } else {
            let dlng = dlat / cos;
            ((self.min_lng - dlng).max(-180.0), (self.max_lng + dlng).min(180.0))
        };

        BoundingBox {
            min_lat: (self.min_lat - dlat).max(-90.0),
            min_lng,
            max_lat: (self.max_lat + dlat).min(90.0),
            max_lng,
        }
    }
}

/// Local equirectangular projection centred on `origin`, in metres.
/// Accurate enough for zone-sized extents (a few tens of km).
pub(crate) fn project(origin: &GeoPoint, p: &GeoPoint) -> (f64, f64) {
    let cos = origin.lat.to_radians().cos();
    let x = (p.lng - origin.lng).to_radians() * EARTH_RADIUS_M * cos;
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}
