//! Zone parsing from client payloads
//!
//! Dashboards send zones in three forms:
//! - GeoJSON `Polygon` geometry, a `Feature` wrapping one, or a `Point`
//!   carrying a `radius` (metres) for circular zones
//! - Arrays of coordinate pairs, in either `[lat, lng]` or `[lng, lat]` order
//! - A `"lat,lng; lat,lng; ..."` string

use geojson::{GeoJson, Geometry, JsonObject, Value};
use serde::{Deserialize, Serialize};

use crate::{GeoPoint, GeofenceError, Polygon, Result, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateOrder {
    #[default]
    LatLng,
    LngLat,
}

impl CoordinateOrder {
    fn point(self, pair: [f64; 2]) -> Result<GeoPoint> {
        match self {
            CoordinateOrder::LatLng => GeoPoint::checked(pair[0], pair[1]),
            CoordinateOrder::LngLat => GeoPoint::checked(pair[1], pair[0]),
        }
    }
}

pub fn parse_coordinate_pairs(pairs: &[[f64; 2]], order: CoordinateOrder) -> Result<Polygon> {
    let vertices = pairs
        .iter()
        .map(|pair| order.point(*pair))
        .collect::<Result<Vec<_>>>()?;
    Polygon::new(vertices)
}

pub fn parse_coordinate_string(input: &str) -> Result<Polygon> {
    let vertices = input
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.split(',').map(str::trim);
            let (lat, lng) = match (parts.next(), parts.next(), parts.next()) {
                (Some(lat), Some(lng), None) => (lat, lng),
                _ => return Err(GeofenceError::Parse(format!("expected 'lat,lng', got '{pair}'"))),
            };
            let lat: f64 = lat
                .parse()
                .map_err(|_| GeofenceError::Parse(format!("bad latitude '{lat}'")))?;
            let lng: f64 = lng
                .parse()
                .map_err(|_| GeofenceError::Parse(format!("bad longitude '{lng}'")))?;
            GeoPoint::checked(lat, lng)
        })
        .collect::<Result<Vec<_>>>()?;

    Polygon::new(vertices)
}

pub fn parse_geojson(input: &str) -> Result<Shape> {
    let geojson: GeoJson = input
        .parse()
        .map_err(|e: geojson::Error| GeofenceError::Parse(e.to_string()))?;
    shape_from_geojson(geojson)
}

impl Shape {
    pub fn from_geojson_value(value: &serde_json::Value) -> Result<Shape> {
        let geojson = GeoJson::from_json_value(value.clone())
            .map_err(|e| GeofenceError::Parse(e.to_string()))?;
        shape_from_geojson(geojson)
    }

    /// Polygons are emitted with a closed `[lng, lat]` ring; circles as a
    /// `Point` with a `radius` foreign member.
    pub fn to_geojson(&self) -> Geometry {
        match self {
            Shape::Polygon(polygon) => {
                let mut ring: Vec<Vec<f64>> = polygon
                    .vertices()
                    .iter()
                    .map(|v| vec![v.lng, v.lat])
                    .collect();
                if let Some(first) = ring.first().cloned() {
                    ring.push(first);
                }
                Geometry::new(Value::Polygon(vec![ring]))
            }
            Shape::Circle { center, radius_m } => {
                let mut geometry = Geometry::new(Value::Point(vec![center.lng, center.lat]));
                let mut members = JsonObject::new();
                members.insert("radius".to_string(), serde_json::json!(radius_m));
                geometry.foreign_members = Some(members);
                geometry
            }
        }
    }
}

fn shape_from_geojson(geojson: GeoJson) -> Result<Shape> {
    match geojson {
        GeoJson::Geometry(geometry) => {
            let radius = radius_from(geometry.foreign_members.as_ref());
            shape_from_geometry(geometry, radius)
        }
        GeoJson::Feature(feature) => {
            let radius = radius_from(feature.properties.as_ref());
            let geometry = feature
                .geometry
                .ok_or_else(|| GeofenceError::UnsupportedGeometry("feature without geometry".into()))?;
            let radius = radius.or_else(|| radius_from(geometry.foreign_members.as_ref()));
            shape_from_geometry(geometry, radius)
        }
        GeoJson::FeatureCollection(_) => Err(GeofenceError::UnsupportedGeometry(
            "FeatureCollection".into(),
        )),
    }
}

fn radius_from(members: Option<&JsonObject>) -> Option<f64> {
    let members = members?;
    members
        .get("radius")
        .or_else(|| members.get("radius_m"))
        .and_then(serde_json::Value::as_f64)
}

fn shape_from_geometry(geometry: Geometry, radius: Option<f64>) -> Result<Shape> {
    match geometry.value {
        Value::Polygon(rings) => {
            let outer = rings
                .into_iter()
                .next()
                .ok_or(GeofenceError::TooFewVertices(0))?;
            let vertices = outer
                .iter()
                .map(|position| position_to_point(position))
                .collect::<Result<Vec<_>>>()?;
            Shape::polygon(vertices)
        }
        Value::Point(position) => {
            let center = position_to_point(&position)?;
            let radius = radius.ok_or_else(|| {
                GeofenceError::UnsupportedGeometry("Point zone requires a radius".into())
            })?;
            Shape::circle(center, radius)
        }
        other => Err(GeofenceError::UnsupportedGeometry(geometry_name(&other).to_string())),
    }
}

fn geometry_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn position_to_point(position: &[f64]) -> Result<GeoPoint> {
    match position {
        [lng, lat] | [lng, lat, _] => GeoPoint::checked(*lat, *lng),
        _ => Err(GeofenceError::Parse(format!(
            "position must have 2 or 3 elements, got {}",
            position.len()
        ))),
    }
}
