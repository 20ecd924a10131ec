//! Zone shapes: polygons and circles

use serde::{Deserialize, Serialize};

use crate::{haversine_m, project, BoundingBox, GeoPoint, GeofenceError, Result, EARTH_RADIUS_M};

/// Tolerance for on-edge tests, in degrees
const EDGE_EPSILON: f64 = 1e-12;

/// A single outer ring, stored open (first vertex is not repeated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolygonRepr", into = "PolygonRepr")]
pub struct Polygon {
    vertices: Vec<GeoPoint>,
    bbox: BoundingBox,
}

#[derive(Serialize, Deserialize)]
struct PolygonRepr {
    vertices: Vec<GeoPoint>,
}

impl TryFrom<PolygonRepr> for Polygon {
    type Error = GeofenceError;

    fn try_from(repr: PolygonRepr) -> Result<Self> {
        Polygon::new(repr.vertices)
    }
}

impl From<Polygon> for PolygonRepr {
    fn from(polygon: Polygon) -> Self {
        PolygonRepr {
            vertices: polygon.vertices,
        }
    }
}

impl Polygon {
    pub fn new(mut vertices: Vec<GeoPoint>) -> Result<Self> {
        for v in &vertices {
            v.validate()?;
        }

        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        let mut distinct: Vec<GeoPoint> = Vec::with_capacity(vertices.len());
        for v in &vertices {
            if !distinct.contains(v) {
                distinct.push(*v);
            }
        }
        if distinct.len() < 3 {
            return Err(GeofenceError::TooFewVertices(distinct.len()));
        }

        let bbox = BoundingBox::from_points(&vertices)
            .ok_or(GeofenceError::TooFewVertices(0))?;

        Ok(Self { vertices, bbox })
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    fn edges(&self) -> impl Iterator<Item = (&GeoPoint, &GeoPoint)> {
        let n = self.vertices.len();
        (0..n).map(move |i| (&self.vertices[i], &self.vertices[(i + 1) % n]))
    }

    /// Even-odd ray casting. Points on an edge or vertex are inside.
    pub fn contains(&self, p: &GeoPoint) -> bool {
        if !self.bbox.contains(p) {
            return false;
        }

        if self.edges().any(|(a, b)| on_segment(p, a, b)) {
            return true;
        }

        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.lat > p.lat) != (b.lat > p.lat) {
                let cross_lng = (b.lng - a.lng) * (p.lat - a.lat) / (b.lat - a.lat) + a.lng;
                if p.lng < cross_lng {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn centroid(&self) -> GeoPoint {
        let n = self.vertices.len() as f64;
        let (lat, lng) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(lat, lng), v| (lat + v.lat, lng + v.lng));
        GeoPoint::new(lat / n, lng / n)
    }

    /// Shoelace area in a projection centred on the centroid
    pub fn area_m2(&self) -> f64 {
        let origin = self.centroid();
        let projected: Vec<(f64, f64)> = self.vertices.iter().map(|v| project(&origin, v)).collect();
        let n = projected.len();
        let twice: f64 = (0..n)
            .map(|i| {
                let (x1, y1) = projected[i];
                let (x2, y2) = projected[(i + 1) % n];
                x1 * y2 - x2 * y1
            })
            .sum();
        twice.abs() / 2.0
    }

    /// 0 inside, otherwise the distance to the closest edge
    pub fn distance_m(&self, p: &GeoPoint) -> f64 {
        if self.contains(p) {
            return 0.0;
        }

        self.edges()
            .map(|(a, b)| segment_distance_m(p, a, b))
            .fold(f64::INFINITY, f64::min)
    }
}

fn on_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> bool {
    let cross = (b.lng - a.lng) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lng - a.lng);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    p.lng >= a.lng.min(b.lng) - EDGE_EPSILON
        && p.lng <= a.lng.max(b.lng) + EDGE_EPSILON
        && p.lat >= a.lat.min(b.lat) - EDGE_EPSILON
        && p.lat <= a.lat.max(b.lat) + EDGE_EPSILON
}

/// Distance from `p` to segment `ab`, projected around `p`
fn segment_distance_m(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (ax, ay) = project(p, a);
    let (bx, by) = project(p, b);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;

    let t = if len2 == 0.0 {
        0.0
    } else {
        (-(ax * dx + ay * dy) / len2).clamp(0.0, 1.0)
    };

    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Polygon(Polygon),
    Circle { center: GeoPoint, radius_m: f64 },
}

impl Shape {
    pub fn circle(center: GeoPoint, radius_m: f64) -> Result<Self> {
        center.validate()?;
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(GeofenceError::InvalidRadius(radius_m));
        }
        Ok(Shape::Circle { center, radius_m })
    }

    pub fn polygon(vertices: Vec<GeoPoint>) -> Result<Self> {
        Polygon::new(vertices).map(Shape::Polygon)
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        match self {
            Shape::Polygon(polygon) => polygon.contains(p),
            Shape::Circle { center, radius_m } => haversine_m(center, p) <= *radius_m,
        }
    }

    pub fn distance_m(&self, p: &GeoPoint) -> f64 {
        match self {
            Shape::Polygon(polygon) => polygon.distance_m(p),
            Shape::Circle { center, radius_m } => (haversine_m(center, p) - radius_m).max(0.0),
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        match self {
            Shape::Polygon(polygon) => polygon.bbox(),
            Shape::Circle { center, radius_m } => BoundingBox {
                min_lat: center.lat,
                min_lng: center.lng,
                max_lat: center.lat,
                max_lng: center.lng,
            }
            .expand_m(*radius_m),
        }
    }

    pub fn centroid(&self) -> GeoPoint {
        match self {
            Shape::Polygon(polygon) => polygon.centroid(),
            Shape::Circle { center, .. } => *center,
        }
    }

    pub fn area_m2(&self) -> f64 {
        match self {
            Shape::Polygon(polygon) => polygon.area_m2(),
            Shape::Circle { radius_m, .. } => {
                // spherical cap
                let angle = radius_m / EARTH_RADIUS_M;
                2.0 * std::f64::consts::PI * EARTH_RADIUS_M.powi(2) * (1.0 - angle.cos())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square() -> Polygon {
        Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_polygon_contains() {
        let sq = square();
        assert!(sq.contains(&GeoPoint::new(0.5, 0.5)));
        assert!(!sq.contains(&GeoPoint::new(1.5, 0.5)));
        assert!(!sq.contains(&GeoPoint::new(-0.1, 0.5)));
    }

    #[test]
    fn test_boundary_is_inside() {
        let sq = square();
        assert!(sq.contains(&GeoPoint::new(0.0, 0.5))); // edge
        assert!(sq.contains(&GeoPoint::new(1.0, 1.0))); // vertex
        assert!(sq.contains(&GeoPoint::new(0.5, 1.0))); // right edge
    }

    #[test]
    fn test_concave_polygon() {
        // U shape opening north
        let u = Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 3.0),
            GeoPoint::new(3.0, 3.0),
            GeoPoint::new(3.0, 2.0),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(3.0, 1.0),
            GeoPoint::new(3.0, 0.0),
        ])
        .unwrap();

        assert!(u.contains(&GeoPoint::new(2.0, 0.5)));
        assert!(u.contains(&GeoPoint::new(2.0, 2.5)));
        assert!(!u.contains(&GeoPoint::new(2.0, 1.5))); // in the notch
    }

    #[test]
    fn test_closing_vertex_dropped() {
        let closed = Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        ])
        .unwrap();
        assert_eq!(closed.vertices().len(), 3);
    }

    #[test]
    fn test_too_few_vertices() {
        let err = Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        ])
        .unwrap_err();
        assert_eq!(err, GeofenceError::TooFewVertices(2));

        assert!(Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(95.0, 1.0),
        ])
        .is_err());
    }

    #[test]
    fn test_polygon_distance() {
        let sq = square();
        assert_eq!(sq.distance_m(&GeoPoint::new(0.5, 0.5)), 0.0);

        // one degree of longitude east of the right edge at the equator, ~111 km
        let d = sq.distance_m(&GeoPoint::new(0.5, 2.0));
        assert!((d - 111_195.0).abs() < 500.0, "got {d}");
    }

    #[test]
    fn test_circle() {
        let c = Shape::circle(GeoPoint::new(48.8584, 2.2945), 500.0).unwrap();
        assert!(c.contains(&GeoPoint::new(48.8584, 2.2945)));
        assert!(c.contains(&GeoPoint::new(48.8610, 2.2945))); // ~290 m north
        assert!(!c.contains(&GeoPoint::new(48.8700, 2.2945))); // ~1.3 km north
        assert!(c.distance_m(&GeoPoint::new(48.8700, 2.2945)) > 700.0);
        assert!(c.bbox().contains(&GeoPoint::new(48.8610, 2.2945)));

        assert_eq!(
            Shape::circle(GeoPoint::new(0.0, 0.0), 0.0).unwrap_err(),
            GeofenceError::InvalidRadius(0.0)
        );
        assert!(Shape::circle(GeoPoint::new(0.0, 0.0), f64::NAN).is_err());
    }

    #[test]
    fn test_area() {
        // 0.01 x 0.01 degree square at the equator, ~1.236 km^2
        let small = Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.01),
            GeoPoint::new(0.01, 0.01),
            GeoPoint::new(0.01, 0.0),
        ])
        .unwrap();
        let area = small.area_m2();
        assert!((area - 1_236_000.0).abs() < 5_000.0, "got {area}");
    }

    #[test]
    fn test_shape_serde() {
        let shape = Shape::Polygon(square());
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json["type"], "polygon");
        assert_eq!(json["vertices"].as_array().unwrap().len(), 4);

        let bad = serde_json::json!({
            "type": "polygon",
            "vertices": [{"lat": 0.0, "lng": 0.0}, {"lat": 1.0, "lng": 1.0}]
        });
        assert!(serde_json::from_value::<Shape>(bad).is_err());

        let circle: Shape = serde_json::from_value(serde_json::json!({
            "type": "circle",
            "center": {"lat": 1.0, "lng": 2.0},
            "radius_m": 100.0
        }))
        .unwrap();
        assert_eq!(circle.centroid(), GeoPoint::new(1.0, 2.0));
    }

    proptest! {
        #[test]
        fn test_rect_centroid_inside(
            lat in -60.0f64..60.0,
            lng in -170.0f64..170.0,
            h in 0.001f64..5.0,
            w in 0.001f64..5.0,
        ) {
            let rect = Polygon::new(vec![
                GeoPoint::new(lat, lng),
                GeoPoint::new(lat, lng + w),
                GeoPoint::new(lat + h, lng + w),
                GeoPoint::new(lat + h, lng),
            ]).unwrap();
            prop_assert!(rect.contains(&rect.centroid()));
            prop_assert_eq!(rect.distance_m(&rect.centroid()), 0.0);
            prop_assert!(!rect.contains(&GeoPoint::new(lat + h + 1.0, lng)));
        }

        #[test]
        fn test_haversine_symmetric(
            lat1 in -90.0f64..90.0, lng1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lng2 in -180.0f64..180.0,
        ) {
            let a = GeoPoint::new(lat1, lng1);
            let b = GeoPoint::new(lat2, lng2);
            let ab = haversine_m(&a, &b);
            prop_assert!((ab - haversine_m(&b, &a)).abs() < 1e-6);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_M + 1.0);
        }
    }
}
