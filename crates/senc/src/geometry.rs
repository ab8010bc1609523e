//! Decoded feature geometry.

use crate::extent::Extent;

/// A geodetic position in degrees; `depth` only comes from WKB Z ordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
    pub depth: Option<f64>,
}

impl GeoPoint {
    #[inline]
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon,
            lat,
            depth: None,
        }
    }

    #[inline]
    pub fn with_depth(lon: f64, lat: f64, depth: f64) -> Self {
        Self {
            lon,
            lat,
            depth: Some(depth),
        }
    }

    /// Same horizontal position; depth is ignored.
    #[inline]
    pub fn same_position(&self, other: &GeoPoint) -> bool {
        self.lon == other.lon && self.lat == other.lat
    }
}

/// Ring 0 is the outer boundary, every further ring is a hole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<GeoPoint>>,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<GeoPoint>>) -> Self {
        Self { rings }
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|ring| ring.is_empty())
    }

    pub fn points(&self) -> impl Iterator<Item = &GeoPoint> {
        self.rings.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(GeoPoint),
    LineString(Vec<GeoPoint>),
    Polygon(Polygon),
    MultiPoint(Vec<GeoPoint>),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "point",
            Geometry::LineString(_) => "line string",
            Geometry::Polygon(_) => "polygon",
            Geometry::MultiPoint(_) => "multi point",
            Geometry::MultiPolygon(_) => "multi polygon",
        }
    }

    /// True if any point carries a depth.
    pub fn has_z(&self) -> bool {
        match self {
            Geometry::Point(p) => p.depth.is_some(),
            Geometry::LineString(points) | Geometry::MultiPoint(points) => {
                points.iter().any(|p| p.depth.is_some())
            }
            Geometry::Polygon(polygon) => polygon.points().any(|p| p.depth.is_some()),
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .flat_map(Polygon::points)
                .any(|p| p.depth.is_some()),
        }
    }

    /// Widen `extent` by every point of this geometry.
    pub fn extend(&self, extent: &mut Extent) {
        match self {
            Geometry::Point(p) => extent.add(p),
            Geometry::LineString(points) | Geometry::MultiPoint(points) => {
                points.iter().for_each(|p| extent.add(p))
            }
            Geometry::Polygon(polygon) => polygon.points().for_each(|p| extent.add(p)),
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .flat_map(Polygon::points)
                .for_each(|p| extent.add(p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_z_looks_at_every_member() {
        let flat = Geometry::MultiPoint(vec![GeoPoint::new(1.0, 2.0), GeoPoint::new(3.0, 4.0)]);
        assert!(!flat.has_z());

        let deep = Geometry::MultiPoint(vec![
            GeoPoint::new(1.0, 2.0),
            GeoPoint::with_depth(3.0, 4.0, 12.5),
        ]);
        assert!(deep.has_z());
    }

    #[test]
    fn extend_covers_holes_and_members() {
        let square = |x: f64| {
            vec![
                GeoPoint::new(x, 0.0),
                GeoPoint::new(x + 1.0, 0.0),
                GeoPoint::new(x + 1.0, 1.0),
                GeoPoint::new(x, 0.0),
            ]
        };
        let geometry = Geometry::MultiPolygon(vec![
            Polygon::new(vec![square(0.0)]),
            Polygon::new(vec![square(5.0)]),
        ]);

        let mut extent = Extent::default();
        geometry.extend(&mut extent);

        let (nw, se) = extent.corners().unwrap();
        assert_eq!((nw.lon, nw.lat), (0.0, 1.0));
        assert_eq!((se.lon, se.lat), (6.0, 0.0));
    }
}
