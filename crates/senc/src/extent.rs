use crate::geometry::GeoPoint;

/// Running lat/lon bounding box.
///
/// `nw` holds max lat / min lon, `se` holds min lat / max lon. Both are unset
/// until the first point arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extent {
    corners: Option<(GeoPoint, GeoPoint)>,
}

impl Extent {
    pub fn from_corners(nw: GeoPoint, se: GeoPoint) -> Self {
        Self {
            corners: Some((nw, se)),
        }
    }

    pub fn add(&mut self, point: &GeoPoint) {
        let position = GeoPoint::new(point.lon, point.lat);
        match self.corners.as_mut() {
            None => self.corners = Some((position, position)),
            Some((nw, se)) => {
                nw.lat = nw.lat.max(point.lat);
                nw.lon = nw.lon.min(point.lon);
                se.lat = se.lat.min(point.lat);
                se.lon = se.lon.max(point.lon);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_none()
    }

    /// `(nw, se)` once at least one point was added.
    pub fn corners(&self) -> Option<(GeoPoint, GeoPoint)> {
        self.corners
    }

    pub fn nw(&self) -> Option<GeoPoint> {
        self.corners.map(|(nw, _)| nw)
    }

    pub fn se(&self) -> Option<GeoPoint> {
        self.corners.map(|(_, se)| se)
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.corners {
            None => f.write_str("<empty>"),
            Some((nw, se)) => write!(
                f,
                "nw=({:.6}, {:.6}) se=({:.6}, {:.6})",
                nw.lon, nw.lat, se.lon, se.lat
            ),
        }
    }
}
