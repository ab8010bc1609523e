//! Geodetic to local planar conversion.
//!
//! This is the simple spherical Mercator offset the chart renderer inverts
//! when it reads vertex and sounding coordinates. It must stay bit-for-bit
//! identical to that inverse, so it is written out by hand instead of going
//! through a projection library.

use crate::geometry::GeoPoint;

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Mercator scale factor used by the renderer.
    pub const K0: f64 = 0.9996;
}

const DEG: f64 = std::f64::consts::PI / 180.0;
const Z: f64 = wgs84::A * wgs84::K0;

/// Meters east/north of a reference point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EastNorth {
    pub east: f64,
    pub north: f64,
}

#[inline]
fn atanh(s: f64) -> f64 {
    0.5 * ((1.0 + s) / (1.0 - s)).ln()
}

/// Longitude of `point`, moved by ±360° when it sits on the far side of the
/// antimeridian from `reference`.
#[inline]
pub fn unwrap_longitude(point_lon: f64, reference_lon: f64) -> f64 {
    if point_lon * reference_lon < 0.0 && (point_lon - reference_lon).abs() > 180.0 {
        if point_lon < 0.0 {
            point_lon + 360.0
        } else {
            point_lon - 360.0
        }
    } else {
        point_lon
    }
}

pub fn project(point: &GeoPoint, reference: &GeoPoint) -> EastNorth {
    let lon = unwrap_longitude(point.lon, reference.lon);
    let east = (lon - reference.lon) * DEG * Z;
    let north = Z * (atanh((point.lat * DEG).sin()) - atanh((reference.lat * DEG).sin()));
    EastNorth { east, north }
}
