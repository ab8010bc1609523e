//! Well-Known Binary geometry decoder.
//!
//! Every geometry starts with a byte-order flag (1 = little-endian, anything
//! else big-endian) and a u32 type code. Bit `0x80000000` of the type code
//! marks a Z ordinate; the remaining bits select the base type. Members of
//! multi geometries carry their own header and byte order.

use crate::error::{Result, SencError};
use crate::geometry::{GeoPoint, Geometry, Polygon};

pub const WKB_POINT: u32 = 1;
pub const WKB_LINE_STRING: u32 = 2;
pub const WKB_POLYGON: u32 = 3;
pub const WKB_MULTI_POINT: u32 = 4;
pub const WKB_MULTI_POLYGON: u32 = 6;

pub const WKB_Z_FLAG: u32 = 0x8000_0000;

/// Decode one geometry. `context` only shows up in error messages.
pub fn parse_wkb(buf: &[u8], context: &str) -> Result<Geometry> {
    let mut reader = WkbReader {
        buf,
        pos: 0,
        context,
    };
    reader.geometry()
}

#[derive(Debug, Clone, Copy)]
struct Header {
    little_endian: bool,
    base_type: u32,
    has_z: bool,
}

struct WkbReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'a str,
}

impl<'a> WkbReader<'a> {
    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SencError::format(
                self.context,
                format!("truncated at offset {} (need {} more bytes)", self.pos, n),
            ));
        }
        let buf: &'a [u8] = self.buf;
        let bytes = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    #[inline]
    fn u32(&mut self, header: Header) -> Result<u32> {
        let b = self.take(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(if header.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    #[inline]
    fn f64(&mut self, header: Header) -> Result<f64> {
        let b = self.take(8)?;
        let raw = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        Ok(if header.little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    /// Element counts come from untrusted input; never reserve more than the
    /// buffer could possibly hold.
    #[inline]
    fn capacity_for(&self, count: u32, min_element: usize) -> usize {
        (count as usize).min(self.remaining() / min_element)
    }

    fn header(&mut self) -> Result<Header> {
        if self.remaining() < 5 {
            return Err(SencError::format(
                self.context,
                format!("geometry header needs 5 bytes, {} left", self.remaining()),
            ));
        }
        let little_endian = self.take(1)?[0] == 1;
        let mut header = Header {
            little_endian,
            base_type: 0,
            has_z: false,
        };
        let code = self.u32(header)?;
        header.has_z = code & WKB_Z_FLAG != 0;
        header.base_type = code & !WKB_Z_FLAG;
        Ok(header)
    }

    fn point(&mut self, header: Header) -> Result<GeoPoint> {
        let lon = self.f64(header)?;
        let lat = self.f64(header)?;
        if header.has_z {
            let depth = self.f64(header)?;
            Ok(GeoPoint::with_depth(lon, lat, depth))
        } else {
            Ok(GeoPoint::new(lon, lat))
        }
    }

    fn points(&mut self, header: Header) -> Result<Vec<GeoPoint>> {
        let count = self.u32(header)?;
        let stride = if header.has_z { 24 } else { 16 };
        let mut points = Vec::with_capacity(self.capacity_for(count, stride));
        for _ in 0..count {
            points.push(self.point(header)?);
        }
        Ok(points)
    }

    fn line_string(&mut self, header: Header) -> Result<Vec<GeoPoint>> {
        if header.has_z {
            return Err(SencError::format(
                self.context,
                "3rd coordinate not supported for line strings",
            ));
        }
        self.points(header)
    }

    fn polygon(&mut self, header: Header) -> Result<Polygon> {
        if header.has_z {
            return Err(SencError::format(
                self.context,
                "3rd coordinate not supported for polygons",
            ));
        }
        let ring_count = self.u32(header)?;
        let mut rings = Vec::with_capacity(self.capacity_for(ring_count, 4));
        for _ in 0..ring_count {
            rings.push(self.points(header)?);
        }
        Ok(Polygon::new(rings))
    }

    fn multi_point(&mut self, header: Header) -> Result<Vec<GeoPoint>> {
        let count = self.u32(header)?;
        let mut points = Vec::with_capacity(self.capacity_for(count, 21));
        for _ in 0..count {
            let nested = self.header()?;
            if nested.base_type != WKB_POINT {
                return Err(SencError::format(
                    self.context,
                    format!("type {} inside multi point", nested.base_type),
                ));
            }
            points.push(self.point(nested)?);
        }
        Ok(points)
    }

    fn multi_polygon(&mut self, header: Header) -> Result<Vec<Polygon>> {
        let count = self.u32(header)?;
        let mut polygons = Vec::with_capacity(self.capacity_for(count, 9));
        for _ in 0..count {
            let nested = self.header()?;
            if nested.base_type != WKB_POLYGON {
                return Err(SencError::format(
                    self.context,
                    format!("type {} inside multi polygon", nested.base_type),
                ));
            }
            polygons.push(self.polygon(nested)?);
        }
        Ok(polygons)
    }

    fn geometry(&mut self) -> Result<Geometry> {
        let header = self.header()?;
        match header.base_type {
            WKB_POINT => Ok(Geometry::Point(self.point(header)?)),
            WKB_LINE_STRING => Ok(Geometry::LineString(self.line_string(header)?)),
            WKB_POLYGON => Ok(Geometry::Polygon(self.polygon(header)?)),
            WKB_MULTI_POINT => Ok(Geometry::MultiPoint(self.multi_point(header)?)),
            WKB_MULTI_POLYGON => Ok(Geometry::MultiPolygon(self.multi_polygon(header)?)),
            other => Err(SencError::format(
                self.context,
                format!("unsupported geometry type {}", other),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal WKB writer for test input.
    pub(crate) struct WkbBuilder {
        pub buf: Vec<u8>,
        little: bool,
    }

    impl WkbBuilder {
        pub fn new(little: bool) -> Self {
            Self {
                buf: Vec::new(),
                little,
            }
        }

        pub fn header(mut self, code: u32) -> Self {
            self.buf.push(if self.little { 1 } else { 0 });
            self.u32(code)
        }

        pub fn u32(mut self, v: u32) -> Self {
            let bytes = if self.little {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            };
            self.buf.extend_from_slice(&bytes);
            self
        }

        pub fn f64s(mut self, values: &[f64]) -> Self {
            for v in values {
                let bytes = if self.little {
                    v.to_le_bytes()
                } else {
                    v.to_be_bytes()
                };
                self.buf.extend_from_slice(&bytes);
            }
            self
        }

        pub fn raw(mut self, bytes: &[u8]) -> Self {
            self.buf.extend_from_slice(bytes);
            self
        }
    }

    pub(crate) fn point_wkb(lon: f64, lat: f64) -> Vec<u8> {
        WkbBuilder::new(true).header(WKB_POINT).f64s(&[lon, lat]).buf
    }

    #[test]
    fn little_endian_point() {
        let geometry = parse_wkb(&point_wkb(10.0, 50.0), "test").unwrap();
        assert_eq!(geometry, Geometry::Point(GeoPoint::new(10.0, 50.0)));
    }

    #[test]
    fn big_endian_matches_little_endian() {
        let le = WkbBuilder::new(true)
            .header(WKB_LINE_STRING)
            .u32(2)
            .f64s(&[1.0, 2.0, 3.0, 4.0])
            .buf;
        let be = WkbBuilder::new(false)
            .header(WKB_LINE_STRING)
            .u32(2)
            .f64s(&[1.0, 2.0, 3.0, 4.0])
            .buf;

        let expected = Geometry::LineString(vec![GeoPoint::new(1.0, 2.0), GeoPoint::new(3.0, 4.0)]);
        assert_eq!(parse_wkb(&le, "le").unwrap(), expected);
        assert_eq!(parse_wkb(&be, "be").unwrap(), expected);
    }

    #[test]
    fn point_with_z_keeps_depth() {
        let buf = WkbBuilder::new(true)
            .header(WKB_POINT | WKB_Z_FLAG)
            .f64s(&[13.5, 54.1, 7.25])
            .buf;
        let geometry = parse_wkb(&buf, "z").unwrap();
        assert_eq!(geometry, Geometry::Point(GeoPoint::with_depth(13.5, 54.1, 7.25)));
        assert!(geometry.has_z());
    }

    #[test]
    fn polygon_with_hole() {
        let buf = WkbBuilder::new(true)
            .header(WKB_POLYGON)
            .u32(2)
            .u32(4)
            .f64s(&[0.0, 0.0, 4.0, 0.0, 0.0, 4.0, 0.0, 0.0])
            .u32(4)
            .f64s(&[1.0, 1.0, 2.0, 1.0, 1.0, 2.0, 1.0, 1.0])
            .buf;

        match parse_wkb(&buf, "poly").unwrap() {
            Geometry::Polygon(polygon) => {
                assert_eq!(polygon.rings.len(), 2);
                assert_eq!(polygon.rings[0].len(), 4);
                assert_eq!(polygon.rings[1][1], GeoPoint::new(2.0, 1.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn z_on_polygon_and_line_is_rejected() {
        let polygon = WkbBuilder::new(true)
            .header(WKB_POLYGON | WKB_Z_FLAG)
            .u32(0)
            .buf;
        let line = WkbBuilder::new(true)
            .header(WKB_LINE_STRING | WKB_Z_FLAG)
            .u32(0)
            .buf;

        assert!(matches!(parse_wkb(&polygon, "p"), Err(SencError::Format { .. })));
        assert!(matches!(parse_wkb(&line, "l"), Err(SencError::Format { .. })));
    }

    #[test]
    fn multi_point_members_have_their_own_byte_order() {
        let first = WkbBuilder::new(false)
            .header(WKB_POINT | WKB_Z_FLAG)
            .f64s(&[1.0, 2.0, 3.0])
            .buf;
        let second = WkbBuilder::new(true)
            .header(WKB_POINT | WKB_Z_FLAG)
            .f64s(&[4.0, 5.0, 6.0])
            .buf;
        let buf = WkbBuilder::new(true)
            .header(WKB_MULTI_POINT | WKB_Z_FLAG)
            .u32(2)
            .raw(&first)
            .raw(&second)
            .buf;

        let geometry = parse_wkb(&buf, "soundings").unwrap();
        assert_eq!(
            geometry,
            Geometry::MultiPoint(vec![
                GeoPoint::with_depth(1.0, 2.0, 3.0),
                GeoPoint::with_depth(4.0, 5.0, 6.0),
            ])
        );
    }

    #[test]
    fn multi_polygon_decodes_each_member() {
        let member = |offset: f64| {
            WkbBuilder::new(true)
                .header(WKB_POLYGON)
                .u32(1)
                .u32(4)
                .f64s(&[offset, 0.0, offset + 1.0, 0.0, offset, 1.0, offset, 0.0])
                .buf
        };
        let buf = WkbBuilder::new(false)
            .header(WKB_MULTI_POLYGON)
            .u32(2)
            .raw(&member(0.0))
            .raw(&member(10.0))
            .buf;

        match parse_wkb(&buf, "mp").unwrap() {
            Geometry::MultiPolygon(polygons) => {
                assert_eq!(polygons.len(), 2);
                assert_eq!(polygons[1].rings[0][0], GeoPoint::new(10.0, 0.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_type_mismatch_is_rejected() {
        let buf = WkbBuilder::new(true)
            .header(WKB_MULTI_POINT)
            .u32(1)
            .raw(&WkbBuilder::new(true).header(WKB_POLYGON).u32(0).buf)
            .buf;
        assert!(matches!(parse_wkb(&buf, "mp"), Err(SencError::Format { .. })));

        let buf = WkbBuilder::new(true)
            .header(WKB_MULTI_POLYGON)
            .u32(1)
            .raw(&point_wkb(1.0, 1.0))
            .buf;
        assert!(matches!(parse_wkb(&buf, "mpoly"), Err(SencError::Format { .. })));
    }

    #[test]
    fn short_and_unsupported_input_is_rejected() {
        assert!(matches!(parse_wkb(&[1, 1, 0], "short"), Err(SencError::Format { .. })));

        let multi_line = WkbBuilder::new(true).header(5).u32(0).buf;
        let err = parse_wkb(&multi_line, "table:7").unwrap_err();
        assert!(err.to_string().contains("table:7"));

        let mut truncated = point_wkb(1.0, 2.0);
        truncated.truncate(12);
        assert!(matches!(parse_wkb(&truncated, "t"), Err(SencError::Format { .. })));
    }
}
