//! SENC record framing and payload builders.
//!
//! Every record is `u16 type, u32 length, payload` (little-endian), where
//! `length` counts the 6 header bytes. Builders return the finished bytes;
//! the length field is patched in once the payload is complete.

use crate::extent::Extent;
use crate::geometry::GeoPoint;
use crate::projection::EastNorth;

pub const HEADER_LEN: usize = 6;

/// Value-kind tags of the attribute record.
pub const VALUE_KIND_INT: u8 = 0;
pub const VALUE_KIND_DOUBLE: u8 = 2;
pub const VALUE_KIND_STRING: u8 = 4;

/// Vertex list tag for a plain triangle list.
pub const TRIANGLE_LIST: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RecordType {
    Version = 1,
    CellName = 2,
    CellEdition = 4,
    CellUpdateDate = 5,
    NativeScale = 7,
    FeatureId = 64,
    Attribute = 65,
    Point = 80,
    Line = 81,
    Area = 82,
    Multipoint = 83,
    EdgeVectorTable = 96,
    Extent = 100,
    TextDescription = 101,
}

impl RecordType {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => RecordType::Version,
            2 => RecordType::CellName,
            4 => RecordType::CellEdition,
            5 => RecordType::CellUpdateDate,
            7 => RecordType::NativeScale,
            64 => RecordType::FeatureId,
            65 => RecordType::Attribute,
            80 => RecordType::Point,
            81 => RecordType::Line,
            82 => RecordType::Area,
            83 => RecordType::Multipoint,
            96 => RecordType::EdgeVectorTable,
            100 => RecordType::Extent,
            101 => RecordType::TextDescription,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// A record being assembled.
#[derive(Debug, Clone)]
pub struct RecordBuf {
    bytes: Vec<u8>,
}

impl RecordBuf {
    pub fn new(record_type: RecordType) -> Self {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&record_type.code().to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        Self { bytes }
    }

    #[inline]
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    #[inline]
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(v);
        self
    }

    /// Geometry bounds: s_lat, n_lat, w_lon, e_lon. Zeros when empty.
    pub fn bounds(&mut self, extent: &Extent) -> &mut Self {
        let (s, n, w, e) = match extent.corners() {
            Some((nw, se)) => (se.lat, nw.lat, nw.lon, se.lon),
            None => (0.0, 0.0, 0.0, 0.0),
        };
        self.f64(s).f64(n).f64(w).f64(e)
    }

    #[inline]
    pub fn east_north(&mut self, p: &EastNorth) -> &mut Self {
        self.f32(p.east as f32).f32(p.north as f32)
    }

    /// Node/edge linkage: no connected nodes, forward along `edge_index`.
    #[inline]
    pub fn linkage(&mut self, edge_index: u32) -> &mut Self {
        self.i32(0).i32(edge_index as i32).i32(0).i32(0)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() == HEADER_LEN
    }

    /// Patch the length field and hand out the serialized record.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.bytes.len() as u32;
        self.bytes[2..HEADER_LEN].copy_from_slice(&len.to_le_bytes());
        self.bytes
    }
}

/// Attribute payload as it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodedValue<'a> {
    Int(u32),
    Double(f64),
    Text(&'a str),
}

pub fn version(version: u16) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::Version);
    r.u16(version);
    r.finish()
}

pub fn cell_name(name: &str) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::CellName);
    r.bytes(name.as_bytes());
    r.finish()
}

pub fn cell_edition(edition: u16) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::CellEdition);
    r.u16(edition);
    r.finish()
}

pub fn cell_update_date(date: &str) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::CellUpdateDate);
    r.bytes(date.as_bytes());
    r.finish()
}

pub fn native_scale(scale: u32) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::NativeScale);
    r.u32(scale);
    r.finish()
}

/// Cell extent. Only nw/se are stored independently; sw and ne are the
/// remaining corners of the same box.
pub fn extent(nw: &GeoPoint, se: &GeoPoint) -> Vec<u8> {
    let sw = GeoPoint::new(nw.lon, se.lat);
    let ne = GeoPoint::new(se.lon, nw.lat);

    let mut r = RecordBuf::new(RecordType::Extent);
    for corner in [sw, *nw, ne, *se] {
        r.f64(corner.lat).f64(corner.lon);
    }
    r.finish()
}

pub fn feature_id(type_code: u16, id: u16) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::FeatureId);
    r.u16(type_code).u16(id).u8(0);
    r.finish()
}

pub fn attribute(code: u16, value: EncodedValue<'_>) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::Attribute);
    r.u16(code);
    match value {
        EncodedValue::Int(v) => r.u8(VALUE_KIND_INT).u32(v),
        EncodedValue::Double(v) => r.u8(VALUE_KIND_DOUBLE).f64(v),
        EncodedValue::Text(v) => r.u8(VALUE_KIND_STRING).bytes(v.as_bytes()),
    };
    r.finish()
}

pub fn point(point: &GeoPoint) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::Point);
    r.f64(point.lat).f64(point.lon);
    r.finish()
}

pub fn line(bounds: &Extent, edge_index: u32) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::Line);
    r.bounds(bounds).u32(1).linkage(edge_index);
    r.finish()
}

/// One triangle list plus a linkage per referenced edge-vector table.
pub fn area(bounds: &Extent, triangles: &[EastNorth], edge_indices: &[u32]) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::Area);
    r.bounds(bounds)
        .u32(0) // contours
        .u32(1) // vertex lists
        .u32(edge_indices.len() as u32)
        .u8(TRIANGLE_LIST)
        .u32(triangles.len() as u32)
        .bounds(bounds);
    for vertex in triangles {
        r.east_north(vertex);
    }
    for &index in edge_indices {
        r.linkage(index);
    }
    r.finish()
}

/// Projected points with one value each (the depth for soundings).
pub fn multipoint(bounds: &Extent, points: &[(EastNorth, f64)]) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::Multipoint);
    r.bounds(bounds).u32(points.len() as u32);
    for (position, value) in points {
        r.east_north(position).f32(*value as f32);
    }
    r.finish()
}

pub fn edge_vector_table(index: u32, points: &[EastNorth]) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::EdgeVectorTable);
    r.u32(1).u32(index).u32(points.len() as u32);
    for p in points {
        r.east_north(p);
    }
    r.finish()
}

/// Name and text each get a NUL that is counted in their length.
pub fn text_description(name: &str, text: &str) -> Vec<u8> {
    let mut r = RecordBuf::new(RecordType::TextDescription);
    r.u32(name.len() as u32 + 1)
        .u32(text.len() as u32 + 1)
        .bytes(name.as_bytes())
        .u8(0)
        .bytes(text.as_bytes())
        .u8(0);
    r.finish()
}
