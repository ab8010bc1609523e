//! Sequential SENC reader.
//!
//! Splits a cell into raw records and decodes the payloads this crate
//! writes. Malformed input is reported as `InvalidData`, truncation as
//! `UnexpectedEof`.

#[cfg(feature = "mmap")]
use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::record::{RecordType, HEADER_LEN, VALUE_KIND_DOUBLE, VALUE_KIND_INT, VALUE_KIND_STRING};

/// One framed record; `payload` excludes the 6 byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SencRecord {
    pub record_type: u16,
    pub payload: Vec<u8>,
}

/// Geometry bounds as stored in line/area/multipoint records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub s_lat: f64,
    pub n_lat: f64,
    pub w_lon: f64,
    pub e_lon: f64,
}

/// `(lat, lon)` corners of the cell extent record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellExtent {
    pub sw: (f64, f64),
    pub nw: (f64, f64),
    pub ne: (f64, f64),
    pub se: (f64, f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Int(u32),
    Double(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexList {
    pub tag: u8,
    pub vertices: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Version(u16),
    CellName(String),
    CellEdition(u16),
    CellUpdateDate(String),
    NativeScale(u32),
    Extent(CellExtent),
    FeatureId {
        type_code: u16,
        id: u16,
        primitive: u8,
    },
    Attribute {
        code: u16,
        value: DecodedValue,
    },
    Point {
        lat: f64,
        lon: f64,
    },
    Line {
        bounds: Bounds,
        linkages: Vec<[i32; 4]>,
    },
    Area {
        bounds: Bounds,
        contours: Vec<u32>,
        vertex_lists: Vec<VertexList>,
        linkages: Vec<[i32; 4]>,
    },
    /// `[east, north, value]` per point.
    Multipoint {
        bounds: Bounds,
        points: Vec<[f32; 3]>,
    },
    /// `(index, points)` per table entry.
    EdgeVectorTable(Vec<(u32, Vec<[f32; 2]>)>),
    TextDescription {
        name: String,
        text: String,
    },
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated SENC"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

/// Everything left in the payload.
#[inline(always)]
fn rest<'a>(buf: &mut &'a [u8]) -> &'a [u8] {
    std::mem::take(buf)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_i32(buf: &mut &[u8]) -> io::Result<i32> {
    let b = take(buf, 4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f32(buf: &mut &[u8]) -> io::Result<f32> {
    let b = take(buf, 4)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg.to_owned())
}

fn done(p: &[u8], what: &str) -> io::Result<()> {
    if p.is_empty() {
        Ok(())
    } else {
        Err(bad(&format!("{} trailing bytes in {} record", p.len(), what)))
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn bounds(p: &mut &[u8]) -> io::Result<Bounds> {
    Ok(Bounds {
        s_lat: le_f64(p)?,
        n_lat: le_f64(p)?,
        w_lon: le_f64(p)?,
        e_lon: le_f64(p)?,
    })
}

fn linkages(p: &mut &[u8], count: u32) -> io::Result<Vec<[i32; 4]>> {
    let mut out = Vec::with_capacity((count as usize).min(p.len() / 16));
    for _ in 0..count {
        out.push([le_i32(p)?, le_i32(p)?, le_i32(p)?, le_i32(p)?]);
    }
    Ok(out)
}

fn pairs(p: &mut &[u8], count: u32) -> io::Result<Vec<[f32; 2]>> {
    let bytes = (count as usize).checked_mul(8).ok_or_else(|| bad("vertex count overflow"))?;
    need(p, bytes)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push([le_f32(p)?, le_f32(p)?]);
    }
    Ok(out)
}

/// Split a whole cell into records.
pub fn parse_senc_bytes(mut p: &[u8]) -> io::Result<Vec<SencRecord>> {
    let mut records = Vec::new();
    while !p.is_empty() {
        let record_type = le_u16(&mut p)?;
        let length = le_u32(&mut p)? as usize;
        if length < HEADER_LEN {
            return Err(bad(&format!("record {} has length {}", record_type, length)));
        }
        let payload = take(&mut p, length - HEADER_LEN)?.to_vec();
        records.push(SencRecord {
            record_type,
            payload,
        });
    }
    Ok(records)
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Vec<SencRecord>> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_senc_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Vec<SencRecord>> {
    let bytes = std::fs::read(path)?;
    parse_senc_bytes(&bytes)
}

impl SencRecord {
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_code(self.record_type)
    }

    /// Total size on disk including the header.
    pub fn len(&self) -> usize {
        self.payload.len() + HEADER_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn decode(&self) -> io::Result<RecordBody> {
        let kind = self
            .kind()
            .ok_or_else(|| bad(&format!("unknown record type {}", self.record_type)))?;
        let mut p = self.payload.as_slice();
        let p = &mut p;

        let body = match kind {
            RecordType::Version => RecordBody::Version(le_u16(p)?),
            RecordType::CellEdition => RecordBody::CellEdition(le_u16(p)?),
            RecordType::NativeScale => RecordBody::NativeScale(le_u32(p)?),
            RecordType::CellName => RecordBody::CellName(text(rest(p))),
            RecordType::CellUpdateDate => RecordBody::CellUpdateDate(text(rest(p))),
            RecordType::Extent => {
                let mut corner = || -> io::Result<(f64, f64)> { Ok((le_f64(p)?, le_f64(p)?)) };
                RecordBody::Extent(CellExtent {
                    sw: corner()?,
                    nw: corner()?,
                    ne: corner()?,
                    se: corner()?,
                })
            }
            RecordType::FeatureId => RecordBody::FeatureId {
                type_code: le_u16(p)?,
                id: le_u16(p)?,
                primitive: le_u8(p)?,
            },
            RecordType::Attribute => {
                let code = le_u16(p)?;
                let value = match le_u8(p)? {
                    VALUE_KIND_INT => DecodedValue::Int(le_u32(p)?),
                    VALUE_KIND_DOUBLE | 1 => DecodedValue::Double(le_f64(p)?),
                    VALUE_KIND_STRING => DecodedValue::Text(text(rest(p))),
                    x => return Err(bad(&format!("unknown attribute value kind {}", x))),
                };
                RecordBody::Attribute { code, value }
            }
            RecordType::Point => RecordBody::Point {
                lat: le_f64(p)?,
                lon: le_f64(p)?,
            },
            RecordType::Line => {
                let bounds = bounds(p)?;
                let count = le_u32(p)?;
                RecordBody::Line {
                    bounds,
                    linkages: linkages(p, count)?,
                }
            }
            RecordType::Area => {
                let bounds = bounds(p)?;
                let contour_count = le_u32(p)?;
                let list_count = le_u32(p)?;
                let edge_count = le_u32(p)?;

                let mut contours = Vec::with_capacity((contour_count as usize).min(p.len() / 4));
                for _ in 0..contour_count {
                    contours.push(le_u32(p)?);
                }

                let mut vertex_lists = Vec::new();
                for _ in 0..list_count {
                    let tag = le_u8(p)?;
                    let count = le_u32(p)?;
                    take(p, 32)?; // vertex bounds
                    vertex_lists.push(VertexList {
                        tag,
                        vertices: pairs(p, count)?,
                    });
                }

                RecordBody::Area {
                    bounds,
                    contours,
                    vertex_lists,
                    linkages: linkages(p, edge_count)?,
                }
            }
            RecordType::Multipoint => {
                let bounds = bounds(p)?;
                let count = le_u32(p)?;
                let bytes = (count as usize).checked_mul(12).ok_or_else(|| bad("point count overflow"))?;
                need(p, bytes)?;
                let mut points = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    points.push([le_f32(p)?, le_f32(p)?, le_f32(p)?]);
                }
                RecordBody::Multipoint { bounds, points }
            }
            RecordType::EdgeVectorTable => {
                let entries = le_u32(p)?;
                let mut tables = Vec::new();
                for _ in 0..entries {
                    let index = le_u32(p)?;
                    let count = le_u32(p)?;
                    tables.push((index, pairs(p, count)?));
                }
                RecordBody::EdgeVectorTable(tables)
            }
            RecordType::TextDescription => {
                let name_len = le_u32(p)? as usize;
                let text_len = le_u32(p)? as usize;
                let name = take(p, name_len)?;
                let body = take(p, text_len)?;
                let trim = |b: &[u8]| text(b.strip_suffix(&[0]).unwrap_or(b));
                RecordBody::TextDescription {
                    name: trim(name),
                    text: trim(body),
                }
            }
        };

        done(*p, &format!("{:?}", kind))?;
        Ok(body)
    }
}
