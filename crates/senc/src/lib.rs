//! SENC: sequential binary chart cells built from WKB features.
//!
//! - Geometry comes in as WKB (points, lines, polygons with holes,
//!   multipoints, multipolygons; Z only on points).
//! - Coordinates are stored relative to the cell's reference point (center
//!   of the cell box) as f32 east/north meters.
//! - Polygons are stored pre-triangulated.
//!
//! File layout: a plain sequence of records, little-endian.
//!   00  : u16  record type
//!   02  : u32  record length (header included)
//!   06  : payload
//!
//! Header records, in this order:
//!   1   Version         u16 (201)
//!   2   Cell name       raw bytes
//!   4   Cell edition    u16
//!   100 Extent          f64 lat/lon of sw, nw, ne, se
//!   7   Native scale    u32
//!   5   Update date     raw bytes (optional)
//!
//! Per feature: 64 Feature-ID (u16 class, u16 id, u8 0), geometry records
//! (80 point, 81 line, 82 area, 83 multipoint) each followed by their
//! 96 edge-vector tables, then 65 attribute records. 101 text descriptions
//! may appear between features.
//!
//! Attribute value kinds: 0 = u32, 2 = f64, 4 = raw string.

pub mod catalog;
pub mod error;
pub mod extent;
pub mod geometry;
pub mod projection;
pub mod reader;
pub mod record;
pub mod session;
pub mod tessellate;
pub mod wkb;

pub use catalog::{AttributeDescriptor, MappingCatalog, ObjectClass, ValueKind};
pub use error::{Result, SencError};
pub use extent::Extent;
pub use geometry::{GeoPoint, Geometry, Polygon};
pub use projection::{project, EastNorth};
pub use reader::{parse_senc_bytes, read_file, RecordBody, SencRecord};
pub use record::RecordType;
pub use session::{
    AttributeValue, EdgeVectorMode, FeatureAttribute, SencHeader, SencSession, SessionOptions,
};
pub use wkb::parse_wkb;
